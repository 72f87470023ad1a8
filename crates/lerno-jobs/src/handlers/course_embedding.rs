//! Course embedding generation handler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use lerno_core::{CatalogRepository, JobPayload, JobType};
use lerno_embed::EmbeddingBackend;

use crate::handler::{JobContext, JobHandler, JobResult};

/// Computes and persists the embedding for a catalog course.
///
/// The write is an upsert keyed by course id, so redelivery after a crash
/// between embed and ack is harmless.
pub struct CourseEmbeddingHandler {
    backend: Arc<dyn EmbeddingBackend>,
    catalog: Arc<dyn CatalogRepository>,
}

impl CourseEmbeddingHandler {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, catalog: Arc<dyn CatalogRepository>) -> Self {
        Self { backend, catalog }
    }
}

#[async_trait]
impl JobHandler for CourseEmbeddingHandler {
    fn job_type(&self) -> JobType {
        JobType::GenerateCourseEmbedding
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload = match ctx.payload() {
            JobPayload::GenerateCourseEmbedding(payload) => payload.clone(),
            other => {
                return JobResult::Failed(format!(
                    "Payload {} does not match handler {}",
                    other.job_type(),
                    self.job_type()
                ))
            }
        };

        let text = format!("{}\n\n{}", payload.title, payload.description);
        let embedding = match self.backend.embed(&text).await {
            Ok(embedding) => embedding,
            Err(e) => return JobResult::Retry(format!("Embedding computation failed: {e}")),
        };

        match self
            .catalog
            .store_course_embedding(payload.tenant_id, payload.course_id, &embedding)
            .await
        {
            Ok(()) => {
                info!(
                    subsystem = "jobs",
                    job_type = %self.job_type(),
                    tenant_id = %payload.tenant_id,
                    course_id = %payload.course_id,
                    dimension = embedding.len(),
                    "Course embedding stored"
                );
                JobResult::Success
            }
            Err(e) => JobResult::Retry(format!("Embedding write failed: {e}")),
        }
    }
}
