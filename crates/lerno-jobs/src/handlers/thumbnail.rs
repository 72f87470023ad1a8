//! Video thumbnail generation handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use lerno_core::{Error, JobPayload, JobType, Result};
use uuid::Uuid;

use crate::handler::{JobContext, JobHandler, JobResult};

/// Media rendering port. Implementations render the frame and store the
/// derivative; the handler only cares whether it happened.
#[async_trait]
pub trait ThumbnailRenderer: Send + Sync {
    async fn render(&self, tenant_id: Uuid, video_id: Uuid, source_url: &str) -> Result<()>;
}

/// Renders a thumbnail for an uploaded video.
pub struct ThumbnailHandler {
    renderer: Arc<dyn ThumbnailRenderer>,
}

impl ThumbnailHandler {
    pub fn new(renderer: Arc<dyn ThumbnailRenderer>) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl JobHandler for ThumbnailHandler {
    fn job_type(&self) -> JobType {
        JobType::GenerateThumbnail
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload = match ctx.payload() {
            JobPayload::GenerateThumbnail(payload) => payload.clone(),
            other => {
                return JobResult::Failed(format!(
                    "Payload {} does not match handler {}",
                    other.job_type(),
                    self.job_type()
                ))
            }
        };

        match self
            .renderer
            .render(payload.tenant_id, payload.video_id, &payload.source_url)
            .await
        {
            Ok(()) => {
                info!(
                    subsystem = "jobs",
                    job_type = %self.job_type(),
                    tenant_id = %payload.tenant_id,
                    video_id = %payload.video_id,
                    "Thumbnail rendered"
                );
                JobResult::Success
            }
            Err(e) => JobResult::Retry(format!("Thumbnail rendering failed: {e}")),
        }
    }
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    tenant_id: Uuid,
    video_id: Uuid,
    source_url: &'a str,
}

/// [`ThumbnailRenderer`] backed by the media rendering service's HTTP API.
pub struct HttpThumbnailRenderer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpThumbnailRenderer {
    /// Read `MEDIA_API_URL` from the environment.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("MEDIA_API_URL")
            .map_err(|_| Error::Config("MEDIA_API_URL is not set".into()))?;
        let client = reqwest::Client::builder()
            // Frame extraction on large uploads is slow.
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ThumbnailRenderer for HttpThumbnailRenderer {
    async fn render(&self, tenant_id: Uuid, video_id: Uuid, source_url: &str) -> Result<()> {
        let url = format!("{}/thumbnails", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&RenderRequest {
                tenant_id,
                video_id,
                source_url,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Request(format!(
                "media endpoint returned {status}: {body}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::job_fixture;
    use lerno_core::GenerateThumbnailPayload;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRenderer {
        rendered: Mutex<Vec<Uuid>>,
        fail: bool,
    }

    #[async_trait]
    impl ThumbnailRenderer for RecordingRenderer {
        async fn render(&self, _tenant_id: Uuid, video_id: Uuid, _source_url: &str) -> Result<()> {
            if self.fail {
                return Err(Error::Request("source fetch timed out".into()));
            }
            self.rendered.lock().unwrap().push(video_id);
            Ok(())
        }
    }

    fn payload(video_id: Uuid) -> JobPayload {
        JobPayload::GenerateThumbnail(GenerateThumbnailPayload {
            tenant_id: Uuid::new_v4(),
            video_id,
            source_url: "https://media.example.com/v/abc.mp4".into(),
        })
    }

    #[tokio::test]
    async fn test_renders_thumbnail() {
        let renderer = Arc::new(RecordingRenderer::default());
        let handler = ThumbnailHandler::new(renderer.clone());

        let video_id = Uuid::new_v4();
        let result = handler
            .execute(JobContext::new(job_fixture(payload(video_id))))
            .await;

        assert!(matches!(result, JobResult::Success));
        assert_eq!(renderer.rendered.lock().unwrap().as_slice(), &[video_id]);
    }

    #[tokio::test]
    async fn test_render_failure_is_transient() {
        let handler = ThumbnailHandler::new(Arc::new(RecordingRenderer {
            fail: true,
            ..Default::default()
        }));
        let result = handler
            .execute(JobContext::new(job_fixture(payload(Uuid::new_v4()))))
            .await;
        assert!(matches!(result, JobResult::Retry(_)));
    }
}
