//! AI conversation persistence handler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use lerno_core::{ChatRepository, JobPayload, JobType};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Persists a batch of AI-assistant chat messages.
///
/// Message ids are producer-assigned, so a redelivered batch inserts zero
/// rows instead of duplicating the conversation.
pub struct AiMessagesHandler {
    chat: Arc<dyn ChatRepository>,
}

impl AiMessagesHandler {
    pub fn new(chat: Arc<dyn ChatRepository>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl JobHandler for AiMessagesHandler {
    fn job_type(&self) -> JobType {
        JobType::SaveAiMessages
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload = match ctx.payload() {
            JobPayload::SaveAiMessages(payload) => payload.clone(),
            other => {
                return JobResult::Failed(format!(
                    "Payload {} does not match handler {}",
                    other.job_type(),
                    self.job_type()
                ))
            }
        };

        if payload.messages.is_empty() {
            return JobResult::Success;
        }

        match self
            .chat
            .save_messages(payload.tenant_id, payload.conversation_id, &payload.messages)
            .await
        {
            Ok(inserted) => {
                info!(
                    subsystem = "jobs",
                    job_type = %self.job_type(),
                    tenant_id = %payload.tenant_id,
                    conversation_id = %payload.conversation_id,
                    batch = payload.messages.len(),
                    inserted,
                    "Chat messages persisted"
                );
                JobResult::Success
            }
            Err(e) => JobResult::Retry(format!("Chat persistence failed: {e}")),
        }
    }
}
