//! Enqueue gateway: the single entry point producers use to submit jobs.

use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use lerno_core::{JobEnvelope, JobHistoryStore, JobPayload, JobTransport, Result};

use crate::queue::QueueSet;

/// Identifiers returned to the producer after a successful enqueue.
#[derive(Debug, Clone, Copy)]
pub struct EnqueuedJob {
    pub job_id: Uuid,
    pub history_id: Uuid,
}

/// Routes typed payloads to their queue and correlates each job with a
/// freshly created history record.
///
/// The history record is created first so that a job is never visible to a
/// worker without an audit trail. If the push fails the record stays
/// `pending` and is caught by history cleanup; the producer sees the error
/// either way.
#[derive(Clone)]
pub struct EnqueueGateway {
    history: Arc<dyn JobHistoryStore>,
    transport: Arc<dyn JobTransport>,
    queues: QueueSet,
}

impl EnqueueGateway {
    /// Create a gateway with the default queue set.
    pub fn new(history: Arc<dyn JobHistoryStore>, transport: Arc<dyn JobTransport>) -> Self {
        Self {
            history,
            transport,
            queues: QueueSet::default(),
        }
    }

    /// Override the queue set (attempt budgets come from it).
    pub fn with_queues(mut self, queues: QueueSet) -> Self {
        self.queues = queues;
        self
    }

    /// Enqueue a job. Errors propagate to the caller; a job submission
    /// never fails silently.
    #[instrument(skip(self, payload), fields(subsystem = "jobs", op = "enqueue"))]
    pub async fn enqueue(&self, payload: JobPayload) -> Result<EnqueuedJob> {
        let job_type = payload.job_type();
        let queue = job_type.queue();
        let max_attempts = self.queues.get(queue).max_attempts;

        let history_id = self.history.create(job_type).await?;
        let envelope = JobEnvelope {
            history_id,
            payload,
        };
        let job_id = self
            .transport
            .push(queue, job_type, &envelope, max_attempts)
            .await?;

        debug!(
            subsystem = "jobs",
            op = "enqueue",
            job_id = %job_id,
            history_id = %history_id,
            job_type = %job_type,
            queue = %queue,
            "Job enqueued"
        );

        Ok(EnqueuedJob { job_id, history_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryHistory, InMemoryTransport};
    use lerno_core::{
        JobStatus, JobType, QueueName, SaveAiMessagesPayload, SendWelcomeEmailPayload,
    };

    fn gateway() -> (EnqueueGateway, Arc<InMemoryHistory>, Arc<InMemoryTransport>) {
        let history = Arc::new(InMemoryHistory::new());
        let transport = Arc::new(InMemoryTransport::new());
        (
            EnqueueGateway::new(history.clone(), transport.clone()),
            history,
            transport,
        )
    }

    #[tokio::test]
    async fn test_enqueue_creates_history_before_push() {
        let (gateway, history, transport) = gateway();

        let enqueued = gateway
            .enqueue(JobPayload::SendWelcomeEmail(SendWelcomeEmailPayload {
                email: "ada@example.com".into(),
                user_name: "Ada".into(),
            }))
            .await
            .unwrap();

        let record = history.get(enqueued.history_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.job_type, JobType::SendWelcomeEmail);

        let job = transport.claim(QueueName::Notifications).await.unwrap().unwrap();
        assert_eq!(job.id, enqueued.job_id);
        assert_eq!(job.envelope.history_id, enqueued.history_id);
    }

    #[tokio::test]
    async fn test_enqueue_routes_by_job_type() {
        let (gateway, _, transport) = gateway();

        gateway
            .enqueue(JobPayload::SaveAiMessages(SaveAiMessagesPayload {
                tenant_id: Uuid::new_v4(),
                conversation_id: Uuid::new_v4(),
                messages: Vec::new(),
            }))
            .await
            .unwrap();

        assert_eq!(
            transport.pending_count(QueueName::ChatPersistence).await.unwrap(),
            1
        );
        assert_eq!(
            transport.pending_count(QueueName::Notifications).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_enqueue_applies_queue_attempt_budget() {
        let (gateway, _, transport) = gateway();

        gateway
            .enqueue(JobPayload::SendWelcomeEmail(SendWelcomeEmailPayload {
                email: "ada@example.com".into(),
                user_name: "Ada".into(),
            }))
            .await
            .unwrap();

        let job = transport.claim(QueueName::Notifications).await.unwrap().unwrap();
        assert_eq!(job.max_attempts, 3);
    }

    #[tokio::test]
    async fn test_enqueue_push_failure_propagates() {
        let history = Arc::new(InMemoryHistory::new());
        let transport = Arc::new(InMemoryTransport::new().with_push_failure("queue offline"));
        let gateway = EnqueueGateway::new(history, transport);

        let err = gateway
            .enqueue(JobPayload::SendWelcomeEmail(SendWelcomeEmailPayload {
                email: "ada@example.com".into(),
                user_name: "Ada".into(),
            }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("queue offline"));
    }
}
