//! Repository and transport trait definitions.
//!
//! Concrete PostgreSQL implementations live in `lerno-db`; in-memory fakes
//! used by the pipeline tests live in `lerno-jobs::testing`.

use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use crate::models::{
    ChatMessage, ContentUsage, CourseEmbedding, FailOutcome, HistoryStats, Job, JobEnvelope,
    JobHistoryRecord, JobType, QueueName, RetentionPolicy, StalledSweep,
};
use crate::Result;

/// Durable record of every job's lifecycle, independent of the transport.
#[async_trait]
pub trait JobHistoryStore: Send + Sync {
    /// Create a `pending` record and return its id. Called by the enqueue
    /// gateway before the job becomes visible to any worker.
    async fn create(&self, job_type: JobType) -> Result<Uuid>;

    /// Transition to `processing`. Idempotent on retry: repeated calls for
    /// the same id only refresh `started_at` and never error, unless the
    /// record is already terminal.
    async fn mark_processing(&self, history_id: Uuid) -> Result<()>;

    /// Record the terminal `completed` status. Write-once: fails with
    /// [`crate::Error::TerminalState`] if the record is already terminal.
    async fn mark_completed(&self, history_id: Uuid) -> Result<()>;

    /// Record the terminal `failed` status with the handler's error message.
    /// Write-once, like [`Self::mark_completed`].
    async fn mark_failed(&self, history_id: Uuid, error_message: &str) -> Result<()>;

    /// Fetch a single record.
    async fn get(&self, history_id: Uuid) -> Result<Option<JobHistoryRecord>>;

    /// List records still awaiting or undergoing execution, newest first.
    async fn list_pending(&self, page: i64, limit: i64) -> Result<Vec<JobHistoryRecord>>;

    /// List terminal records, newest first.
    async fn list_executed(&self, page: i64, limit: i64) -> Result<Vec<JobHistoryRecord>>;

    /// Aggregate counts by status.
    async fn stats(&self) -> Result<HistoryStats>;

    /// Remove terminal records beyond the retention policy. Returns the
    /// number of records deleted. Non-terminal records are never removed.
    async fn cleanup(&self, policy: &RetentionPolicy) -> Result<i64>;
}

/// Queue transport: durable push, claim-one, ack/fail bookkeeping.
#[async_trait]
pub trait JobTransport: Send + Sync {
    /// Durably enqueue an envelope onto the named queue. Returns the job id.
    /// Errors propagate to the producer (enqueue must fail loudly).
    async fn push(
        &self,
        queue: QueueName,
        job_type: JobType,
        envelope: &JobEnvelope,
        max_attempts: i32,
    ) -> Result<Uuid>;

    /// Claim the next due job on the queue, if any. Claiming increments
    /// `attempts_made` and marks the job running; concurrent claimers never
    /// receive the same job.
    async fn claim(&self, queue: QueueName) -> Result<Option<Job>>;

    /// Acknowledge successful execution. The job is removed from the
    /// transport (history keeps the audit trail).
    async fn complete(&self, job_id: Uuid) -> Result<()>;

    /// Report a transient failure. Reschedules the job `retry_delay` from
    /// now while attempts remain, otherwise parks it in the failed bucket.
    async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        retry_delay: Duration,
    ) -> Result<FailOutcome>;

    /// Park a job immediately, bypassing the retry budget. Used for
    /// permanent failures (malformed payload, unregistered job type).
    async fn park(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Requeue running jobs older than `older_than` (liveness check).
    /// Jobs with no attempts left are parked and returned for history
    /// bookkeeping.
    async fn recover_stalled(&self, older_than: Duration) -> Result<StalledSweep>;

    /// Fail every running job on the queue with the given error, returning
    /// the interrupted jobs. Used by shutdown after the drain timeout.
    async fn interrupt_running(&self, queue: QueueName, error: &str) -> Result<Vec<Job>>;

    /// Number of jobs waiting on the queue.
    async fn pending_count(&self, queue: QueueName) -> Result<i64>;
}

/// Catalog content reads used by the dedup engine, plus the embedding
/// write performed by the embedding job handler. The engine itself only
/// ever reads.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// All stored course embeddings for a tenant.
    async fn course_embeddings(&self, tenant_id: Uuid) -> Result<Vec<CourseEmbedding>>;

    /// Distinct-course usage for the given video ids within a tenant.
    async fn video_usage(&self, tenant_id: Uuid, video_ids: &[Uuid]) -> Result<Vec<ContentUsage>>;

    /// Distinct-course usage for the given module ids within a tenant.
    async fn module_usage(&self, tenant_id: Uuid, module_ids: &[Uuid])
        -> Result<Vec<ContentUsage>>;

    /// Upsert the embedding for a course. Safe to run twice with the same
    /// vector (redelivery).
    async fn store_course_embedding(
        &self,
        tenant_id: Uuid,
        course_id: Uuid,
        embedding: &[f32],
    ) -> Result<()>;
}

/// Tenant+user to payment-provider customer mapping.
#[async_trait]
pub trait BillingRepository: Send + Sync {
    /// Existing customer reference for the pair, if any.
    async fn find_customer(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Option<String>>;

    /// Record a mapping. Returns false if a mapping already existed
    /// (conflict-ignoring insert), which keeps the handler idempotent.
    async fn record_customer(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        customer_ref: &str,
    ) -> Result<bool>;
}

/// AI conversation message persistence.
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Insert messages, ignoring ids already stored. Returns the number of
    /// rows actually inserted.
    async fn save_messages(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        messages: &[ChatMessage],
    ) -> Result<u64>;
}
