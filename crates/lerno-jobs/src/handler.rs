//! Job handler trait and execution context.

use async_trait::async_trait;
use uuid::Uuid;

use lerno_core::{Job, JobPayload, JobType};

/// Context provided to job handlers.
pub struct JobContext {
    /// The claimed job being processed.
    pub job: Job,
}

impl JobContext {
    /// Create a new job context.
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    /// The typed payload carried by the job's envelope.
    pub fn payload(&self) -> &JobPayload {
        &self.job.envelope.payload
    }

    /// The history record this job is correlated with.
    pub fn history_id(&self) -> Uuid {
        self.job.envelope.history_id
    }

    /// Delivery attempts so far, including this one.
    pub fn attempt(&self) -> i32 {
        self.job.attempts_made
    }

    /// Whether this is the job's final delivery attempt.
    pub fn is_last_attempt(&self) -> bool {
        self.job.attempts_made >= self.job.max_attempts
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed successfully.
    Success,
    /// Transient failure: redeliver with backoff while attempts remain.
    Retry(String),
    /// Permanent failure: park immediately, no retry.
    Failed(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    /// Check if this handler can process the given job type.
    fn can_handle(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }
}

/// No-op handler for testing.
pub struct NoOpHandler {
    job_type: JobType,
}

impl NoOpHandler {
    /// Create a new no-op handler for the given job type.
    pub fn new(job_type: JobType) -> Self {
        Self { job_type }
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        JobResult::Success
    }
}
