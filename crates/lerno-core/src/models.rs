//! Shared data model for the job pipeline and the dedup engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// QUEUES
// =============================================================================

/// Named queue a job is routed to.
///
/// The set is closed: every job type maps to exactly one queue, and every
/// queue gets its own worker pool with an independent concurrency budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    /// Outbound user notifications (welcome emails, digests).
    Notifications,
    /// Payment-provider customer synchronization.
    PaymentSync,
    /// Catalog content embedding computation.
    Embeddings,
    /// AI conversation persistence.
    ChatPersistence,
    /// Thumbnail and media derivative generation.
    Media,
}

impl QueueName {
    /// Every queue, in startup order.
    pub const ALL: [QueueName; 5] = [
        QueueName::Notifications,
        QueueName::PaymentSync,
        QueueName::Embeddings,
        QueueName::ChatPersistence,
        QueueName::Media,
    ];

    /// Stable string form used in the database and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Notifications => "notifications",
            QueueName::PaymentSync => "payment-sync",
            QueueName::Embeddings => "embeddings",
            QueueName::ChatPersistence => "chat-persistence",
            QueueName::Media => "media",
        }
    }

    /// Parse the stable string form back into a queue name.
    pub fn parse(s: &str) -> Option<QueueName> {
        match s {
            "notifications" => Some(QueueName::Notifications),
            "payment-sync" => Some(QueueName::PaymentSync),
            "embeddings" => Some(QueueName::Embeddings),
            "chat-persistence" => Some(QueueName::ChatPersistence),
            "media" => Some(QueueName::Media),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// JOB TYPES AND PAYLOADS
// =============================================================================

/// Type of job to process.
///
/// Closed enum: adding a job type means adding a payload variant, a queue
/// mapping, and a handler, all checked at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Send the post-signup welcome email.
    SendWelcomeEmail,
    /// Create (or verify) the payment-provider customer for a tenant user.
    CreateConnectedCustomer,
    /// Compute and persist the embedding for a catalog course.
    GenerateCourseEmbedding,
    /// Persist a batch of AI-assistant chat messages.
    SaveAiMessages,
    /// Render a video thumbnail.
    GenerateThumbnail,
}

impl JobType {
    /// Every job type. Handler registries are validated against this list.
    pub const ALL: [JobType; 5] = [
        JobType::SendWelcomeEmail,
        JobType::CreateConnectedCustomer,
        JobType::GenerateCourseEmbedding,
        JobType::SaveAiMessages,
        JobType::GenerateThumbnail,
    ];

    /// The queue this job type is routed to.
    pub fn queue(&self) -> QueueName {
        match self {
            JobType::SendWelcomeEmail => QueueName::Notifications,
            JobType::CreateConnectedCustomer => QueueName::PaymentSync,
            JobType::GenerateCourseEmbedding => QueueName::Embeddings,
            JobType::SaveAiMessages => QueueName::ChatPersistence,
            JobType::GenerateThumbnail => QueueName::Media,
        }
    }

    /// Stable string form used in the database and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::SendWelcomeEmail => "send_welcome_email",
            JobType::CreateConnectedCustomer => "create_connected_customer",
            JobType::GenerateCourseEmbedding => "generate_course_embedding",
            JobType::SaveAiMessages => "save_ai_messages",
            JobType::GenerateThumbnail => "generate_thumbnail",
        }
    }

    /// Parse the stable string form back into a job type.
    pub fn parse(s: &str) -> Option<JobType> {
        match s {
            "send_welcome_email" => Some(JobType::SendWelcomeEmail),
            "create_connected_customer" => Some(JobType::CreateConnectedCustomer),
            "generate_course_embedding" => Some(JobType::GenerateCourseEmbedding),
            "save_ai_messages" => Some(JobType::SaveAiMessages),
            "generate_thumbnail" => Some(JobType::GenerateThumbnail),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload for [`JobType::SendWelcomeEmail`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendWelcomeEmailPayload {
    pub email: String,
    pub user_name: String,
}

/// Payload for [`JobType::CreateConnectedCustomer`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateConnectedCustomerPayload {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub email: String,
}

/// Payload for [`JobType::GenerateCourseEmbedding`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerateCourseEmbeddingPayload {
    pub tenant_id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub description: String,
}

/// A single AI conversation message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Message id, assigned by the producer. Redelivery reuses the same id,
    /// which is what makes persistence conflict-ignorable.
    pub id: Uuid,
    pub role: String,
    pub content: String,
}

/// Payload for [`JobType::SaveAiMessages`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaveAiMessagesPayload {
    pub tenant_id: Uuid,
    pub conversation_id: Uuid,
    pub messages: Vec<ChatMessage>,
}

/// Payload for [`JobType::GenerateThumbnail`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerateThumbnailPayload {
    pub tenant_id: Uuid,
    pub video_id: Uuid,
    pub source_url: String,
}

/// Typed job payload: one variant per job type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum JobPayload {
    SendWelcomeEmail(SendWelcomeEmailPayload),
    CreateConnectedCustomer(CreateConnectedCustomerPayload),
    GenerateCourseEmbedding(GenerateCourseEmbeddingPayload),
    SaveAiMessages(SaveAiMessagesPayload),
    GenerateThumbnail(GenerateThumbnailPayload),
}

impl JobPayload {
    /// The job type this payload belongs to.
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::SendWelcomeEmail(_) => JobType::SendWelcomeEmail,
            JobPayload::CreateConnectedCustomer(_) => JobType::CreateConnectedCustomer,
            JobPayload::GenerateCourseEmbedding(_) => JobType::GenerateCourseEmbedding,
            JobPayload::SaveAiMessages(_) => JobType::SaveAiMessages,
            JobPayload::GenerateThumbnail(_) => JobType::GenerateThumbnail,
        }
    }

    /// The queue this payload is routed to.
    pub fn queue(&self) -> QueueName {
        self.job_type().queue()
    }
}

/// Envelope pushed onto the queue transport: the typed payload plus the
/// history record it is correlated with. Correlation is 1:1 and established
/// at enqueue time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEnvelope {
    pub history_id: Uuid,
    pub payload: JobPayload,
}

// =============================================================================
// JOBS AND HISTORY
// =============================================================================

/// Lifecycle status shared by queue jobs and history records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal statuses are write-once on history records.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A claimed unit of work. Transport-owned and ephemeral: completed jobs are
/// deleted on ack, exhausted jobs are parked in the failed bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue: QueueName,
    pub job_type: JobType,
    pub envelope: JobEnvelope,
    /// Delivery attempts so far, including the current one (1-based once claimed).
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Durable audit record of a job's lifecycle, decoupled from the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHistoryRecord {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Aggregate history counts for the operator dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

/// How many terminal history records `cleanup` keeps, most recent first.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub completed_count: i64,
    pub failed_count: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed_count: crate::defaults::RETAIN_COMPLETED,
            failed_count: crate::defaults::RETAIN_FAILED,
        }
    }
}

/// Outcome of reporting a transient failure to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// Attempts remain: the job was rescheduled for redelivery.
    Retried { run_at: DateTime<Utc> },
    /// Attempt budget exhausted: the job was parked in the failed bucket.
    Dead,
}

/// Result of a stalled-job sweep.
#[derive(Debug, Default)]
pub struct StalledSweep {
    /// Jobs requeued for another delivery attempt.
    pub requeued: Vec<Uuid>,
    /// Jobs whose attempt budget was already spent and were parked.
    pub parked: Vec<Job>,
}

// =============================================================================
// SIMILARITY / SATURATION
// =============================================================================

/// A catalog course scoring above the similarity warning threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarCourse {
    pub id: Uuid,
    pub title: String,
    /// Cosine similarity in [0, 1].
    pub similarity: f32,
    /// Publication status of the existing course ("draft", "published", ...).
    pub status: String,
}

/// Reuse of a single video or module across a tenant's catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSaturation {
    pub id: Uuid,
    pub title: String,
    /// Number of distinct courses the content already appears in.
    pub used_in_courses: i64,
    pub course_names: Vec<String>,
}

/// Advisory output of the similarity & saturation engine.
///
/// Field names follow the tool contract consumed by the AI harness, hence
/// the camelCase serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityResult {
    pub similar_courses: Vec<SimilarCourse>,
    pub video_saturation: Vec<ContentSaturation>,
    pub module_saturation: Vec<ContentSaturation>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    /// Always true: the engine is advisory and never blocks creation.
    pub can_proceed: bool,
}

impl SimilarityResult {
    /// An empty, proceedable result (no catalog matches, no saturation).
    pub fn empty() -> Self {
        Self {
            similar_courses: Vec::new(),
            video_saturation: Vec::new(),
            module_saturation: Vec::new(),
            warnings: Vec::new(),
            suggestions: Vec::new(),
            can_proceed: true,
        }
    }
}

// =============================================================================
// CATALOG READ MODELS
// =============================================================================

/// A stored course embedding row, scoped to one tenant.
#[derive(Debug, Clone)]
pub struct CourseEmbedding {
    pub id: Uuid,
    pub title: String,
    pub status: String,
    pub embedding: Vec<f32>,
}

/// Distinct-course usage of one video or module.
#[derive(Debug, Clone)]
pub struct ContentUsage {
    pub id: Uuid,
    pub title: String,
    pub course_names: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_name_round_trip() {
        for queue in QueueName::ALL {
            assert_eq!(QueueName::parse(queue.as_str()), Some(queue));
        }
    }

    #[test]
    fn test_queue_name_parse_unknown() {
        assert_eq!(QueueName::parse("dead-letters"), None);
        assert_eq!(QueueName::parse(""), None);
    }

    #[test]
    fn test_job_type_round_trip() {
        for job_type in JobType::ALL {
            assert_eq!(JobType::parse(job_type.as_str()), Some(job_type));
        }
    }

    #[test]
    fn test_job_type_strings_are_unique() {
        let mut strings: Vec<&str> = JobType::ALL.iter().map(|t| t.as_str()).collect();
        strings.sort();
        strings.dedup();
        assert_eq!(strings.len(), JobType::ALL.len());
    }

    #[test]
    fn test_every_job_type_has_a_queue() {
        assert_eq!(JobType::SendWelcomeEmail.queue(), QueueName::Notifications);
        assert_eq!(
            JobType::CreateConnectedCustomer.queue(),
            QueueName::PaymentSync
        );
        assert_eq!(JobType::GenerateCourseEmbedding.queue(), QueueName::Embeddings);
        assert_eq!(JobType::SaveAiMessages.queue(), QueueName::ChatPersistence);
        assert_eq!(JobType::GenerateThumbnail.queue(), QueueName::Media);
    }

    #[test]
    fn test_payload_job_type_and_queue_agree() {
        let payload = JobPayload::SendWelcomeEmail(SendWelcomeEmailPayload {
            email: "a@x.com".into(),
            user_name: "A".into(),
        });
        assert_eq!(payload.job_type(), JobType::SendWelcomeEmail);
        assert_eq!(payload.queue(), payload.job_type().queue());
    }

    #[test]
    fn test_envelope_serde_round_trip() {
        let envelope = JobEnvelope {
            history_id: Uuid::new_v4(),
            payload: JobPayload::CreateConnectedCustomer(CreateConnectedCustomerPayload {
                tenant_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                email: "b@y.org".into(),
            }),
        };

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["payload"]["type"], "create_connected_customer");

        let back: JobEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_similarity_result_serializes_camel_case() {
        let result = SimilarityResult::empty();
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("similarCourses").is_some());
        assert!(json.get("videoSaturation").is_some());
        assert!(json.get("moduleSaturation").is_some());
        assert_eq!(json["canProceed"], true);
    }

    #[test]
    fn test_retention_policy_default() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.completed_count, crate::defaults::RETAIN_COMPLETED);
        assert_eq!(policy.failed_count, crate::defaults::RETAIN_FAILED);
    }
}
