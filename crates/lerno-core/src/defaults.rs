//! Centralized default constants for the lerno pipeline.
//!
//! All crates reference these constants instead of defining their own
//! magic numbers.

// =============================================================================
// WORKER
// =============================================================================

/// Polling interval in milliseconds when a queue is empty.
pub const POLL_INTERVAL_MS: u64 = 500;

/// Hard wall-clock timeout for a single job execution.
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// How long the lifecycle controller waits for in-flight jobs on shutdown
/// before explicitly failing them.
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// A running job older than this is considered stalled and swept back
/// into the queue (or parked if its attempts are spent).
pub const STALLED_AFTER_SECS: u64 = 600;

/// Interval between stalled-job sweeps.
pub const STALLED_SWEEP_INTERVAL_SECS: u64 = 60;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// BACKOFF
// =============================================================================

/// Cap applied to exponential backoff delays.
pub const BACKOFF_MAX_DELAY_MS: i64 = 60_000;

// =============================================================================
// HISTORY
// =============================================================================

/// Default page size for history listing endpoints.
pub const HISTORY_PAGE_LIMIT: i64 = 50;

/// Completed records retained by `cleanup` (most recent first).
pub const RETAIN_COMPLETED: i64 = 1_000;

/// Failed records retained by `cleanup` (most recent first).
pub const RETAIN_FAILED: i64 = 5_000;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding model for the HTTP backend.
pub const EMBED_MODEL: &str = "text-embedding-3-small";

/// Default embedding vector dimension.
pub const EMBED_DIMENSION: usize = 1536;

/// HTTP timeout for a single embedding request.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// SIMILARITY / SATURATION
// =============================================================================

/// Cosine similarity above which a "related content" warning is raised.
pub const SIMILARITY_WARN: f32 = 0.75;

/// Cosine similarity above which the warning escalates to "near-duplicate".
pub const SIMILARITY_HIGH: f32 = 0.85;

/// Maximum number of similar courses reported per analysis.
pub const SIMILAR_COURSES_CAP: usize = 5;

/// Distinct-course usage count at which content is flagged as saturated.
pub const SATURATION_WARN: i64 = 3;

/// Distinct-course usage count at which the saturation remediation escalates.
pub const SATURATION_HIGH: i64 = 5;
