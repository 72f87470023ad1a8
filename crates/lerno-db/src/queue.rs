//! Queue transport implementation.
//!
//! Jobs live in `queue_jobs`, one row per job. Claiming uses
//! `FOR UPDATE SKIP LOCKED` so concurrent consumers never receive the same
//! job, and retry backoff is encoded in `run_at`. Completed jobs are
//! deleted on ack; jobs whose attempt budget is spent are parked as
//! `failed` rows for manual inspection.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use lerno_core::{
    new_v7, Error, FailOutcome, Job, JobEnvelope, JobTransport, JobType, QueueName, Result,
    StalledSweep,
};

/// PostgreSQL implementation of [`JobTransport`].
#[derive(Clone)]
pub struct PgJobTransport {
    pool: PgPool,
}

const JOB_COLUMNS: &str =
    "id, queue, job_type, envelope, attempts_made, max_attempts, created_at, started_at";

impl PgJobTransport {
    /// Create a new transport over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<Job> {
        let queue: String = row.get("queue");
        let job_type: String = row.get("job_type");
        let envelope: JsonValue = row.get("envelope");

        Ok(Job {
            id: row.get("id"),
            queue: QueueName::parse(&queue)
                .ok_or_else(|| Error::Queue(format!("unknown queue in row: {queue}")))?,
            job_type: JobType::parse(&job_type)
                .ok_or_else(|| Error::Queue(format!("unknown job type in row: {job_type}")))?,
            envelope: serde_json::from_value::<JobEnvelope>(envelope)?,
            attempts_made: row.get("attempts_made"),
            max_attempts: row.get("max_attempts"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
        })
    }
}

#[async_trait]
impl JobTransport for PgJobTransport {
    async fn push(
        &self,
        queue: QueueName,
        job_type: JobType,
        envelope: &JobEnvelope,
        max_attempts: i32,
    ) -> Result<Uuid> {
        let job_id = new_v7();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO queue_jobs
                 (id, queue, job_type, envelope, status, max_attempts, run_at, created_at)
             VALUES ($1, $2, $3, $4, 'pending', $5, $6, $6)",
        )
        .bind(job_id)
        .bind(queue.as_str())
        .bind(job_type.as_str())
        .bind(serde_json::to_value(envelope)?)
        .bind(max_attempts)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "transport",
            op = "push",
            job_id = %job_id,
            queue = %queue,
            job_type = %job_type,
            "Job queued"
        );
        Ok(job_id)
    }

    async fn claim(&self, queue: QueueName) -> Result<Option<Job>> {
        let now = Utc::now();

        // Filter before locking; SKIP LOCKED keeps concurrent consumers off
        // each other's rows. run_at gates backoff-delayed retries.
        let row = sqlx::query(&format!(
            "UPDATE queue_jobs
             SET status = 'running', started_at = $1, attempts_made = attempts_made + 1
             WHERE id = (
                 SELECT id FROM queue_jobs
                 WHERE status = 'pending' AND queue = $2 AND run_at <= $1
                 ORDER BY id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(now)
        .bind(queue.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM queue_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str, retry_delay: Duration) -> Result<FailOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let (attempts_made, max_attempts): (i32, i32) =
            sqlx::query_as("SELECT attempts_made, max_attempts FROM queue_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(Error::Database)?;

        let outcome = if attempts_made < max_attempts {
            let run_at = now + retry_delay;
            sqlx::query(
                "UPDATE queue_jobs
                 SET status = 'pending', run_at = $1, error_message = $2, started_at = NULL
                 WHERE id = $3",
            )
            .bind(run_at)
            .bind(error)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            FailOutcome::Retried { run_at }
        } else {
            sqlx::query(
                "UPDATE queue_jobs SET status = 'failed', error_message = $1 WHERE id = $2",
            )
            .bind(error)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            FailOutcome::Dead
        };

        tx.commit().await.map_err(Error::Database)?;
        Ok(outcome)
    }

    async fn park(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query("UPDATE queue_jobs SET status = 'failed', error_message = $1 WHERE id = $2")
            .bind(error)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn recover_stalled(&self, older_than: Duration) -> Result<StalledSweep> {
        let cutoff = Utc::now() - older_than;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Attempts permitting, a stalled job goes back to pending for
        // immediate redelivery.
        let requeued: Vec<Uuid> = sqlx::query_scalar(
            "UPDATE queue_jobs
             SET status = 'pending', started_at = NULL, run_at = $1
             WHERE status = 'running' AND started_at < $2 AND attempts_made < max_attempts
             RETURNING id",
        )
        .bind(Utc::now())
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let parked_rows = sqlx::query(&format!(
            "UPDATE queue_jobs
             SET status = 'failed', error_message = 'stalled: exceeded liveness threshold'
             WHERE status = 'running' AND started_at < $1 AND attempts_made >= max_attempts
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        let parked = parked_rows
            .into_iter()
            .map(Self::parse_job_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(StalledSweep { requeued, parked })
    }

    async fn interrupt_running(&self, queue: QueueName, error: &str) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "UPDATE queue_jobs
             SET status = 'failed', error_message = $1
             WHERE status = 'running' AND queue = $2
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(error)
        .bind(queue.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn pending_count(&self, queue: QueueName) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_jobs WHERE status = 'pending' AND queue = $1",
        )
        .bind(queue.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }
}
