//! Job history store implementation.
//!
//! History is the durable audit trail: a record is written before the job
//! is visible to any worker, and terminal statuses are write-once. The
//! transport's retry bookkeeping never touches these rows; history records
//! the eventual outcome only.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use lerno_core::{
    new_v7, Error, HistoryStats, JobHistoryRecord, JobHistoryStore, JobStatus, JobType,
    RetentionPolicy, Result,
};

/// PostgreSQL implementation of [`JobHistoryStore`].
#[derive(Clone)]
pub struct PgJobHistoryStore {
    pool: PgPool,
}

impl PgJobHistoryStore {
    /// Create a new store over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Convert JobStatus to string for the database.
    fn status_to_str(status: JobStatus) -> &'static str {
        match status {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Convert a database string to JobStatus.
    fn str_to_status(s: &str) -> JobStatus {
        match s {
            "pending" => JobStatus::Pending,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Pending, // fallback
        }
    }

    fn parse_row(row: sqlx::postgres::PgRow) -> JobHistoryRecord {
        let job_type: String = row.get("job_type");
        let status: String = row.get("status");
        JobHistoryRecord {
            id: row.get("id"),
            // Unknown strings cannot appear: the column is only ever written
            // from JobType::as_str.
            job_type: JobType::parse(&job_type).unwrap_or(JobType::SendWelcomeEmail),
            status: Self::str_to_status(&status),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            error_message: row.get("error_message"),
        }
    }
}

const RECORD_COLUMNS: &str =
    "id, job_type, status, created_at, started_at, completed_at, error_message";

#[async_trait]
impl JobHistoryStore for PgJobHistoryStore {
    async fn create(&self, job_type: JobType) -> Result<Uuid> {
        let history_id = new_v7();
        sqlx::query(
            "INSERT INTO job_history (id, job_type, status, created_at)
             VALUES ($1, $2, 'pending', $3)",
        )
        .bind(history_id)
        .bind(job_type.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(history_id)
    }

    async fn mark_processing(&self, history_id: Uuid) -> Result<()> {
        // Idempotent on retry: redelivery re-marks the same record and only
        // refreshes started_at. Terminal records are left untouched.
        let result = sqlx::query(
            "UPDATE job_history
             SET status = 'processing', started_at = $1
             WHERE id = $2 AND status NOT IN ('completed', 'failed')",
        )
        .bind(Utc::now())
        .bind(history_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            // Either missing or already terminal; distinguish for the caller.
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM job_history WHERE id = $1)")
                    .bind(history_id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(Error::Database)?;
            if exists {
                return Err(Error::TerminalState(history_id));
            }
            return Err(Error::History(format!("record {history_id} not found")));
        }
        Ok(())
    }

    async fn mark_completed(&self, history_id: Uuid) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE job_history
             SET status = 'completed', completed_at = $1,
                 started_at = COALESCE(started_at, $1)
             WHERE id = $2 AND status NOT IN ('completed', 'failed')",
        )
        .bind(now)
        .bind(history_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::TerminalState(history_id));
        }
        Ok(())
    }

    async fn mark_failed(&self, history_id: Uuid, error_message: &str) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE job_history
             SET status = 'failed', completed_at = $1, error_message = $2,
                 started_at = COALESCE(started_at, $1)
             WHERE id = $3 AND status NOT IN ('completed', 'failed')",
        )
        .bind(now)
        .bind(error_message)
        .bind(history_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::TerminalState(history_id));
        }
        Ok(())
    }

    async fn get(&self, history_id: Uuid) -> Result<Option<JobHistoryRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM job_history WHERE id = $1"
        ))
        .bind(history_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_row))
    }

    async fn list_pending(&self, page: i64, limit: i64) -> Result<Vec<JobHistoryRecord>> {
        let offset = page.max(0) * limit;
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM job_history
             WHERE status IN ('pending', 'processing')
             ORDER BY id DESC
             LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_row).collect())
    }

    async fn list_executed(&self, page: i64, limit: i64) -> Result<Vec<JobHistoryRecord>> {
        let offset = page.max(0) * limit;
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM job_history
             WHERE status IN ('completed', 'failed')
             ORDER BY id DESC
             LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_row).collect())
    }

    async fn stats(&self) -> Result<HistoryStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed
             FROM job_history",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(HistoryStats {
            total: row.get::<i64, _>("total"),
            pending: row.get::<i64, _>("pending"),
            processing: row.get::<i64, _>("processing"),
            completed: row.get::<i64, _>("completed"),
            failed: row.get::<i64, _>("failed"),
        })
    }

    async fn cleanup(&self, policy: &RetentionPolicy) -> Result<i64> {
        // ids are UUIDv7, so `ORDER BY id DESC` is newest-first without
        // touching completed_at.
        let result = sqlx::query(
            "DELETE FROM job_history
             WHERE (status = 'completed' AND id NOT IN (
                        SELECT id FROM job_history
                        WHERE status = 'completed'
                        ORDER BY id DESC LIMIT $1))
                OR (status = 'failed' AND id NOT IN (
                        SELECT id FROM job_history
                        WHERE status = 'failed'
                        ORDER BY id DESC LIMIT $2))",
        )
        .bind(policy.completed_count)
        .bind(policy.failed_count)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let s = PgJobHistoryStore::status_to_str(status);
            assert_eq!(PgJobHistoryStore::str_to_status(s), status);
        }
    }

    #[test]
    fn test_str_to_status_unknown_fallback() {
        assert_eq!(
            PgJobHistoryStore::str_to_status("cancelled"),
            JobStatus::Pending
        );
        assert_eq!(PgJobHistoryStore::str_to_status(""), JobStatus::Pending);
    }

    #[test]
    fn test_status_strings_are_unique() {
        let mut strings = vec![
            PgJobHistoryStore::status_to_str(JobStatus::Pending),
            PgJobHistoryStore::status_to_str(JobStatus::Processing),
            PgJobHistoryStore::status_to_str(JobStatus::Completed),
            PgJobHistoryStore::status_to_str(JobStatus::Failed),
        ];
        strings.sort();
        strings.dedup();
        assert_eq!(strings.len(), 4);
    }
}
