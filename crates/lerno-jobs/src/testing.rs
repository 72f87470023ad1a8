//! In-memory transport and history fakes for pipeline tests.
//!
//! These mirror the Postgres-backed behavior closely enough to exercise the
//! worker, gateway, and lifecycle logic without a database: claim is
//! exclusive, `run_at` gates redelivery, terminal history writes are
//! write-once.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use lerno_core::{
    uuid_utils, Error, FailOutcome, HistoryStats, Job, JobEnvelope, JobHistoryRecord,
    JobHistoryStore, JobPayload, JobStatus, JobTransport, JobType, QueueName, Result,
    RetentionPolicy, StalledSweep,
};

/// A claimed-looking job for handler unit tests (attempt 1 of 3).
pub fn job_fixture(payload: JobPayload) -> Job {
    let job_type = payload.job_type();
    Job {
        id: uuid_utils::new_v7(),
        queue: job_type.queue(),
        job_type,
        envelope: JobEnvelope {
            history_id: uuid_utils::new_v7(),
            payload,
        },
        attempts_made: 1,
        max_attempts: 3,
        created_at: Utc::now(),
        started_at: Some(Utc::now()),
    }
}

#[derive(Clone)]
struct StoredJob {
    job: Job,
    status: JobStatus,
    run_at: DateTime<Utc>,
    error: Option<String>,
}

/// In-memory [`JobTransport`].
#[derive(Default)]
pub struct InMemoryTransport {
    jobs: Mutex<Vec<StoredJob>>,
    push_failure: Option<String>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every push fail with the given message.
    pub fn with_push_failure(mut self, message: impl Into<String>) -> Self {
        self.push_failure = Some(message.into());
        self
    }

    /// Jobs parked in the failed bucket, for assertions.
    pub fn parked(&self) -> Vec<(Job, String)> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.status == JobStatus::Failed)
            .map(|s| (s.job.clone(), s.error.clone().unwrap_or_default()))
            .collect()
    }

    /// The scheduled delivery time of a pending job, for backoff assertions.
    pub fn run_at(&self, job_id: Uuid) -> Option<DateTime<Utc>> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.job.id == job_id)
            .map(|s| s.run_at)
    }

    /// Force a pending job to be due immediately (skips backoff in tests).
    pub fn make_due(&self, job_id: Uuid) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(stored) = jobs.iter_mut().find(|s| s.job.id == job_id) {
            stored.run_at = Utc::now() - Duration::seconds(1);
        }
    }

    /// Total jobs still held by the transport, any status.
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobTransport for InMemoryTransport {
    async fn push(
        &self,
        queue: QueueName,
        job_type: JobType,
        envelope: &JobEnvelope,
        max_attempts: i32,
    ) -> Result<Uuid> {
        if let Some(message) = &self.push_failure {
            return Err(Error::Queue(message.clone()));
        }

        let job = Job {
            id: uuid_utils::new_v7(),
            queue,
            job_type,
            envelope: envelope.clone(),
            attempts_made: 0,
            max_attempts,
            created_at: Utc::now(),
            started_at: None,
        };
        let id = job.id;
        self.jobs.lock().unwrap().push(StoredJob {
            job,
            status: JobStatus::Pending,
            run_at: Utc::now(),
            error: None,
        });
        Ok(id)
    }

    async fn claim(&self, queue: QueueName) -> Result<Option<Job>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();

        let stored = jobs.iter_mut().find(|s| {
            s.status == JobStatus::Pending && s.job.queue == queue && s.run_at <= now
        });
        match stored {
            Some(stored) => {
                stored.status = JobStatus::Processing;
                stored.job.attempts_made += 1;
                stored.job.started_at = Some(now);
                Ok(Some(stored.job.clone()))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        self.jobs.lock().unwrap().retain(|s| s.job.id != job_id);
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str, retry_delay: Duration) -> Result<FailOutcome> {
        let mut jobs = self.jobs.lock().unwrap();
        let stored = jobs
            .iter_mut()
            .find(|s| s.job.id == job_id)
            .ok_or_else(|| Error::Queue(format!("Job {job_id} not found")))?;

        if stored.job.attempts_made < stored.job.max_attempts {
            let run_at = Utc::now() + retry_delay;
            stored.status = JobStatus::Pending;
            stored.run_at = run_at;
            stored.error = Some(error.to_string());
            stored.job.started_at = None;
            Ok(FailOutcome::Retried { run_at })
        } else {
            stored.status = JobStatus::Failed;
            stored.error = Some(error.to_string());
            Ok(FailOutcome::Dead)
        }
    }

    async fn park(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let stored = jobs
            .iter_mut()
            .find(|s| s.job.id == job_id)
            .ok_or_else(|| Error::Queue(format!("Job {job_id} not found")))?;
        stored.status = JobStatus::Failed;
        stored.error = Some(error.to_string());
        Ok(())
    }

    async fn recover_stalled(&self, older_than: Duration) -> Result<StalledSweep> {
        let cutoff = Utc::now() - older_than;
        let mut sweep = StalledSweep::default();
        let mut jobs = self.jobs.lock().unwrap();

        for stored in jobs.iter_mut() {
            if stored.status != JobStatus::Processing {
                continue;
            }
            let stalled = stored.job.started_at.map(|t| t < cutoff).unwrap_or(false);
            if !stalled {
                continue;
            }
            if stored.job.attempts_made < stored.job.max_attempts {
                stored.status = JobStatus::Pending;
                stored.run_at = Utc::now();
                stored.job.started_at = None;
                sweep.requeued.push(stored.job.id);
            } else {
                stored.status = JobStatus::Failed;
                stored.error = Some("stalled: exceeded liveness threshold".into());
                sweep.parked.push(stored.job.clone());
            }
        }
        Ok(sweep)
    }

    async fn interrupt_running(&self, queue: QueueName, error: &str) -> Result<Vec<Job>> {
        let mut interrupted = Vec::new();
        let mut jobs = self.jobs.lock().unwrap();
        for stored in jobs.iter_mut() {
            if stored.status == JobStatus::Processing && stored.job.queue == queue {
                stored.status = JobStatus::Failed;
                stored.error = Some(error.to_string());
                interrupted.push(stored.job.clone());
            }
        }
        Ok(interrupted)
    }

    async fn pending_count(&self, queue: QueueName) -> Result<i64> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter()
            .filter(|s| s.status == JobStatus::Pending && s.job.queue == queue)
            .count() as i64)
    }
}

/// In-memory [`JobHistoryStore`].
#[derive(Default)]
pub struct InMemoryHistory {
    records: Mutex<HashMap<Uuid, JobHistoryRecord>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobHistoryStore for InMemoryHistory {
    async fn create(&self, job_type: JobType) -> Result<Uuid> {
        let id = uuid_utils::new_v7();
        self.records.lock().unwrap().insert(
            id,
            JobHistoryRecord {
                id,
                job_type,
                status: JobStatus::Pending,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                error_message: None,
            },
        );
        Ok(id)
    }

    async fn mark_processing(&self, history_id: Uuid) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&history_id)
            .ok_or_else(|| Error::History(format!("History record {history_id} not found")))?;
        if record.status.is_terminal() {
            return Err(Error::TerminalState(history_id));
        }
        record.status = JobStatus::Processing;
        record.started_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_completed(&self, history_id: Uuid) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&history_id)
            .ok_or_else(|| Error::History(format!("History record {history_id} not found")))?;
        if record.status.is_terminal() {
            return Err(Error::TerminalState(history_id));
        }
        record.status = JobStatus::Completed;
        record.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, history_id: Uuid, error_message: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&history_id)
            .ok_or_else(|| Error::History(format!("History record {history_id} not found")))?;
        if record.status.is_terminal() {
            return Err(Error::TerminalState(history_id));
        }
        record.status = JobStatus::Failed;
        record.completed_at = Some(Utc::now());
        record.error_message = Some(error_message.to_string());
        Ok(())
    }

    async fn get(&self, history_id: Uuid) -> Result<Option<JobHistoryRecord>> {
        Ok(self.records.lock().unwrap().get(&history_id).cloned())
    }

    async fn list_pending(&self, page: i64, limit: i64) -> Result<Vec<JobHistoryRecord>> {
        Ok(self.list(page, limit, |s| !s.is_terminal()))
    }

    async fn list_executed(&self, page: i64, limit: i64) -> Result<Vec<JobHistoryRecord>> {
        Ok(self.list(page, limit, |s| s.is_terminal()))
    }

    async fn stats(&self) -> Result<HistoryStats> {
        let records = self.records.lock().unwrap();
        let count = |status: JobStatus| records.values().filter(|r| r.status == status).count() as i64;
        Ok(HistoryStats {
            total: records.len() as i64,
            pending: count(JobStatus::Pending),
            processing: count(JobStatus::Processing),
            completed: count(JobStatus::Completed),
            failed: count(JobStatus::Failed),
        })
    }

    async fn cleanup(&self, policy: &RetentionPolicy) -> Result<i64> {
        let mut removed = 0;
        let mut records = self.records.lock().unwrap();
        for (status, keep) in [
            (JobStatus::Completed, policy.completed_count),
            (JobStatus::Failed, policy.failed_count),
        ] {
            let mut ids: Vec<Uuid> = records
                .values()
                .filter(|r| r.status == status)
                .map(|r| r.id)
                .collect();
            // UUIDv7 ids sort chronologically; newest last.
            ids.sort();
            let excess = ids.len().saturating_sub(keep.max(0) as usize);
            for id in ids.into_iter().take(excess) {
                records.remove(&id);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl InMemoryHistory {
    fn list(&self, page: i64, limit: i64, filter: fn(JobStatus) -> bool) -> Vec<JobHistoryRecord> {
        let records = self.records.lock().unwrap();
        let mut matching: Vec<JobHistoryRecord> = records
            .values()
            .filter(|r| filter(r.status))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.id.cmp(&a.id));
        matching
            .into_iter()
            .skip((page.max(0) * limit.max(0)) as usize)
            .take(limit.max(0) as usize)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lerno_core::SendWelcomeEmailPayload;

    fn envelope() -> JobEnvelope {
        JobEnvelope {
            history_id: uuid_utils::new_v7(),
            payload: JobPayload::SendWelcomeEmail(SendWelcomeEmailPayload {
                email: "ada@example.com".into(),
                user_name: "Ada".into(),
            }),
        }
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let transport = InMemoryTransport::new();
        transport
            .push(QueueName::Notifications, JobType::SendWelcomeEmail, &envelope(), 3)
            .await
            .unwrap();

        let first = transport.claim(QueueName::Notifications).await.unwrap();
        let second = transport.claim(QueueName::Notifications).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_claim_increments_attempts() {
        let transport = InMemoryTransport::new();
        transport
            .push(QueueName::Notifications, JobType::SendWelcomeEmail, &envelope(), 3)
            .await
            .unwrap();

        let job = transport.claim(QueueName::Notifications).await.unwrap().unwrap();
        assert_eq!(job.attempts_made, 1);
    }

    #[tokio::test]
    async fn test_fail_respects_backoff_delay() {
        let transport = InMemoryTransport::new();
        transport
            .push(QueueName::Notifications, JobType::SendWelcomeEmail, &envelope(), 3)
            .await
            .unwrap();
        let job = transport.claim(QueueName::Notifications).await.unwrap().unwrap();

        let outcome = transport
            .fail(job.id, "smtp timeout", Duration::seconds(60))
            .await
            .unwrap();
        assert!(matches!(outcome, FailOutcome::Retried { .. }));

        // Not due yet; claim must skip it.
        assert!(transport.claim(QueueName::Notifications).await.unwrap().is_none());

        transport.make_due(job.id);
        let redelivered = transport.claim(QueueName::Notifications).await.unwrap().unwrap();
        assert_eq!(redelivered.attempts_made, 2);
    }

    #[tokio::test]
    async fn test_fail_parks_after_budget_exhausted() {
        let transport = InMemoryTransport::new();
        transport
            .push(QueueName::Notifications, JobType::SendWelcomeEmail, &envelope(), 1)
            .await
            .unwrap();
        let job = transport.claim(QueueName::Notifications).await.unwrap().unwrap();

        let outcome = transport
            .fail(job.id, "smtp down", Duration::zero())
            .await
            .unwrap();
        assert_eq!(outcome, FailOutcome::Dead);
        assert_eq!(transport.parked().len(), 1);
    }

    #[tokio::test]
    async fn test_history_terminal_is_write_once() {
        let history = InMemoryHistory::new();
        let id = history.create(JobType::SendWelcomeEmail).await.unwrap();

        history.mark_processing(id).await.unwrap();
        history.mark_completed(id).await.unwrap();

        let err = history.mark_failed(id, "too late").await.unwrap_err();
        assert!(matches!(err, Error::TerminalState(_)));

        let record = history.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn test_history_mark_processing_idempotent() {
        let history = InMemoryHistory::new();
        let id = history.create(JobType::SendWelcomeEmail).await.unwrap();

        history.mark_processing(id).await.unwrap();
        history.mark_processing(id).await.unwrap();

        let record = history.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_history_cleanup_keeps_most_recent() {
        let history = InMemoryHistory::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let id = history.create(JobType::SendWelcomeEmail).await.unwrap();
            history.mark_processing(id).await.unwrap();
            history.mark_completed(id).await.unwrap();
            ids.push(id);
        }

        let removed = history
            .cleanup(&RetentionPolicy {
                completed_count: 2,
                failed_count: 10,
            })
            .await
            .unwrap();
        assert_eq!(removed, 3);

        // The two newest survive.
        assert!(history.get(ids[3]).await.unwrap().is_some());
        assert!(history.get(ids[4]).await.unwrap().is_some());
        assert!(history.get(ids[0]).await.unwrap().is_none());
    }
}
