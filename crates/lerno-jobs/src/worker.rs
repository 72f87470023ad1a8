//! Per-queue worker pool.
//!
//! Each queue gets its own [`QueueWorker`] with an independent concurrency
//! budget: a slow embeddings backlog never starves chat persistence. The
//! pool claims up to `concurrency` due jobs at a time, processes them in a
//! `JoinSet`, and only sleeps when its queue is empty.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use lerno_core::{
    defaults, Error, FailOutcome, Job, JobHistoryStore, JobTransport, JobType, QueueName, Result,
};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::queue::QueueDefinition;

/// Event emitted by a queue worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job was claimed and handed to its handler.
    JobStarted {
        job_id: Uuid,
        job_type: JobType,
        queue: QueueName,
        attempt: i32,
    },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, job_type: JobType },
    /// A transient failure was rescheduled for redelivery.
    JobRetried {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
    /// A job was parked in the failed bucket (permanent failure or
    /// exhausted attempts).
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
    /// Worker pool for a queue started.
    WorkerStarted { queue: QueueName },
    /// Worker pool for a queue stopped.
    WorkerStopped { queue: QueueName },
}

/// Handle for controlling a running queue worker.
pub struct WorkerHandle {
    queue: QueueName,
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to stop claiming new jobs. In-flight jobs keep
    /// running until they finish or the caller gives up waiting.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// The queue this worker serves.
    pub fn queue(&self) -> QueueName {
        self.queue
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Wait for the worker loop to exit. Used by the pipeline's drain.
    pub async fn join(self) -> Result<()> {
        self.join
            .await
            .map_err(|e| Error::Internal(format!("Worker task panicked: {e}")))
    }
}

/// Worker pool for one queue.
pub struct QueueWorker {
    transport: Arc<dyn JobTransport>,
    history: Arc<dyn JobHistoryStore>,
    handlers: Arc<HashMap<JobType, Arc<dyn JobHandler>>>,
    definition: QueueDefinition,
    poll_interval_ms: u64,
    job_timeout_secs: u64,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl QueueWorker {
    pub fn new(
        transport: Arc<dyn JobTransport>,
        history: Arc<dyn JobHistoryStore>,
        handlers: Arc<HashMap<JobType, Arc<dyn JobHandler>>>,
        definition: QueueDefinition,
        event_tx: broadcast::Sender<WorkerEvent>,
    ) -> Self {
        Self {
            transport,
            history,
            handlers,
            definition,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            job_timeout_secs: defaults::JOB_TIMEOUT_SECS,
            event_tx,
        }
    }

    /// Override the polling interval (tests use a short one).
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Override the per-job execution timeout.
    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let queue = self.definition.name;

        let join = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            queue,
            shutdown_tx,
            event_rx,
            join,
        }
    }

    #[instrument(skip(self, shutdown_rx), fields(queue = %self.definition.name))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        info!(
            subsystem = "jobs",
            queue = %self.definition.name,
            concurrency = self.definition.concurrency,
            poll_interval_ms = self.poll_interval_ms,
            "Queue worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted {
            queue: self.definition.name,
        });

        let poll_interval = Duration::from_millis(self.poll_interval_ms);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!(queue = %self.definition.name, "Queue worker received shutdown signal");
                break;
            }

            let mut claimed = 0;
            let mut tasks = tokio::task::JoinSet::new();

            for _ in 0..self.definition.concurrency {
                match self.claim_job().await {
                    Some(job) => {
                        claimed += 1;
                        let worker = self.clone_refs();
                        tasks.spawn(async move {
                            worker.execute_job(job).await;
                        });
                    }
                    None => break,
                }
            }

            if claimed == 0 {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(queue = %self.definition.name, "Queue worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(queue = %self.definition.name, claimed, "Processing job batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, queue = %self.definition.name, "Job task panicked");
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped {
            queue: self.definition.name,
        });
        info!(queue = %self.definition.name, "Queue worker stopped");
    }

    async fn claim_job(&self) -> Option<Job> {
        match self.transport.claim(self.definition.name).await {
            Ok(Some(job)) => Some(job),
            Ok(None) => None,
            Err(e) => {
                error!(error = ?e, queue = %self.definition.name, "Failed to claim job");
                None
            }
        }
    }

    fn clone_refs(&self) -> QueueWorkerRef {
        QueueWorkerRef {
            transport: self.transport.clone(),
            history: self.history.clone(),
            handlers: self.handlers.clone(),
            definition: self.definition,
            job_timeout_secs: self.job_timeout_secs,
            event_tx: self.event_tx.clone(),
        }
    }

    /// Number of jobs waiting on this worker's queue.
    pub async fn pending_count(&self) -> Result<i64> {
        self.transport.pending_count(self.definition.name).await
    }
}

/// Reference bundle for executing a single job in a spawned task.
struct QueueWorkerRef {
    transport: Arc<dyn JobTransport>,
    history: Arc<dyn JobHistoryStore>,
    handlers: Arc<HashMap<JobType, Arc<dyn JobHandler>>>,
    definition: QueueDefinition,
    job_timeout_secs: u64,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl QueueWorkerRef {
    async fn execute_job(self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let job_type = job.job_type;
        let history_id = job.envelope.history_id;
        let attempts_made = job.attempts_made;

        info!(
            subsystem = "jobs",
            job_id = %job_id,
            history_id = %history_id,
            job_type = %job_type,
            queue = %self.definition.name,
            attempt = attempts_made,
            "Processing job"
        );

        // A terminal history record means the outcome was already decided
        // (stalled-sweep bookkeeping raced a slow worker). Drop the delivery.
        match self.history.mark_processing(history_id).await {
            Ok(()) => {}
            Err(Error::TerminalState(_)) => {
                warn!(
                    job_id = %job_id,
                    history_id = %history_id,
                    "History already terminal, discarding delivery"
                );
                if let Err(e) = self.transport.complete(job_id).await {
                    error!(error = ?e, job_id = %job_id, "Failed to discard job");
                }
                return;
            }
            Err(e) => {
                // Execution proceeds; the terminal write is retried below.
                warn!(error = ?e, history_id = %history_id, "Failed to mark history processing");
            }
        }

        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id,
            job_type,
            queue: self.definition.name,
            attempt: attempts_made,
        });

        let result = match self.handlers.get(&job_type).cloned() {
            Some(handler) => {
                let job_timeout = Duration::from_secs(self.job_timeout_secs);
                let ctx = JobContext::new(job);
                match tokio::time::timeout(job_timeout, handler.execute(ctx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            job_id = %job_id,
                            job_type = %job_type,
                            "Job exceeded timeout of {}s",
                            self.job_timeout_secs
                        );
                        JobResult::Retry(format!(
                            "Job exceeded timeout of {}s",
                            self.job_timeout_secs
                        ))
                    }
                }
            }
            None => {
                warn!(job_type = %job_type, "No handler registered for job type");
                JobResult::Failed(format!("No handler for job type: {job_type}"))
            }
        };

        match result {
            JobResult::Success => {
                if let Err(e) = self.transport.complete(job_id).await {
                    error!(error = ?e, job_id = %job_id, "Failed to ack job");
                    return;
                }
                self.record_completed(history_id, job_id).await;
                info!(
                    job_id = %job_id,
                    job_type = %job_type,
                    queue = %self.definition.name,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed successfully"
                );
                let _ = self
                    .event_tx
                    .send(WorkerEvent::JobCompleted { job_id, job_type });
            }
            JobResult::Retry(error) => {
                let delay = self.definition.backoff.delay(attempts_made);
                match self.transport.fail(job_id, &error, delay).await {
                    Ok(FailOutcome::Retried { run_at }) => {
                        // History stays `processing`; it records the eventual
                        // outcome, not every transient failure.
                        warn!(
                            job_id = %job_id,
                            job_type = %job_type,
                            %error,
                            attempt = attempts_made,
                            run_at = %run_at,
                            "Job failed, scheduled for retry"
                        );
                        let _ = self.event_tx.send(WorkerEvent::JobRetried {
                            job_id,
                            job_type,
                            error,
                        });
                    }
                    Ok(FailOutcome::Dead) => {
                        self.record_failed(history_id, job_id, &error).await;
                        warn!(
                            job_id = %job_id,
                            job_type = %job_type,
                            %error,
                            attempt = attempts_made,
                            "Job exhausted its attempts"
                        );
                        let _ = self.event_tx.send(WorkerEvent::JobFailed {
                            job_id,
                            job_type,
                            error,
                        });
                    }
                    Err(e) => {
                        error!(error = ?e, job_id = %job_id, "Failed to reschedule job");
                    }
                }
            }
            JobResult::Failed(error) => {
                if let Err(e) = self.transport.park(job_id, &error).await {
                    error!(error = ?e, job_id = %job_id, "Failed to park job");
                    return;
                }
                self.record_failed(history_id, job_id, &error).await;
                warn!(
                    job_id = %job_id,
                    job_type = %job_type,
                    %error,
                    "Job failed permanently"
                );
                let _ = self.event_tx.send(WorkerEvent::JobFailed {
                    job_id,
                    job_type,
                    error,
                });
            }
        }
    }

    async fn record_completed(&self, history_id: Uuid, job_id: Uuid) {
        match self.history.mark_completed(history_id).await {
            Ok(()) | Err(Error::TerminalState(_)) => {}
            Err(e) => {
                error!(error = ?e, job_id = %job_id, history_id = %history_id,
                       "Failed to mark history completed");
            }
        }
    }

    async fn record_failed(&self, history_id: Uuid, job_id: Uuid, error: &str) {
        match self.history.mark_failed(history_id, error).await {
            Ok(()) | Err(Error::TerminalState(_)) => {}
            Err(e) => {
                error!(error = ?e, job_id = %job_id, history_id = %history_id,
                       "Failed to mark history failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{BackoffStrategy, QueueSet};

    #[test]
    fn test_worker_event_clone_and_debug() {
        let event = WorkerEvent::JobStarted {
            job_id: Uuid::new_v4(),
            job_type: JobType::SendWelcomeEmail,
            queue: QueueName::Notifications,
            attempt: 1,
        };
        let copied = event.clone();
        let debug_str = format!("{copied:?}");
        assert!(debug_str.contains("JobStarted"));
        assert!(debug_str.contains("SendWelcomeEmail"));
    }

    #[test]
    fn test_worker_uses_queue_backoff() {
        let queues = QueueSet::default();
        let notifications = queues.get(QueueName::Notifications);
        assert!(matches!(
            notifications.backoff,
            BackoffStrategy::Exponential { base_ms: 1_000, .. }
        ));
    }
}
