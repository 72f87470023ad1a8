//! Pipeline lifecycle: startup, stalled-job recovery, graceful shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use lerno_core::{defaults, Error, JobHistoryStore, JobTransport, JobType, QueueName, Result};

use crate::handler::JobHandler;
use crate::queue::QueueSet;
use crate::worker::{QueueWorker, WorkerEvent, WorkerHandle};

/// Pipeline-wide tunables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Polling interval when a queue is empty, in milliseconds.
    pub poll_interval_ms: u64,
    /// Per-job execution timeout.
    pub job_timeout_secs: u64,
    /// How long a job may run before the sweeper treats it as stalled.
    pub stalled_after_secs: u64,
    /// How often the stalled-job sweeper runs.
    pub stalled_sweep_interval_secs: u64,
    /// Whether job processing is enabled at all.
    pub enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            job_timeout_secs: defaults::JOB_TIMEOUT_SECS,
            stalled_after_secs: defaults::STALLED_AFTER_SECS,
            stalled_sweep_interval_secs: defaults::STALLED_SWEEP_INTERVAL_SECS,
            enabled: true,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Polling interval when a queue is empty |
    /// | `JOB_TIMEOUT_SECS` | `300` | Per-job execution timeout |
    /// | `JOB_STALLED_AFTER_SECS` | `600` | Stalled-job liveness threshold |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::POLL_INTERVAL_MS);

        let job_timeout_secs = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_TIMEOUT_SECS);

        let stalled_after_secs = std::env::var("JOB_STALLED_AFTER_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::STALLED_AFTER_SECS);

        Self {
            poll_interval_ms,
            job_timeout_secs,
            stalled_after_secs,
            stalled_sweep_interval_secs: defaults::STALLED_SWEEP_INTERVAL_SECS,
            enabled,
        }
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the per-job timeout.
    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Builder for a [`Pipeline`] with registered handlers.
pub struct PipelineBuilder {
    transport: Arc<dyn JobTransport>,
    history: Arc<dyn JobHistoryStore>,
    queues: QueueSet,
    config: PipelineConfig,
    handlers: Vec<Box<dyn JobHandler>>,
}

impl PipelineBuilder {
    fn new(transport: Arc<dyn JobTransport>, history: Arc<dyn JobHistoryStore>) -> Self {
        Self {
            transport,
            history,
            queues: QueueSet::default(),
            config: PipelineConfig::default(),
            handlers: Vec::new(),
        }
    }

    /// Set the pipeline configuration.
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the queue set.
    pub fn with_queues(mut self, queues: QueueSet) -> Self {
        self.queues = queues;
        self
    }

    /// Add a handler.
    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Build the pipeline. Registering two handlers for the same job type
    /// is a configuration error. Job types left without a handler are
    /// reported at build time; a claimed job of such a type is parked as a
    /// permanent failure rather than crashing the worker.
    pub fn build(self) -> Result<Pipeline> {
        let mut handlers: HashMap<JobType, Arc<dyn JobHandler>> = HashMap::new();
        for handler in self.handlers {
            let job_type = handler.job_type();
            if handlers.insert(job_type, Arc::from(handler)).is_some() {
                return Err(Error::Config(format!(
                    "Duplicate handler for job type {job_type}"
                )));
            }
        }

        let missing = missing_job_types(&handlers);
        if !missing.is_empty() {
            warn!(
                subsystem = "jobs",
                component = "lifecycle",
                missing = ?missing,
                "Pipeline built without handlers for some job types; \
                 jobs of those types will be parked as permanent failures"
            );
        }

        Ok(Pipeline {
            transport: self.transport,
            history: self.history,
            queues: self.queues,
            config: self.config,
            handlers: Arc::new(handlers),
        })
    }
}

/// Job types with no registered handler.
fn missing_job_types(handlers: &HashMap<JobType, Arc<dyn JobHandler>>) -> Vec<JobType> {
    JobType::ALL
        .iter()
        .copied()
        .filter(|job_type| !handlers.contains_key(job_type))
        .collect()
}

/// The assembled job pipeline: one worker pool per queue plus the
/// stalled-job sweeper.
pub struct Pipeline {
    transport: Arc<dyn JobTransport>,
    history: Arc<dyn JobHistoryStore>,
    queues: QueueSet,
    config: PipelineConfig,
    handlers: Arc<HashMap<JobType, Arc<dyn JobHandler>>>,
}

impl Pipeline {
    /// Start building a pipeline.
    pub fn builder(
        transport: Arc<dyn JobTransport>,
        history: Arc<dyn JobHistoryStore>,
    ) -> PipelineBuilder {
        PipelineBuilder::new(transport, history)
    }

    /// Start every queue's worker pool and the stalled-job sweeper.
    pub fn start(self) -> PipelineHandle {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);

        if !self.config.enabled {
            info!("Job processing is disabled, starting no workers");
            return PipelineHandle {
                workers: Vec::new(),
                sweeper: None,
                transport: self.transport,
                history: self.history,
                event_tx,
            };
        }

        let mut workers = Vec::with_capacity(QueueName::ALL.len());
        for definition in self.queues.iter() {
            let worker = QueueWorker::new(
                self.transport.clone(),
                self.history.clone(),
                self.handlers.clone(),
                *definition,
                event_tx.clone(),
            )
            .with_poll_interval(self.config.poll_interval_ms)
            .with_job_timeout(self.config.job_timeout_secs);
            workers.push(worker.start());
        }

        let sweeper = Sweeper::start(
            self.transport.clone(),
            self.history.clone(),
            self.config.stalled_after_secs,
            self.config.stalled_sweep_interval_secs,
        );

        info!(
            subsystem = "jobs",
            queues = workers.len(),
            "Job pipeline started"
        );

        PipelineHandle {
            workers,
            sweeper: Some(sweeper),
            transport: self.transport,
            history: self.history,
            event_tx,
        }
    }
}

/// Handle for a running pipeline.
pub struct PipelineHandle {
    workers: Vec<WorkerHandle>,
    sweeper: Option<Sweeper>,
    transport: Arc<dyn JobTransport>,
    history: Arc<dyn JobHistoryStore>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl PipelineHandle {
    /// Get a receiver for events across all queues.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Pending job counts per queue, for the operator dashboard.
    pub async fn queue_depths(&self) -> Result<Vec<(QueueName, i64)>> {
        let mut depths = Vec::with_capacity(QueueName::ALL.len());
        for queue in QueueName::ALL {
            depths.push((queue, self.transport.pending_count(queue).await?));
        }
        Ok(depths)
    }

    /// Gracefully shut the pipeline down.
    ///
    /// Workers stop claiming immediately, then get `drain_timeout` to finish
    /// in-flight jobs. Whatever is still running afterwards is interrupted:
    /// the transport parks it and its history records the interruption, so
    /// no job silently disappears across a restart.
    pub async fn shutdown(self, drain_timeout: Duration) -> Result<()> {
        info!(subsystem = "jobs", "Job pipeline shutting down");

        if let Some(sweeper) = self.sweeper {
            sweeper.stop().await;
        }

        for worker in &self.workers {
            // A worker whose loop already exited has dropped its receiver.
            let _ = worker.shutdown().await;
        }

        let drain = async {
            for worker in self.workers {
                let _ = worker.join().await;
            }
        };

        match tokio::time::timeout(drain_timeout, drain).await {
            Ok(()) => {
                info!("Job pipeline drained cleanly");
                return Ok(());
            }
            Err(_) => {
                warn!(
                    drain_timeout_secs = drain_timeout.as_secs(),
                    "Drain timeout exceeded, interrupting running jobs"
                );
            }
        }

        for queue in QueueName::ALL {
            let interrupted = self
                .transport
                .interrupt_running(queue, "interrupted by shutdown")
                .await?;
            for job in interrupted {
                warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    queue = %queue,
                    "Job interrupted by shutdown"
                );
                match self
                    .history
                    .mark_failed(job.envelope.history_id, "interrupted by shutdown")
                    .await
                {
                    Ok(()) | Err(Error::TerminalState(_)) => {}
                    Err(e) => {
                        error!(error = ?e, job_id = %job.id, "Failed to record interruption");
                    }
                }
            }
        }

        Ok(())
    }
}

/// Background task that requeues (or parks) jobs whose worker died.
struct Sweeper {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl Sweeper {
    fn start(
        transport: Arc<dyn JobTransport>,
        history: Arc<dyn JobHistoryStore>,
        stalled_after_secs: u64,
        interval_secs: u64,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let older_than = chrono::Duration::seconds(stalled_after_secs as i64);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {}
                }

                match transport.recover_stalled(older_than).await {
                    Ok(sweep) => {
                        if !sweep.requeued.is_empty() {
                            warn!(
                                subsystem = "jobs",
                                requeued = sweep.requeued.len(),
                                "Requeued stalled jobs"
                            );
                        }
                        for job in sweep.parked {
                            warn!(
                                job_id = %job.id,
                                job_type = %job.job_type,
                                "Stalled job parked, attempts exhausted"
                            );
                            match history
                                .mark_failed(
                                    job.envelope.history_id,
                                    "stalled: exceeded liveness threshold",
                                )
                                .await
                            {
                                Ok(()) | Err(Error::TerminalState(_)) => {}
                                Err(e) => {
                                    error!(error = ?e, job_id = %job.id,
                                           "Failed to record stalled job");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = ?e, "Stalled-job sweep failed");
                    }
                }
            }
        });

        Self { shutdown_tx, join }
    }

    async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NoOpHandler;
    use crate::testing::{InMemoryHistory, InMemoryTransport};

    #[test]
    fn test_pipeline_config_from_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.poll_interval_ms, defaults::POLL_INTERVAL_MS);
        assert_eq!(config.job_timeout_secs, defaults::JOB_TIMEOUT_SECS);
        assert!(config.enabled);
    }

    #[test]
    fn test_pipeline_config_builder_chaining() {
        let config = PipelineConfig::default()
            .with_poll_interval(50)
            .with_job_timeout(5)
            .with_enabled(false);
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.job_timeout_secs, 5);
        assert!(!config.enabled);
    }

    #[test]
    fn test_duplicate_handler_is_rejected() {
        let transport = Arc::new(InMemoryTransport::new());
        let history = Arc::new(InMemoryHistory::new());

        let err = Pipeline::builder(transport, history)
            .with_handler(NoOpHandler::new(JobType::SendWelcomeEmail))
            .with_handler(NoOpHandler::new(JobType::SendWelcomeEmail))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_partial_registry_builds_and_reports_missing_types() {
        let transport = Arc::new(InMemoryTransport::new());
        let history = Arc::new(InMemoryHistory::new());

        // A partial registry is valid; claims for the uncovered types are
        // parked at runtime.
        let pipeline = Pipeline::builder(transport, history)
            .with_handler(NoOpHandler::new(JobType::SendWelcomeEmail))
            .build();
        assert!(pipeline.is_ok());

        let mut handlers: HashMap<JobType, Arc<dyn JobHandler>> = HashMap::new();
        handlers.insert(
            JobType::SendWelcomeEmail,
            Arc::new(NoOpHandler::new(JobType::SendWelcomeEmail)),
        );
        let missing = missing_job_types(&handlers);
        assert_eq!(missing.len(), JobType::ALL.len() - 1);
        assert!(!missing.contains(&JobType::SendWelcomeEmail));
        assert!(missing.contains(&JobType::GenerateThumbnail));
    }

    #[tokio::test]
    async fn test_disabled_pipeline_starts_no_workers() {
        let transport = Arc::new(InMemoryTransport::new());
        let history = Arc::new(InMemoryHistory::new());

        let pipeline = Pipeline::builder(transport, history)
            .with_config(PipelineConfig::default().with_enabled(false))
            .build()
            .unwrap();
        let handle = pipeline.start();
        assert!(handle.workers.is_empty());
        handle.shutdown(Duration::from_millis(100)).await.unwrap();
    }
}
