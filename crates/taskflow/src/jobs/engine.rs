use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::Config;
use crate::jobs::error_codes::{ErrorCode, JobError};
use crate::jobs::model::{Job, JobOutcome};
use crate::jobs::registry::HandlerRegistry;
use crate::jobs::store::JobStore;

const FINISH_RETRY_BASE: Duration = Duration::from_millis(50);
const FINISH_RETRY_MAX: Duration = Duration::from_secs(2);
const FINISH_MAX_ATTEMPTS: u32 = 30;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub workers: usize,
    pub poll_interval: Duration,
    /// Worker ids are `{worker_prefix}-{n}`.
    pub worker_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(250),
            worker_prefix: "worker".to_string(),
        }
    }
}

impl From<&Config> for EngineConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            workers: cfg.workers,
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            worker_prefix: cfg.worker_id.clone(),
        }
    }
}

/// One claim/execute/record cycle.
#[derive(Debug, Clone)]
pub struct ProcessedJob {
    pub job_id: Uuid,
    pub batch_id: Uuid,
    pub job_type: String,
    pub outcome: JobOutcome,
    pub latency_ms: u64,
    /// `true` once the store accepted the outcome.
    pub recorded: bool,
    /// `finish` calls that failed with a storage error before the outcome was stored or dropped.
    pub finish_errors: u32,
    /// Storage kept failing until retries ran out (or stop was requested); the job is left
    /// `in_progress`.
    pub abandoned: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerReport {
    pub worker_id: String,
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
    pub idle_polls: u64,
    pub storage_errors: u64,
    pub rejected_finishes: u64,
    pub abandoned_outcomes: u64,
}

impl WorkerReport {
    fn new(worker_id: &str) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            ..Self::default()
        }
    }

    fn record(&mut self, processed: &ProcessedJob) {
        self.claimed += 1;
        match processed.outcome {
            JobOutcome::Completed(_) => self.completed += 1,
            JobOutcome::Failed(_) => self.failed += 1,
        }
        self.storage_errors += u64::from(processed.finish_errors);
        if processed.abandoned {
            self.abandoned_outcomes += 1;
        } else if !processed.recorded {
            self.rejected_finishes += 1;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineReport {
    pub workers: Vec<WorkerReport>,
}

impl EngineReport {
    pub fn claimed(&self) -> u64 {
        self.workers.iter().map(|w| w.claimed).sum()
    }

    pub fn completed(&self) -> u64 {
        self.workers.iter().map(|w| w.completed).sum()
    }

    pub fn failed(&self) -> u64 {
        self.workers.iter().map(|w| w.failed).sum()
    }

    pub fn storage_errors(&self) -> u64 {
        self.workers.iter().map(|w| w.storage_errors).sum()
    }
}

/// Polls the store with N concurrent workers and dispatches claimed jobs to handlers.
#[derive(Clone)]
pub struct WorkerEngine {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    cfg: EngineConfig,
}

impl WorkerEngine {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<HandlerRegistry>, cfg: EngineConfig) -> Self {
        Self {
            store,
            registry,
            cfg,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Spawn the worker loops and return immediately.
    pub fn start(&self) -> EngineHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = self.cfg.workers.max(1);

        tracing::info!(
            workers,
            poll_interval_ms = self.cfg.poll_interval.as_millis() as u64,
            handlers = ?self.registry.job_types(),
            "worker engine starting"
        );

        let handles = (1..=workers)
            .map(|n| {
                let engine = self.clone();
                let worker_id = format!("{}-{}", self.cfg.worker_prefix, n);
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move { engine.run_worker(worker_id, shutdown).await })
            })
            .collect();

        EngineHandle {
            shutdown: shutdown_tx,
            handles,
        }
    }

    /// Claim one job, run its handler, record the outcome.
    /// `Ok(None)` means nothing was pending. Only a failed claim is returned as `Err`;
    /// once a job is claimed its outcome is retried into the store.
    pub async fn process_next(&self, worker_id: &str) -> anyhow::Result<Option<ProcessedJob>> {
        self.process_one(worker_id, None).await
    }

    async fn process_one(
        &self,
        worker_id: &str,
        shutdown: Option<&mut watch::Receiver<bool>>,
    ) -> anyhow::Result<Option<ProcessedJob>> {
        let Some(job) = self.store.claim_next(worker_id).await? else {
            return Ok(None);
        };

        tracing::debug!(
            worker_id,
            job_id = %job.id,
            job_type = %job.job_type,
            priority = job.priority,
            attempts = job.attempts,
            "claimed job"
        );

        let started = Instant::now();
        let outcome = self.execute(&job).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (recorded, finish_errors, abandoned) =
            self.record(&job, worker_id, &outcome, shutdown).await;

        match (&outcome, recorded) {
            (_, false) if abandoned => {}
            (_, false) => tracing::warn!(
                worker_id,
                job_id = %job.id,
                "outcome rejected, job no longer in progress for this worker"
            ),
            (JobOutcome::Completed(_), true) => tracing::info!(
                worker_id,
                job_id = %job.id,
                job_type = %job.job_type,
                latency_ms,
                "job completed"
            ),
            (JobOutcome::Failed(error), true) => tracing::warn!(
                worker_id,
                job_id = %job.id,
                job_type = %job.job_type,
                latency_ms,
                error = %error,
                "job failed"
            ),
        }

        Ok(Some(ProcessedJob {
            job_id: job.id,
            batch_id: job.batch_id,
            job_type: job.job_type,
            outcome,
            latency_ms,
            recorded,
            finish_errors,
            abandoned,
        }))
    }

    /// Store the outcome, retrying storage errors with capped exponential backoff.
    /// Stop cuts the backoff short and leaves one last attempt.
    /// Returns `(recorded, finish_errors, abandoned)`.
    async fn record(
        &self,
        job: &Job,
        worker_id: &str,
        outcome: &JobOutcome,
        mut shutdown: Option<&mut watch::Receiver<bool>>,
    ) -> (bool, u32, bool) {
        let mut delay = FINISH_RETRY_BASE;
        let mut errors = 0u32;
        let mut last_try = false;

        loop {
            match self.store.finish(job.id, worker_id, outcome).await {
                Ok(recorded) => return (recorded, errors, false),
                Err(e) => {
                    errors += 1;
                    if last_try || errors >= FINISH_MAX_ATTEMPTS {
                        tracing::error!(
                            worker_id,
                            job_id = %job.id,
                            attempts = errors,
                            error = %e,
                            "giving up on recording outcome, job left in_progress"
                        );
                        return (false, errors, true);
                    }
                    tracing::warn!(
                        worker_id,
                        job_id = %job.id,
                        attempt = errors,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "recording outcome failed, retrying"
                    );
                }
            }

            last_try = match shutdown.as_deref_mut() {
                Some(rx) => !idle(rx, delay).await,
                None => {
                    tokio::time::sleep(delay).await;
                    false
                }
            };
            delay = (delay * 2).min(FINISH_RETRY_MAX);
        }
    }

    async fn execute(&self, job: &Job) -> JobOutcome {
        // a missing handler is a deployment defect: fail now, never retry
        let Some(entry) = self.registry.resolve(&job.job_type) else {
            return JobOutcome::Failed(JobError::unknown_job_type(&job.job_type).to_string());
        };

        // own task so a panicking handler only fails its own job
        let payload = job.payload_json.clone();
        let joined = tokio::spawn(async move { entry.run(payload).await }).await;

        match joined {
            Ok(Ok(result)) => JobOutcome::Completed(result),
            Ok(Err(err)) => JobOutcome::Failed(err.to_string()),
            Err(join_err) => JobOutcome::Failed(
                JobError::new(ErrorCode::Panic, format!("handler panicked: {join_err}")).to_string(),
            ),
        }
    }

    async fn run_worker(&self, worker_id: String, mut shutdown: watch::Receiver<bool>) -> WorkerReport {
        let mut report = WorkerReport::new(&worker_id);
        tracing::debug!(worker_id = %worker_id, "worker loop started");

        while !*shutdown.borrow() {
            match self.process_one(&worker_id, Some(&mut shutdown)).await {
                Ok(Some(processed)) => report.record(&processed),
                Ok(None) => {
                    report.idle_polls += 1;
                    if !idle(&mut shutdown, self.cfg.poll_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    report.storage_errors += 1;
                    tracing::error!(worker_id = %worker_id, error = %e, "worker loop storage error");
                    if !idle(&mut shutdown, self.cfg.poll_interval).await {
                        break;
                    }
                }
            }
        }

        tracing::debug!(
            worker_id = %worker_id,
            claimed = report.claimed,
            "worker loop stopped"
        );
        report
    }
}

/// Sleep for one poll interval unless stop is signalled first.
/// Returns `false` when the loop should exit.
async fn idle(shutdown: &mut watch::Receiver<bool>, poll_interval: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(poll_interval) => !*shutdown.borrow(),
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
    }
}

/// Running engine. Dropping it without `stop` leaves the loops running until the runtime ends.
pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<WorkerReport>>,
}

impl EngineHandle {
    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Cooperative stop: every loop finishes its current job, then exits.
    /// All loops are joined before a crashed one is reported as an error.
    pub async fn stop(self) -> anyhow::Result<EngineReport> {
        // receivers are held by the loops; a send error only means they already exited
        let _ = self.shutdown.send(true);

        let total = self.handles.len();
        let mut report = EngineReport::default();
        let mut crashed = Vec::new();
        for handle in self.handles {
            match handle.await {
                Ok(worker) => report.workers.push(worker),
                Err(e) => {
                    tracing::error!(error = %e, "worker loop ended abnormally");
                    crashed.push(e);
                }
            }
        }

        tracing::info!(
            claimed = report.claimed(),
            completed = report.completed(),
            failed = report.failed(),
            crashed = crashed.len(),
            "worker engine stopped"
        );

        if let Some(first) = crashed.first() {
            anyhow::bail!(
                "{} of {total} worker loops ended abnormally: {first}",
                crashed.len()
            );
        }
        Ok(report)
    }
}
