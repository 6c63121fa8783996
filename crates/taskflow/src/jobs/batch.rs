use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::jobs::model::{Job, JobStatus};
use crate::jobs::store::JobStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOrError {
    Result(Value),
    Error(String),
}

/// One entry of the batch result contract handed to the synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchItem {
    pub job_id: Uuid,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    /// `None` while the job is still pending or in progress.
    pub result_or_error: Option<ResultOrError>,
}

impl From<&Job> for BatchItem {
    fn from(job: &Job) -> Self {
        let result_or_error = match job.status {
            JobStatus::Completed => Some(ResultOrError::Result(
                job.result_json.clone().unwrap_or(Value::Null),
            )),
            JobStatus::Failed => Some(ResultOrError::Error(job.error.clone().unwrap_or_default())),
            JobStatus::Pending | JobStatus::InProgress => None,
        };

        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            status: job.status,
            result_or_error,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn of(jobs: &[Job]) -> Self {
        let mut s = Self {
            total: jobs.len(),
            ..Self::default()
        };
        for job in jobs {
            match job.status {
                JobStatus::Pending => s.pending += 1,
                JobStatus::InProgress => s.in_progress += 1,
                JobStatus::Completed => s.completed += 1,
                JobStatus::Failed => s.failed += 1,
            }
        }
        s
    }

    /// Derived, never stored: a batch with jobs and none of them non-terminal.
    pub fn is_done(&self) -> bool {
        self.total > 0 && self.pending == 0 && self.in_progress == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResults {
    pub batch_id: Uuid,
    /// `false` marks a partial snapshot taken before every job finished.
    pub complete: bool,
    pub summary: BatchSummary,
    pub items: Vec<BatchItem>,
}

impl BatchResults {
    pub fn from_jobs(batch_id: Uuid, jobs: &[Job]) -> Self {
        let summary = BatchSummary::of(jobs);
        Self {
            batch_id,
            complete: summary.is_done(),
            summary,
            items: jobs.iter().map(BatchItem::from).collect(),
        }
    }
}

/// Collaborator that turns a finished batch into one narrative (usually an LLM call).
#[async_trait]
pub trait BatchSynthesizer: Send + Sync {
    async fn synthesize(&self, batch_id: Uuid, items: &[BatchItem]) -> anyhow::Result<String>;
}

/// Read-side view over the store for callers polling a batch.
#[derive(Clone)]
pub struct BatchTracker {
    store: Arc<dyn JobStore>,
}

impl BatchTracker {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn summary(&self, batch_id: Uuid) -> anyhow::Result<BatchSummary> {
        let jobs = self.store.list_by_batch(batch_id).await?;
        Ok(BatchSummary::of(&jobs))
    }

    /// An unknown batch id is never done.
    pub async fn is_batch_done(&self, batch_id: Uuid) -> anyhow::Result<bool> {
        Ok(self.summary(batch_id).await?.is_done())
    }

    pub async fn collect_results(&self, batch_id: Uuid) -> anyhow::Result<BatchResults> {
        let jobs = self.store.list_by_batch(batch_id).await?;
        Ok(BatchResults::from_jobs(batch_id, &jobs))
    }

    pub async fn wait_until_done(
        &self,
        batch_id: Uuid,
        poll_interval: Duration,
        timeout: Duration,
    ) -> anyhow::Result<BatchResults> {
        let started = Instant::now();
        loop {
            let results = self.collect_results(batch_id).await?;
            if results.complete {
                return Ok(results);
            }
            if started.elapsed() >= timeout {
                anyhow::bail!(
                    "batch {batch_id} not done after {}ms ({} pending, {} in progress)",
                    timeout.as_millis(),
                    results.summary.pending,
                    results.summary.in_progress
                );
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Hand a finished batch to the synthesizer. Partial batches are refused.
    pub async fn synthesize(
        &self,
        batch_id: Uuid,
        synthesizer: &dyn BatchSynthesizer,
    ) -> anyhow::Result<String> {
        let results = self.collect_results(batch_id).await?;
        if !results.complete {
            anyhow::bail!(
                "batch {batch_id} is not done yet ({}/{} terminal)",
                results.summary.completed + results.summary.failed,
                results.summary.total
            );
        }
        synthesizer.synthesize(batch_id, &results.items).await
    }

    /// Jobs stuck `in_progress`, e.g. after a worker crash. Detection only: nothing is requeued.
    pub async fn stale_in_progress(&self, older_than: chrono::Duration) -> anyhow::Result<Vec<Job>> {
        self.store.list_stale(older_than).await
    }
}
