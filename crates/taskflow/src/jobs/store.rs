use async_trait::async_trait;
use uuid::Uuid;

use crate::jobs::model::{Job, JobOutcome, NewJob};

/// Durable job storage consumed by the decomposer, the engine and the batch tracker.
///
/// `claim_next` is the single concurrency-control point: it must find one pending job and
/// flip it to `in_progress` as one indivisible operation, so two workers can never be handed
/// the same job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert every job of a batch as `pending`. Either all rows become visible or none.
    /// Returns ids in insertion order.
    async fn insert_jobs(&self, batch_id: Uuid, jobs: &[NewJob]) -> anyhow::Result<Vec<Uuid>>;

    /// Claim the highest-priority pending job (FIFO within a priority).
    async fn claim_next(&self, worker_id: &str) -> anyhow::Result<Option<Job>>;

    /// Record the outcome of a job this worker holds.
    /// Returns `false` when the job is not `in_progress` under `worker_id`.
    async fn finish(
        &self,
        job_id: Uuid,
        worker_id: &str,
        outcome: &JobOutcome,
    ) -> anyhow::Result<bool>;

    /// Jobs of a batch in creation order.
    async fn list_by_batch(&self, batch_id: Uuid) -> anyhow::Result<Vec<Job>>;

    async fn get_job(&self, job_id: Uuid) -> anyhow::Result<Option<Job>>;

    /// Jobs that have been `in_progress` without an update for longer than `older_than`.
    async fn list_stale(&self, older_than: chrono::Duration) -> anyhow::Result<Vec<Job>>;
}
