// crates/taskflow/src/jobs/repo.rs

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::jobs::model::{Job, JobOutcome, JobStatus, NewJob};
use crate::jobs::store::JobStore;

#[derive(Clone)]
pub struct JobsRepo {
    pool: PgPool,
}

impl JobsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ----------------------------
    // Enqueue
    // ----------------------------

    /// Insert a whole batch inside one transaction so a batch is never partially visible.
    pub async fn enqueue_batch(&self, batch_id: Uuid, jobs: &[NewJob]) -> anyhow::Result<Vec<Uuid>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(jobs.len());

        for job in jobs {
            let id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO jobs (id, batch_id, project_id, job_type, payload_json, priority, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(batch_id)
            .bind(job.project_id.as_deref())
            .bind(&job.job_type)
            .bind(&job.payload_json)
            .bind(job.priority)
            .bind(JobStatus::Pending.as_str())
            .fetch_one(&mut *tx)
            .await?;

            ids.push(id);
        }

        tx.commit().await?;
        Ok(ids)
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get_job(&self, job_id: Uuid) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn list_by_batch(&self, batch_id: Uuid) -> anyhow::Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT *
            FROM jobs
            WHERE batch_id = $1
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    pub async fn list_stale(&self, older_than: chrono::Duration) -> anyhow::Result<Vec<Job>> {
        let older_than_ms = older_than.num_milliseconds().max(0);

        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT *
            FROM jobs
            WHERE status = 'in_progress'
              AND updated_at < now() - ($1::bigint * interval '1 millisecond')
            ORDER BY updated_at ASC, seq ASC
            "#,
        )
        .bind(older_than_ms)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    // ----------------------------
    // Claiming
    // ----------------------------

    /// Claim exactly one pending job for this worker.
    ///
    /// Correctness: SELECT ... FOR UPDATE SKIP LOCKED, and the UPDATE is still guarded by
    /// `status = 'pending'`, so a job can only ever be flipped to in_progress once.
    pub async fn claim_next(&self, worker_id: &str) -> anyhow::Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>(
            r#"
            WITH candidate AS (
              SELECT id
              FROM jobs
              WHERE status = 'pending'
              ORDER BY priority DESC, created_at ASC, seq ASC
              FOR UPDATE SKIP LOCKED
              LIMIT 1
            )
            UPDATE jobs j
            SET status = 'in_progress',
                attempts = j.attempts + 1,
                claimed_by = $1,
                started_at = now(),
                updated_at = now()
            FROM candidate
            WHERE j.id = candidate.id
              AND j.status = 'pending'
            RETURNING j.*
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(job)
    }

    // ----------------------------
    // State transitions
    // ----------------------------

    /// The `claimed_by = worker_id` guard prevents other workers from finishing your job,
    /// and the status guard keeps terminal rows terminal.
    pub async fn mark_completed(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: &Value,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                result_json = $3,
                error = NULL,
                finished_at = now(),
                updated_at = now()
            WHERE id = $1
              AND claimed_by = $2
              AND status = 'in_progress'
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(result)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    pub async fn mark_failed(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error = $3,
                result_json = NULL,
                finished_at = now(),
                updated_at = now()
            WHERE id = $1
              AND claimed_by = $2
              AND status = 'in_progress'
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}

#[async_trait]
impl JobStore for JobsRepo {
    async fn insert_jobs(&self, batch_id: Uuid, jobs: &[NewJob]) -> anyhow::Result<Vec<Uuid>> {
        self.enqueue_batch(batch_id, jobs).await
    }

    async fn claim_next(&self, worker_id: &str) -> anyhow::Result<Option<Job>> {
        JobsRepo::claim_next(self, worker_id).await
    }

    async fn finish(
        &self,
        job_id: Uuid,
        worker_id: &str,
        outcome: &JobOutcome,
    ) -> anyhow::Result<bool> {
        match outcome {
            JobOutcome::Completed(result) => self.mark_completed(job_id, worker_id, result).await,
            JobOutcome::Failed(error) => self.mark_failed(job_id, worker_id, error).await,
        }
    }

    async fn list_by_batch(&self, batch_id: Uuid) -> anyhow::Result<Vec<Job>> {
        JobsRepo::list_by_batch(self, batch_id).await
    }

    async fn get_job(&self, job_id: Uuid) -> anyhow::Result<Option<Job>> {
        JobsRepo::get_job(self, job_id).await
    }

    async fn list_stale(&self, older_than: chrono::Duration) -> anyhow::Result<Vec<Job>> {
        JobsRepo::list_stale(self, older_than).await
    }
}
