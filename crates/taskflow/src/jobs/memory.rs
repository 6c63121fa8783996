//! In-process `JobStore`, used by tests and by embedders that do not need durability.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::jobs::model::{Job, JobOutcome, JobStatus, NewJob};
use crate::jobs::store::JobStore;

#[derive(Default)]
struct State {
    jobs: Vec<Job>,
    next_seq: i64,
}

#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<State>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_jobs(&self, batch_id: Uuid, jobs: &[NewJob]) -> anyhow::Result<Vec<Uuid>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut ids = Vec::with_capacity(jobs.len());

        for new in jobs {
            state.next_seq += 1;
            let job = Job {
                id: Uuid::new_v4(),
                seq: state.next_seq,
                batch_id,
                project_id: new.project_id.clone(),
                job_type: new.job_type.clone(),
                priority: new.priority,
                payload_json: new.payload_json.clone(),
                status: JobStatus::Pending,
                attempts: 0,
                claimed_by: None,
                result_json: None,
                error: None,
                created_at: now,
                updated_at: now,
                started_at: None,
                finished_at: None,
            };
            ids.push(job.id);
            state.jobs.push(job);
        }

        Ok(ids)
    }

    async fn claim_next(&self, worker_id: &str) -> anyhow::Result<Option<Job>> {
        let mut state = self.state.lock().await;

        // select-and-flip happens under one lock acquisition
        let candidate = state
            .jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.seq.cmp(&b.seq))
            });

        let Some(job) = candidate else {
            return Ok(None);
        };

        let now = Utc::now();
        job.status = JobStatus::InProgress;
        job.attempts += 1;
        job.claimed_by = Some(worker_id.to_string());
        job.started_at = Some(now);
        job.updated_at = now;

        Ok(Some(job.clone()))
    }

    async fn finish(
        &self,
        job_id: Uuid,
        worker_id: &str,
        outcome: &JobOutcome,
    ) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;

        let Some(job) = state.jobs.iter_mut().find(|j| j.id == job_id) else {
            return Ok(false);
        };
        if !job.status.can_transition_to(outcome.status())
            || job.claimed_by.as_deref() != Some(worker_id)
        {
            return Ok(false);
        }

        let now = Utc::now();
        match outcome {
            JobOutcome::Completed(result) => {
                job.result_json = Some(result.clone());
                job.error = None;
            }
            JobOutcome::Failed(error) => {
                job.result_json = None;
                job.error = Some(error.clone());
            }
        }
        job.status = outcome.status();
        job.finished_at = Some(now);
        job.updated_at = now;

        Ok(true)
    }

    async fn list_by_batch(&self, batch_id: Uuid) -> anyhow::Result<Vec<Job>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .iter()
            .filter(|j| j.batch_id == batch_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));
        Ok(jobs)
    }

    async fn get_job(&self, job_id: Uuid) -> anyhow::Result<Option<Job>> {
        let state = self.state.lock().await;
        Ok(state.jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn list_stale(&self, older_than: chrono::Duration) -> anyhow::Result<Vec<Job>> {
        let cutoff = Utc::now() - older_than;
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::InProgress && j.updated_at < cutoff)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.seq.cmp(&b.seq)));
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(job_type: &str, priority: i32) -> NewJob {
        NewJob::new(job_type, json!({}), priority)
    }

    #[tokio::test]
    async fn claims_by_priority_then_insertion_order() {
        let store = MemoryJobStore::new();
        let batch = Uuid::new_v4();
        let ids = store
            .insert_jobs(batch, &[job("low", 1), job("high-a", 5), job("high-b", 5)])
            .await
            .unwrap();

        let first = store.claim_next("w").await.unwrap().unwrap();
        let second = store.claim_next("w").await.unwrap().unwrap();
        let third = store.claim_next("w").await.unwrap().unwrap();

        assert_eq!(first.id, ids[1]);
        assert_eq!(second.id, ids[2]);
        assert_eq!(third.id, ids[0]);
        assert!(store.claim_next("w").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finish_is_guarded_by_owner_and_status() {
        let store = MemoryJobStore::new();
        let batch = Uuid::new_v4();
        store.insert_jobs(batch, &[job("t", 0)]).await.unwrap();

        let claimed = store.claim_next("worker-a").await.unwrap().unwrap();
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.status, JobStatus::InProgress);

        let done = JobOutcome::Completed(json!({"ok": true}));
        assert!(!store.finish(claimed.id, "worker-b", &done).await.unwrap());
        assert!(store.finish(claimed.id, "worker-a", &done).await.unwrap());

        // terminal rows never move again
        let fail = JobOutcome::Failed("late".into());
        assert!(!store.finish(claimed.id, "worker-a", &fail).await.unwrap());

        let stored = store.get_job(claimed.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.result_json, Some(json!({"ok": true})));
        assert_eq!(stored.error, None);
    }

    #[tokio::test]
    async fn stale_lists_only_old_in_progress_jobs() {
        let store = MemoryJobStore::new();
        let batch = Uuid::new_v4();
        store
            .insert_jobs(batch, &[job("a", 0), job("b", 0)])
            .await
            .unwrap();
        let claimed = store.claim_next("w").await.unwrap().unwrap();

        assert!(store
            .list_stale(chrono::Duration::minutes(5))
            .await
            .unwrap()
            .is_empty());

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let stale = store
            .list_stale(chrono::Duration::milliseconds(1))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, claimed.id);
    }
}
