// tests/claiming.rs
mod common;

use common::{insert_job, insert_one, memory_store, setup_db};

use serde_json::json;
use serial_test::serial;
use std::sync::Arc;
use uuid::Uuid;

use taskflow::jobs::{JobOutcome, JobStatus, JobStore, JobsRepo, NewJob};

/// Two claimers race for a single pending job; exactly one may win.
async fn race_once(store: Arc<dyn JobStore>) -> usize {
    let job_id = insert_job(store.as_ref(), "race").await;

    let a = {
        let store = store.clone();
        tokio::spawn(async move { store.claim_next("racer-a").await.unwrap() })
    };
    let b = {
        let store = store.clone();
        tokio::spawn(async move { store.claim_next("racer-b").await.unwrap() })
    };
    let claims: Vec<_> = [a.await.unwrap(), b.await.unwrap()]
        .into_iter()
        .flatten()
        .collect();

    for job in &claims {
        assert_eq!(job.id, job_id);
        assert_eq!(job.attempts, 1);
        let winner = job.claimed_by.as_deref().unwrap();
        assert!(store
            .finish(job.id, winner, &JobOutcome::Completed(json!(null)))
            .await
            .unwrap());
    }
    claims.len()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claimers_never_share_a_job() {
    let store: Arc<dyn JobStore> = memory_store();
    for round in 0..1000 {
        assert_eq!(race_once(store.clone()).await, 1, "round {round}");
    }
}

#[tokio::test]
async fn finish_is_guarded_by_owner_and_status() {
    let store = memory_store();
    let job_id = insert_job(store.as_ref(), "guarded").await;
    let done = JobOutcome::Completed(json!({"ok": true}));

    // pending jobs cannot be finished
    assert!(!store.finish(job_id, "w-1", &done).await.unwrap());

    let claimed = store.claim_next("w-1").await.unwrap().unwrap();
    assert_eq!(claimed.status, JobStatus::InProgress);

    assert!(!store.finish(job_id, "w-2", &done).await.unwrap());
    assert!(store.finish(job_id, "w-1", &done).await.unwrap());
    // terminal is terminal
    assert!(!store
        .finish(job_id, "w-1", &JobOutcome::Failed("late".into()))
        .await
        .unwrap());

    let job = store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result_json, Some(json!({"ok": true})));
    assert!(job.error.is_none());
}

#[tokio::test]
async fn claim_order_is_priority_then_fifo() {
    let store = memory_store();
    let batch = Uuid::new_v4();
    let ids = store
        .insert_jobs(
            batch,
            &[
                NewJob::new("a", json!({}), 1),
                NewJob::new("b", json!({}), 10),
                NewJob::new("c", json!({}), 5),
                NewJob::new("d", json!({}), 10),
            ],
        )
        .await
        .unwrap();

    let mut claimed = Vec::new();
    while let Some(job) = store.claim_next("w").await.unwrap() {
        claimed.push(job.id);
    }
    assert_eq!(claimed, vec![ids[1], ids[3], ids[2], ids[0]]);
}

#[tokio::test]
async fn stale_detection_reports_without_requeueing() {
    let store = memory_store();
    let job_id = insert_job(store.as_ref(), "stuck").await;
    store.claim_next("crashed-worker").await.unwrap().unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let stale = store
        .list_stale(chrono::Duration::milliseconds(1))
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, job_id);

    assert!(store.claim_next("other").await.unwrap().is_none());
    let job = store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::InProgress);
    assert_eq!(job.claimed_by.as_deref(), Some("crashed-worker"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn pg_concurrent_claimers_never_share_a_job() {
    let Some(pool) = setup_db().await else {
        return;
    };
    let store: Arc<dyn JobStore> = Arc::new(JobsRepo::new(pool));
    for round in 0..200 {
        assert_eq!(race_once(store.clone()).await, 1, "round {round}");
    }
}

#[tokio::test]
#[serial]
async fn pg_claim_order_is_priority_then_fifo() {
    let Some(pool) = setup_db().await else {
        return;
    };
    let repo = JobsRepo::new(pool);

    // one transaction, so created_at ties and seq breaks them
    let ids = repo
        .enqueue_batch(
            Uuid::new_v4(),
            &[
                NewJob::new("a", json!({}), 1),
                NewJob::new("b", json!({}), 10),
                NewJob::new("c", json!({}), 5),
                NewJob::new("d", json!({}), 10),
            ],
        )
        .await
        .unwrap();

    let mut claimed = Vec::new();
    while let Some(job) = repo.claim_next("w").await.unwrap() {
        assert_eq!(job.status, JobStatus::InProgress);
        assert!(job.started_at.is_some());
        claimed.push(job.id);
    }
    assert_eq!(claimed, vec![ids[1], ids[3], ids[2], ids[0]]);
}

#[tokio::test]
#[serial]
async fn pg_finish_is_guarded_by_owner_and_status() {
    let Some(pool) = setup_db().await else {
        return;
    };
    let repo = JobsRepo::new(pool);
    let (_, job_id) = insert_one(&repo, "guarded", json!({}), 0).await;

    assert!(!repo.mark_completed(job_id, "w-1", &json!(1)).await.unwrap());

    repo.claim_next("w-1").await.unwrap().unwrap();
    assert!(!repo.mark_failed(job_id, "w-2", "HANDLER_FAILED: nope").await.unwrap());
    assert!(repo.mark_failed(job_id, "w-1", "HANDLER_FAILED: nope").await.unwrap());
    assert!(!repo.mark_completed(job_id, "w-1", &json!(1)).await.unwrap());

    let job = repo.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.error.as_deref(), Some("HANDLER_FAILED: nope"));
    assert!(job.result_json.is_none());
    assert!(job.finished_at.is_some());
}
