use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use taskflow::config;
use taskflow::db;
use taskflow::jobs::{BatchTracker, EngineConfig, JobStore, JobsRepo, WorkerEngine};

mod handlers;
use handlers::{build_registry, HandlerContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::from_env()?;
    taskflow::logging::init("info");

    let project_root = std::env::var("TASKFLOW_PROJECT_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
    let stale_after_minutes: i64 = std::env::var("TASKFLOW_STALE_AFTER_MINUTES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    tracing::info!(
        worker_id = %cfg.worker_id,
        workers = cfg.workers,
        poll_interval_ms = cfg.poll_interval_ms,
        handler_timeout_secs = ?cfg.handler_timeout_secs,
        project_root = %project_root.display(),
        migrate_on_startup = cfg.migrate_on_startup,
        "taskflow worker starting"
    );

    let pool = db::make_pool(&cfg.database_url, cfg.workers).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let store: Arc<dyn JobStore> = Arc::new(JobsRepo::new(pool.clone()));

    // jobs left in_progress by a crashed process are reported, never requeued
    let stale = BatchTracker::new(store.clone())
        .stale_in_progress(chrono::Duration::minutes(stale_after_minutes))
        .await?;
    for job in &stale {
        tracing::warn!(
            job_id = %job.id,
            batch_id = %job.batch_id,
            job_type = %job.job_type,
            claimed_by = job.claimed_by.as_deref().unwrap_or("-"),
            "job stuck in_progress"
        );
    }

    let registry = build_registry(
        HandlerContext { root: project_root },
        cfg.handler_timeout_secs.map(Duration::from_secs),
    )?;

    let engine = WorkerEngine::new(store, registry, EngineConfig::from(&cfg));
    let running = engine.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested, waiting for in-flight jobs");

    let report = running.stop().await?;
    for w in &report.workers {
        tracing::info!(
            worker_id = %w.worker_id,
            claimed = w.claimed,
            completed = w.completed,
            failed = w.failed,
            storage_errors = w.storage_errors,
            abandoned_outcomes = w.abandoned_outcomes,
            "worker summary"
        );
    }

    Ok(())
}
