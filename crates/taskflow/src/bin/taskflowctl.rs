use sqlx::{postgres::PgPoolOptions, PgPool};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use taskflow::jobs::{BatchTracker, DecomposeRequest, Decomposer, JobStore, JobsRepo};

const USAGE: &str = "taskflowctl <command>\n\
     Commands:\n\
     - reset\n\
     - decompose <request> [key=value ...]\n\
     - status <batch_id>\n\
     - results <batch_id>\n\
     - wait <batch_id> [timeout_secs]\n\
     - stale [minutes]\n\
     \n\
     Uses DATABASE_URL or TEST_DATABASE_URL.\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    taskflow::logging::init("warn");

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("{USAGE}");
        std::process::exit(2);
    }

    let url = env::var("DATABASE_URL")
        .or_else(|_| env::var("TEST_DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("DATABASE_URL or TEST_DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;
    taskflow::db::run_migrations(&pool).await?;

    let store: Arc<dyn JobStore> = Arc::new(JobsRepo::new(pool.clone()));
    let tracker = BatchTracker::new(store.clone());

    match args[1].as_str() {
        "reset" => reset(&pool).await?,
        "decompose" => {
            let request = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("usage: taskflowctl decompose <request> [key=value ...]"))?;
            let mut req = DecomposeRequest::new(request.as_str());
            for pair in &args[3..] {
                let (k, v) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("context must be key=value, got `{pair}`"))?;
                req = req.with_context(k, v);
            }

            let project = env::var("TASKFLOW_PROJECT_ID").ok();
            let outcome = Decomposer::new(store)
                .with_default_project(project)
                .decompose(&req)
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        "status" => {
            let batch_id = batch_arg(&args, "status")?;
            let summary = tracker.summary(batch_id).await?;
            println!(
                "batch {batch_id}: total={} pending={} in_progress={} completed={} failed={} done={}",
                summary.total,
                summary.pending,
                summary.in_progress,
                summary.completed,
                summary.failed,
                summary.is_done()
            );
        }
        "results" => {
            let batch_id = batch_arg(&args, "results")?;
            let results = tracker.collect_results(batch_id).await?;
            if !results.complete {
                eprintln!("warning: batch {batch_id} is not done, showing a partial snapshot");
            }
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        "wait" => {
            let batch_id = batch_arg(&args, "wait")?;
            let timeout_secs: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(60);
            let results = tracker
                .wait_until_done(
                    batch_id,
                    Duration::from_millis(500),
                    Duration::from_secs(timeout_secs),
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        "stale" => {
            let minutes: i64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(30);
            let stale = tracker
                .stale_in_progress(chrono::Duration::minutes(minutes))
                .await?;
            for job in &stale {
                println!(
                    "STALE: id={} batch={} type={} claimed_by={:?} attempts={} updated_at={}",
                    job.id, job.batch_id, job.job_type, job.claimed_by, job.attempts, job.updated_at
                );
            }
            println!("{} job(s) in_progress for more than {minutes} minute(s)", stale.len());
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn batch_arg(args: &[String], cmd: &str) -> anyhow::Result<Uuid> {
    let raw = args
        .get(2)
        .ok_or_else(|| anyhow::anyhow!("usage: taskflowctl {cmd} <batch_id>"))?;
    Ok(raw.parse()?)
}

async fn reset(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("TRUNCATE TABLE jobs RESTART IDENTITY")
        .execute(pool)
        .await?;

    println!("reset OK");
    Ok(())
}
