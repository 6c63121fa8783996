use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::config::env_or_fallback;

/// Pool sized for `workers` concurrent claimers plus headroom for reads.
pub async fn make_pool(database_url: &str, workers: usize) -> anyhow::Result<PgPool> {
    let default_max = (workers as u32).saturating_add(2);
    let max_connections = env_or_fallback("TASKFLOW_DB_MAX_CONNECTIONS", "DB_MAX_CONNECTIONS")
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(default_max)
        .clamp(1, 128);

    let acquire_timeout_secs =
        env_or_fallback("TASKFLOW_DB_ACQUIRE_TIMEOUT_SECS", "DB_ACQUIRE_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(10)
            .clamp(1, 60);

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(acquire_timeout_secs))
        .connect(database_url)
        .await?;

    tracing::debug!(max_connections, acquire_timeout_secs, "database pool ready");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("migrations applied");
    Ok(())
}
