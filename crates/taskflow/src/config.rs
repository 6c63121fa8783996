// Runtime settings for the worker binary and the CLI.
// Read from the environment (and .env via dotenvy); `TASKFLOW_*` keys win over bare ones.

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    /// Prefix for worker ids, each loop appends `-{n}`.
    pub worker_id: String,
    pub workers: usize,
    pub poll_interval_ms: u64,
    /// `None` disables the per-handler timeout.
    pub handler_timeout_secs: Option<u64>,
    pub project_id: Option<String>,
    pub migrate_on_startup: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_id = env_or_fallback("TASKFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker".to_string());

        let workers = env_or_fallback("TASKFLOW_WORKERS", "WORKERS")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(4)
            .clamp(1, 64);

        let poll_interval_ms = env_or_fallback("TASKFLOW_POLL_INTERVAL_MS", "POLL_INTERVAL_MS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(250)
            .max(1);

        let handler_timeout_secs = std::env::var("TASKFLOW_HANDLER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map_or(Some(60), |secs| (secs > 0).then_some(secs));

        let project_id = std::env::var("TASKFLOW_PROJECT_ID")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let migrate_on_startup = env_bool("TASKFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        Ok(Self {
            database_url,
            worker_id,
            workers,
            poll_interval_ms,
            handler_timeout_secs,
            project_id,
            migrate_on_startup,
        })
    }
}

pub(crate) fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
