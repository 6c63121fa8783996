use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{collections::HashMap, pin::Pin, sync::Arc, time::Duration};
use tokio::{sync::Semaphore, time::timeout};

use crate::jobs::error_codes::{ErrorCode, JobError};

pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
pub type HandlerResult = Result<Value, JobError>;
type HandlerFn = dyn Fn(Value) -> BoxFuture<'static, HandlerResult> + Send + Sync;

#[derive(Clone)]
pub struct HandlerEntry {
    pub handler: Arc<HandlerFn>,
    pub semaphore: Option<Arc<Semaphore>>,
    pub timeout: Option<Duration>,
}

/// Maps a job type to the handler that executes it.
///
/// Built once at startup and handed to the engine; nothing here is process-global, so
/// independent engines (tests included) never see each other's handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Last registration for a type wins.
    pub fn register<F>(&mut self, job_type: &str, handler: F)
    where
        F: Fn(Value) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static,
    {
        self.register_with_options(job_type, handler, HandlerOptions::new());
    }

    pub fn register_with_options<F>(&mut self, job_type: &str, handler: F, opts: HandlerOptions)
    where
        F: Fn(Value) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static,
    {
        let semaphore = opts
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        let replaced = self
            .handlers
            .insert(
                job_type.to_string(),
                HandlerEntry {
                    handler: Arc::new(handler),
                    semaphore,
                    timeout: opts.timeout,
                },
            )
            .is_some();

        if replaced {
            tracing::debug!(job_type, "handler re-registered, previous binding replaced");
        }
    }

    pub fn resolve(&self, job_type: &str) -> Option<HandlerEntry> {
        self.handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct HandlerOptions {
    max_concurrency: Option<usize>,
    timeout: Option<Duration>,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self {
            max_concurrency: None,
            timeout: None,
        }
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    pub fn timeout(mut self, dur: Duration) -> Self {
        self.timeout = Some(dur);
        self
    }
}

impl HandlerEntry {
    pub async fn run(&self, payload: Value) -> HandlerResult {
        let _permit = match &self.semaphore {
            Some(sem) => Some(sem.clone().acquire_owned().await.map_err(|_| {
                JobError::new(ErrorCode::WorkerShutdown, "handler semaphore closed")
            })?),
            None => None,
        };

        let fut = (self.handler)(payload);
        match self.timeout {
            Some(dur) => match timeout(dur, fut).await {
                Ok(inner) => inner,
                Err(_) => Err(JobError::new(
                    ErrorCode::Timeout,
                    format!("handler timeout after {}ms", dur.as_millis()),
                )),
            },
            None => fut.await,
        }
    }
}

pub fn boxed<T>(fut: impl std::future::Future<Output = T> + Send + 'static) -> BoxFuture<'static, T> {
    Box::pin(fut)
}

/// Deserialize a handler payload, mapping failures to `BAD_PAYLOAD`.
pub fn parse_payload<T: DeserializeOwned>(payload: Value) -> Result<T, JobError> {
    serde_json::from_value(payload).map_err(JobError::bad_payload)
}
