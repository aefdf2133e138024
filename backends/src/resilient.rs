use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use shardsnap_core::storage::{ObjectInfo, Storage};
use shardsnap_core::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Per-call deadline and retry schedule for a storage backend.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Deadline of a single attempt. A backend that does not answer in
    /// time counts as failed for that attempt.
    pub call_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            call_timeout: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    fn backoff_duration(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let duration_ms = base_ms.min(self.max_backoff.as_millis() as f64) as u64;
        let mut duration = Duration::from_millis(duration_ms);

        // Up to 25% on top, so backends retried together spread out.
        if self.jitter {
            let jitter_ms = rand::thread_rng().gen_range(0..=(duration_ms / 4));
            duration += Duration::from_millis(jitter_ms);
        }
        duration
    }

    /// Runs `operation` until it succeeds, fails permanently, or the
    /// attempts are exhausted.
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let error = match timeout(self.call_timeout, operation()).await {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        debug!(operation = operation_name, attempt = attempt + 1, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => Error::Backend(format!(
                    "{operation_name} timed out after {:?}",
                    self.call_timeout
                )),
            };

            attempt += 1;
            if !is_transient(&error) || attempt >= attempts {
                return Err(error);
            }

            let backoff = self.backoff_duration(attempt - 1);
            warn!(
                operation = operation_name,
                attempt,
                max_attempts = attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "Storage call failed, retrying"
            );
            sleep(backoff).await;
        }
    }
}

/// Whether retrying the same call can help.
pub fn is_transient(error: &Error) -> bool {
    match error {
        Error::Io(e) => !matches!(
            e.kind(),
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
        ),
        Error::Backend(msg) => {
            msg.contains("timed out")
                || msg.contains("temporarily unavailable")
                || msg.contains("try again")
                || msg.contains("Interrupted")
        }
        _ => false,
    }
}

/// Wraps a backend with [`RetryPolicy`] deadlines and retries.
pub struct ResilientStorage<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: Storage> ResilientStorage<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<S: Storage> Storage for ResilientStorage<S> {
    async fn init(&self) -> Result<()> {
        self.policy.run("init", || self.inner.init()).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.policy.run("exists", || self.inner.exists(key)).await
    }

    async fn read(&self, key: &str) -> Result<Bytes> {
        self.policy.run("read", || self.inner.read(key)).await
    }

    async fn write(&self, key: &str, data: Bytes) -> Result<()> {
        self.policy.run("write", || self.inner.write(key, data.clone())).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.policy.run("delete", || self.inner.delete(key)).await
    }

    async fn stat(&self, key: &str) -> Result<ObjectInfo> {
        self.policy.run("stat", || self.inner.stat(key)).await
    }

    async fn available_space(&self) -> Result<u64> {
        self.policy.run("available_space", || self.inner.available_space()).await
    }

    fn location(&self) -> String {
        self.inner.location()
    }

    fn protocols(&self) -> Vec<String> {
        self.inner.protocols()
    }
}
