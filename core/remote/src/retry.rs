//! Retry strategy with exponential backoff and per-call timeouts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use tasksync_common::{Error, OwnerId, RemoteId, Result, TaskFields, Timestamp};

use crate::client::{RemoteAck, RemoteRecord, RemoteStore};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call.
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay (cap for exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
    /// Budget for a single call; exceeding it counts as `RemoteUnavailable`.
    pub call_timeout: Duration,
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
            call_timeout: Duration::from_secs(10),
        }
    }

    /// Set initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the per-call timeout.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Calculate delay for a given attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // Add random jitter of +/- 25%
            let jitter_factor = 0.75 + (rand::random::<f64>() * 0.5);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(2)
    }
}

/// Retry executor for running remote calls with timeout and retry logic.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute an operation with retry logic.
    ///
    /// Each attempt is bounded by `call_timeout`. Transient failures are
    /// retried up to `max_retries` times; permanent ones return at once.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            let outcome = match timeout(self.config.call_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(Error::RemoteUnavailable(format!(
                    "call timed out after {:?}",
                    self.config.call_timeout
                ))),
            };

            match outcome {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !err.is_transient() {
                        return Err(err);
                    }

                    attempt += 1;
                    if attempt > self.config.max_retries {
                        warn!(
                            "Operation failed after {} attempts: {}",
                            attempt, err
                        );
                        return Err(err);
                    }

                    let delay = self.config.delay_for_attempt(attempt - 1);
                    debug!(
                        "Attempt {} failed: {}. Retrying in {:?}...",
                        attempt, err, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Get the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

/// Convenience function for simple retry with defaults.
pub async fn retry<F, Fut, T>(operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryExecutor::default().execute(operation).await
}

/// Remote client decorator adding timeouts and transient-fault retries.
pub struct RetryingRemote<R: RemoteStore + ?Sized> {
    inner: Arc<R>,
    executor: RetryExecutor,
}

impl<R: RemoteStore + ?Sized> RetryingRemote<R> {
    /// Wrap `inner` with the given retry policy.
    pub fn new(inner: Arc<R>, config: RetryConfig) -> Self {
        Self {
            inner,
            executor: RetryExecutor::new(config),
        }
    }

    /// The wrapped client.
    pub fn inner(&self) -> &Arc<R> {
        &self.inner
    }
}

#[async_trait]
impl<R: RemoteStore + ?Sized> RemoteStore for RetryingRemote<R> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn create(&self, owner_id: &OwnerId, fields: &TaskFields) -> Result<RemoteAck> {
        self.executor
            .execute(|| self.inner.create(owner_id, fields))
            .await
    }

    async fn update(&self, remote_id: &RemoteId, fields: &TaskFields) -> Result<RemoteAck> {
        self.executor
            .execute(|| self.inner.update(remote_id, fields))
            .await
    }

    async fn delete(&self, remote_id: &RemoteId) -> Result<()> {
        self.executor.execute(|| self.inner.delete(remote_id)).await
    }

    async fn list_modified_since(
        &self,
        owner_id: &OwnerId,
        cursor: Timestamp,
    ) -> Result<Vec<RemoteRecord>> {
        self.executor
            .execute(|| self.inner.list_modified_since(owner_id, cursor))
            .await
    }
}
