//! Bounded retry with exponential backoff and jitter.
//!
//! Wraps any fallible async operation, most usefully the duplicate-store
//! round trip. Retrying is gated by a caller-supplied predicate; the
//! default predicate follows the error taxonomy, so permanent kinds
//! (validation, unsupported format, duplicate, missing file) are never
//! retried.

use rand::Rng;
use reportflow_core::{IngestError, Result, RetrySettings};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (0 = no retries).
    pub retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_factor: f64,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Scale each delay by a uniform factor in [0.75, 1.25].
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            ..Default::default()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            retries: settings.retries,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            backoff_factor: settings.backoff_factor,
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: settings.jitter,
        }
    }
}

/// Delay schedule derived from a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn default_config() -> Self {
        Self::new(RetryConfig::default())
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before retry `attempt` (1-indexed):
    /// `min(initial * factor^(attempt-1), max)`, jitter-scaled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self
            .config
            .initial_delay
            .mul_f64(self.config.backoff_factor.powi(attempt as i32 - 1));
        let capped = base.min(self.config.max_delay);

        if self.config.jitter {
            let scale = rand::thread_rng().gen_range(0.75..=1.25);
            capped.mul_f64(scale)
        } else {
            capped
        }
    }
}

/// Run `operation` with bounded retry. The operation is invoked at most
/// `retries + 1` times; the final failure is returned unchanged. Each
/// non-final failure is logged as "will retry", the final one as
/// exhausted or non-retryable.
pub async fn execute_with_retry<F, Fut, T, P>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: P,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&IngestError) -> bool,
{
    let retries = policy.config().retries;
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;

                if !should_retry(&err) {
                    error!(
                        error = %err,
                        code = err.code(),
                        attempts = attempt,
                        "operation failed with non-retryable error"
                    );
                    return Err(err);
                }
                if attempt > retries {
                    error!(
                        error = %err,
                        code = err.code(),
                        attempts = attempt,
                        "retries exhausted"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    error = %err,
                    code = err.code(),
                    attempt,
                    retries,
                    delay_ms = delay.as_millis() as u64,
                    "operation failed, will retry"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// [`execute_with_retry`] with the taxonomy's own retryability rule.
pub async fn execute_with_retry_default<F, Fut, T>(policy: &RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    execute_with_retry(policy, operation, IngestError::is_retryable).await
}
