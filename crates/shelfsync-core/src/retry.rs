//! Bounded retry with exponential backoff and jitter for store calls.
//!
//! Each attempt runs under its own timeout. Only errors for which
//! [`SyncError::is_retryable`] holds are retried; once the budget is spent the
//! last error is returned and the caller records the item as failed.

use crate::error::{Result, SyncError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Whether to add random jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
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

    /// Delay before retry number `attempt` (0-indexed): `base * 2^attempt`,
    /// capped, optionally scaled by a random factor in `0.5..1.5`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2f64.powi(attempt as i32);
        let capped_secs =
            (self.base_delay.as_secs_f64() * multiplier).min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            let factor = rand::rng().random_range(0.5..1.5);
            (capped_secs * factor).min(self.max_delay.as_secs_f64())
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }
}

/// Run `operation` with a per-attempt `timeout`, retrying transient failures.
///
/// `label` names the operation in log lines (e.g. `"head artist/book/Song.pdf"`).
pub async fn retry_with_timeout<F, Fut, T>(
    config: &RetryConfig,
    timeout: Duration,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.max_attempts.max(1);

    for attempt in 0..attempts {
        let outcome = match tokio::time::timeout(timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(timeout)),
        };

        match outcome {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} attempts", label, attempt + 1);
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt + 1 >= attempts => {
                warn!("{}: all {} attempts exhausted: {}", label, attempts, e);
                return Err(e);
            }
            Err(e) => {
                let delay = config.calculate_delay(attempt);
                warn!(
                    "{}: attempt {}/{} failed: {}. Retrying in {:?}",
                    label,
                    attempt + 1,
                    attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(SyncError::Other(format!("{}: retry loop exited without result", label)))
}
