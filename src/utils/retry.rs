//! Retry logic for session establishment with exponential backoff.

use crate::core::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Short delays, for tests and local transports.
    pub fn quick() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    /// Calculate the delay after a given failed attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.add_jitter {
            // up to 25%
            delay_secs + delay_secs * 0.25 * rand_jitter()
        } else {
            delay_secs
        };

        Duration::from_secs_f64(final_delay)
    }
}

/// Pseudo-random jitter in `0.0..1.0` from the clock.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

/// Execute an async operation with retries.
///
/// Non-retryable errors are returned immediately. When attempts run out the
/// last error is returned unchanged, so callers still see its category.
pub async fn retry_async<T, F, Fut, R>(
    operation_name: &str,
    config: RetryConfig,
    should_retry: R,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Fn(&Error) -> bool,
{
    let start = std::time::Instant::now();
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    log::info!(
                        "{} succeeded on attempt {} after {:?}",
                        operation_name,
                        attempt,
                        start.elapsed()
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt >= max_attempts {
                    log::warn!("{} failed after {} attempts: {}", operation_name, attempt, e);
                    return Err(e);
                }

                if !should_retry(&e) {
                    log::debug!("{} failed with non-retryable error: {}", operation_name, e);
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                log::debug!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    operation_name,
                    attempt,
                    max_attempts,
                    delay,
                    e
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: false,
            ..Default::default()
        };

        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let result = retry_async("noop", RetryConfig::quick(), |_| true, || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_exhausted_returns_last_error() {
        let mut attempts = 0;
        let result: Result<i32> = retry_async(
            "connect",
            RetryConfig::quick().with_max_attempts(2),
            |e| e.is_retryable(),
            || {
                attempts += 1;
                async { Err(Error::connect("example.org", "refused")) }
            },
        )
        .await;

        assert!(matches!(result, Err(Error::RemoteConnect { .. })));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let mut attempts = 0;
        let result: Result<i32> = retry_async(
            "connect",
            RetryConfig::quick(),
            |e| e.is_retryable(),
            || {
                attempts += 1;
                async { Err(Error::MissingScanConfig { scan_id: "s-1".into() }) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
