//! Retry utilities with optional exponential backoff and jitter.
//!
//! Preparation steps use two shapes of retry: a single fresh re-attempt with
//! no delay (mock fixture setup) and a bounded fixed-interval poll
//! (reachability checks). Both are expressed as a [`RetryConfig`].
//!
//! # Example
//!
//! ```ignore
//! use eventing_prep_common::retry::{retry_with_backoff, RetryConfig};
//!
//! let host = retry_with_backoff(
//!     &RetryConfig::fixed(5, Duration::from_secs(2)),
//!     "check_reachable",
//!     || async { functions.check_reachable(name, ns, host).await },
//! ).await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts including the first one (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between attempts
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (1.0 = fixed interval)
    pub backoff_multiplier: f64,
    /// Whether to apply 0.5x..1.5x jitter to each delay
    pub jitter: bool,
}

impl RetryConfig {
    /// One fresh re-attempt immediately after the first failure
    pub fn single_retry() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Bounded poll: `attempts` tries spaced by a fixed `interval`
    pub fn fixed(attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: interval,
            max_delay: interval,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

/// Execute an async operation until it succeeds or the attempt budget runs out.
///
/// Returns the result of the operation, or the last error if `max_attempts`
/// is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let wait = if config.jitter {
                    let factor = rand::thread_rng().gen_range(0.5..1.5);
                    Duration::from_secs_f64(delay.as_secs_f64() * factor)
                } else {
                    delay
                };

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = wait.as_millis(),
                    "Operation failed, retrying"
                );

                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let result: Result<i32, &str> =
            retry_with_backoff(&fast(3), "op", || async { Ok(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, &str> = retry_with_backoff(&fast(5), "op", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("fail")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_max_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, &str> = retry_with_backoff(&fast(3), "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err("always fails")
            }
        })
        .await;

        assert_eq!(result, Err("always fails"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn single_retry_makes_exactly_two_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), String> =
            retry_with_backoff(&RetryConfig::single_retry(), "fixture", || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    Err(format!("attempt {n}"))
                }
            })
            .await;

        assert_eq!(result, Err("attempt 1".to_string()));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_interval_does_not_grow() {
        let config = RetryConfig::fixed(4, Duration::from_secs(2));
        let start = tokio::time::Instant::now();

        let result: Result<(), &str> =
            retry_with_backoff(&config, "poll", || async { Err("down") }).await;

        assert!(result.is_err());
        // 3 waits of exactly 2s between 4 attempts
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }
}
