//! Bounded exponential backoff for transient storage failures.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::app_config::ExecutorConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ExecutorConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
        }
    }

    /// Delay before retry number `retry` (0-based), capped at `max_delay`.
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(32) as i32);
        let delay_ms = self.initial_delay.as_millis() as f64 * factor;
        let delay = Duration::from_millis(delay_ms.min(u64::MAX as f64) as u64);
        delay.min(self.max_delay)
    }
}

/// Runs `operation` until it succeeds, returns a non-retryable error, or the
/// attempt budget is spent. `on_retry` is told about every replay.
pub async fn retry_with_predicate<F, Fut, T, E, P, R>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
    mut on_retry: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
    R: FnMut(usize, &E),
{
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !is_retryable(&err) => return Err(err),
            Err(err) if attempt >= policy.max_attempts => {
                tracing::error!(attempt, error = %err, "operation failed after max attempts");
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for_retry(attempt - 1);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                on_retry(attempt, &err);
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_retry(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_retry(60), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicUsize::new(0);
        let mut retries = 0;

        let result = retry_with_predicate(
            &fast_policy(3),
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("deadlock #{n}"))
                } else {
                    Ok(7)
                }
            },
            |_: &String| true,
            |_, _| retries += 1,
        )
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn stops_at_attempt_budget() {
        let calls = AtomicUsize::new(0);

        let result: Result<(), &str> = retry_with_predicate(
            &fast_policy(2),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("serialization failure")
            },
            |_| true,
            |_, _| {},
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_runs_once() {
        let calls = AtomicUsize::new(0);

        let result: Result<(), &str> = retry_with_predicate(
            &fast_policy(5),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("no capacity")
            },
            |err: &&str| err.contains("deadlock"),
            |_, _| {},
        )
        .await;

        assert_eq!(result, Err("no capacity"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
