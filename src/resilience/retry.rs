//! Retry with exponential backoff and jitter.

use std::{future::Future, time::Duration};

use rand::Rng;
use tracing::{debug, warn};

use crate::config::ResilienceConfig;

/// Exponential backoff retry policy.
///
/// Between attempt `n` and `n + 1` the policy sleeps
/// `min(base_delay * exp_base^n, max_delay)` plus up to 10% jitter. The last
/// failure is returned to the caller unchanged.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    exp_base: f64,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, exp_base: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            exp_base,
            max_delay,
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(
            config.retry_max_attempts,
            Duration::from_millis(config.retry_base_delay_ms),
            2.0,
            Duration::from_millis(config.retry_max_delay_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff delay after the given zero-based attempt, without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.exp_base.powi(attempt as i32);
        let delay = self.base_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..0.1);
        delay + delay.mul_f64(jitter)
    }

    /// Attempt `operation` up to `max_attempts` times.
    pub async fn retry_with_backoff<T, E, F, Fut>(
        &self,
        operation_name: &str,
        operation: &F,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            operation = %operation_name,
                            attempt = attempt + 1,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        warn!(
                            operation = %operation_name,
                            attempts = attempt,
                            error = %err,
                            "Operation failed after all retry attempts"
                        );
                        return Err(err);
                    }

                    let delay = self.jittered(self.delay_for_attempt(attempt - 1));
                    debug!(
                        operation = %operation_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(1),
            2.0,
            Duration::from_millis(4),
        )
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let policy = fast_policy(3);
        let result: Result<&str, String> = policy
            .retry_with_backoff("op", &|| async { Ok("success") })
            .await;
        assert_eq!(result.unwrap(), "success");
    }

    #[tokio::test]
    async fn test_success_after_failures() {
        let policy = fast_policy(3);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result: Result<&str, String> = policy
            .retry_with_backoff("op", &move || {
                let calls = calls_in.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok("success")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let policy = fast_policy(2);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result: Result<(), String> = policy
            .retry_with_backoff("op", &move || {
                let calls = calls_in.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(format!("failure {n}"))
                }
            })
            .await;

        assert_eq!(result.unwrap_err(), "failure 2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), 2.0, Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        // Capped at max_delay.
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), 2.0, Duration::from_secs(1));
        for _ in 0..50 {
            let d = policy.jittered(Duration::from_millis(100));
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(110));
        }
    }
}
