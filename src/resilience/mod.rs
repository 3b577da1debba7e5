//! Resilience primitives for outbound integrations.
//!
//! Three building blocks, composable via [`resilient`]:
//!
//! - **Circuit breakers** trip OPEN after repeated failures and fail calls
//!   fast until a probe window elapses.
//! - **Retry policies** re-attempt transient failures with exponential
//!   backoff and jitter.
//! - **Graceful degradation** routes final failures through registered
//!   fallbacks and tracks which services are currently degraded.

mod circuit_breaker;
mod degradation;
mod retry;

use std::future::Future;

pub use circuit_breaker::{BreakerRegistry, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use degradation::{DegradedService, GracefulDegradation};
pub use retry::RetryPolicy;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResilientError<E> {
    #[error("Service '{service}' unavailable: circuit breaker open (retry in {retry_after_secs}s)")]
    CircuitOpen {
        service: String,
        retry_after_secs: u64,
    },

    #[error("{0}")]
    Operation(E),
}

/// Run `operation` under the named service's circuit breaker and the given
/// retry policy, routing final failure through the degradation registry.
///
/// The flow mirrors how feature modules wrap chat-platform calls:
/// 1. If the breaker is open, fail fast without attempting the call.
/// 2. Otherwise run the operation with retry; record the outcome on the
///    breaker.
/// 3. If all attempts failed and a fallback is registered for the service,
///    return the fallback's value; otherwise surface the last error.
pub async fn resilient<T, E, F, Fut>(
    service: &str,
    breakers: &BreakerRegistry,
    retry: &RetryPolicy,
    degradation: &GracefulDegradation,
    operation: F,
) -> Result<T, ResilientError<E>>
where
    T: Clone + Send + Sync + 'static,
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let breaker = breakers.get_or_default(service);
    if let Err(retry_after_secs) = breaker.check() {
        return Err(ResilientError::CircuitOpen {
            service: service.to_string(),
            retry_after_secs,
        });
    }

    match retry.retry_with_backoff(service, &operation).await {
        Ok(value) => {
            breaker.record_success();
            Ok(value)
        }
        Err(err) => {
            breaker.record_failure();
            if let Some(value) = degradation.fallback_value::<T>(service).await {
                tracing::warn!(
                    service = %service,
                    error = %err,
                    "Primary operation failed, serving registered fallback"
                );
                return Ok(value);
            }
            Err(ResilientError::Operation(err))
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
    use crate::config::ResilienceConfig;

    fn fast_config() -> ResilienceConfig {
        ResilienceConfig {
            failure_threshold: 2,
            open_timeout_secs: 60,
            half_open_max_calls: 1,
            retry_max_attempts: 2,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_resilient_success_path() {
        let config = fast_config();
        let breakers = BreakerRegistry::new(config.clone());
        let retry = RetryPolicy::from_config(&config);
        let degradation = GracefulDegradation::new();

        let result: Result<&str, ResilientError<String>> =
            resilient("chat_api", &breakers, &retry, &degradation, || async {
                Ok("ok")
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(
            breakers.get_or_default("chat_api").state(),
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn test_resilient_fail_fast_when_open() {
        let config = fast_config();
        let breakers = BreakerRegistry::new(config.clone());
        let retry = RetryPolicy::from_config(&config);
        let degradation = GracefulDegradation::new();

        let breaker = breakers.get_or_default("chat_api");
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result: Result<(), ResilientError<String>> =
            resilient("chat_api", &breakers, &retry, &degradation, move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(ResilientError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "open breaker must not invoke the operation");
    }

    #[tokio::test]
    async fn test_resilient_uses_fallback_after_retries() {
        let config = fast_config();
        let breakers = BreakerRegistry::new(config.clone());
        let retry = RetryPolicy::from_config(&config);
        let degradation = GracefulDegradation::new();
        degradation.register_fallback("chat_api", || async { "fallback".to_string() });

        let result: Result<String, ResilientError<String>> =
            resilient("chat_api", &breakers, &retry, &degradation, || async {
                Err("down".to_string())
            })
            .await;

        assert_eq!(result.unwrap(), "fallback");
    }

    #[tokio::test]
    async fn test_resilient_surfaces_last_error_without_fallback() {
        let config = fast_config();
        let breakers = BreakerRegistry::new(config.clone());
        let retry = RetryPolicy::from_config(&config);
        let degradation = GracefulDegradation::new();

        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_in = attempts.clone();
        let result: Result<(), ResilientError<String>> =
            resilient("chat_api", &breakers, &retry, &degradation, move || {
                let attempts = attempts_in.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(format!("failure {n}"))
                }
            })
            .await;

        match result {
            Err(ResilientError::Operation(msg)) => assert_eq!(msg, "failure 2"),
            other => panic!("expected last operation error, got {other:?}"),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
