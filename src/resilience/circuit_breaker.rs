//! Circuit breaker state machine.
//!
//! # States
//!
//! - **Closed**: normal operation, failures are counted.
//! - **Open**: after `failure_threshold` failures, calls are rejected until
//!   `open_timeout` has elapsed since the last failure.
//! - **HalfOpen**: after the timeout, probes are allowed; `half_open_max_calls`
//!   consecutive successes close the circuit, any failure reopens it.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ResilienceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    /// Remaining successful probes required to close from HalfOpen.
    half_open_remaining: u32,
}

/// Point-in-time view of a breaker, for metrics snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
}

/// Thread-safe circuit breaker for a single service.
#[derive(Debug)]
pub struct CircuitBreaker {
    service_name: String,
    failure_threshold: u32,
    open_timeout: Duration,
    half_open_max_calls: u32,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(
        service_name: impl Into<String>,
        failure_threshold: u32,
        open_timeout: Duration,
        half_open_max_calls: u32,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            failure_threshold,
            open_timeout,
            half_open_max_calls: half_open_max_calls.max(1),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                half_open_remaining: 0,
            }),
        }
    }

    pub fn from_config(service_name: impl Into<String>, config: &ResilienceConfig) -> Self {
        Self::new(
            service_name,
            config.failure_threshold,
            Duration::from_secs(config.open_timeout_secs),
            config.half_open_max_calls,
        )
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Whether calls are currently rejected. An expired open window flips
    /// the breaker to HalfOpen as a side effect of the probe.
    pub fn is_open(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return false;
        }

        let elapsed = inner
            .last_failure_time
            .map(|t| t.elapsed())
            .unwrap_or(Duration::MAX);
        if elapsed > self.open_timeout {
            inner.state = CircuitState::HalfOpen;
            inner.half_open_remaining = self.half_open_max_calls;
            info!(
                service = %self.service_name,
                "Circuit breaker entering HALF_OPEN state"
            );
            return false;
        }
        true
    }

    /// Check whether a call may proceed. `Err` carries the remaining open
    /// window in whole seconds.
    pub fn check(&self) -> Result<(), u64> {
        if !self.is_open() {
            return Ok(());
        }
        let inner = self.inner.lock();
        let retry_after = inner
            .last_failure_time
            .map(|t| self.open_timeout.saturating_sub(t.elapsed()).as_secs())
            .unwrap_or(self.open_timeout.as_secs());
        Err(retry_after)
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_remaining = inner.half_open_remaining.saturating_sub(1);
                if inner.half_open_remaining == 0 {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    info!(
                        service = %self.service_name,
                        "Circuit breaker CLOSED - service recovered"
                    );
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure_time = Some(Instant::now());

        let reopen = inner.state == CircuitState::HalfOpen;
        if reopen || inner.failure_count >= self.failure_threshold {
            if inner.state != CircuitState::Open {
                warn!(
                    service = %self.service_name,
                    failures = inner.failure_count,
                    timeout_secs = self.open_timeout.as_secs(),
                    "Circuit breaker OPEN - service temporarily unavailable"
                );
            }
            inner.state = CircuitState::Open;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            service: self.service_name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
        }
    }
}

/// Registry of per-service circuit breakers.
///
/// Cloneable handle over shared state; breakers are created lazily from the
/// configured defaults on first use.
#[derive(Clone)]
pub struct BreakerRegistry {
    defaults: Arc<ResilienceConfig>,
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(defaults: ResilienceConfig) -> Self {
        Self {
            defaults: Arc::new(defaults),
            breakers: Arc::new(DashMap::new()),
        }
    }

    /// Register a breaker with explicit settings, replacing any existing one.
    pub fn register(&self, breaker: CircuitBreaker) {
        self.breakers
            .insert(breaker.service_name().to_string(), Arc::new(breaker));
    }

    pub fn get(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service).map(|b| Arc::clone(&b))
    }

    /// Get the service's breaker, creating it from the defaults if absent.
    pub fn get_or_default(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(b) = self.breakers.get(service) {
            return Arc::clone(&b);
        }
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::from_config(service, &self.defaults)))
            .clone()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.iter().map(|b| b.snapshot()).collect()
    }
}
