//! Graceful degradation: fallback registry and degraded-service overlay.

use std::{
    any::Any,
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::Arc,
    time::Instant,
};

use parking_lot::RwLock;
use tracing::{error, info, warn};

type BoxedFallback<T> = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = T> + Send>> + Send + Sync>;

/// A service currently operating in degraded mode.
#[derive(Debug, Clone)]
pub struct DegradedService {
    pub reason: String,
    pub since: Instant,
}

/// Fallback registry plus an overlay of services marked degraded.
///
/// Fallbacks are registered per service name with the value type of the call
/// site; a lookup with a mismatched type behaves as if no fallback were
/// registered (and logs the mismatch).
#[derive(Default)]
pub struct GracefulDegradation {
    fallbacks: RwLock<HashMap<String, Box<dyn Any + Send + Sync>>>,
    degraded: RwLock<HashMap<String, DegradedService>>,
}

impl GracefulDegradation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fallback producing `T` for the named service.
    pub fn register_fallback<T, F, Fut>(&self, service: &str, fallback: F)
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let boxed: BoxedFallback<T> = Arc::new(move || Box::pin(fallback()));
        self.fallbacks
            .write()
            .insert(service.to_string(), Box::new(boxed));
    }

    /// Invoke the registered fallback for `service`, if any.
    pub async fn fallback_value<T>(&self, service: &str) -> Option<T>
    where
        T: Send + 'static,
    {
        let fallback = {
            let fallbacks = self.fallbacks.read();
            let entry = fallbacks.get(service)?;
            match entry.downcast_ref::<BoxedFallback<T>>() {
                Some(f) => Arc::clone(f),
                None => {
                    error!(
                        service = %service,
                        "Registered fallback has a different value type than the call site"
                    );
                    return None;
                }
            }
        };
        Some(fallback().await)
    }

    /// Run `primary`; on error invoke the registered fallback, or rethrow
    /// when none is registered.
    pub async fn execute_with_fallback<T, E, F, Fut>(
        &self,
        service: &str,
        primary: F,
    ) -> Result<T, E>
    where
        T: Send + 'static,
        E: std::fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match primary().await {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(service = %service, error = %err, "Primary operation failed");
                match self.fallback_value::<T>(service).await {
                    Some(value) => Ok(value),
                    None => Err(err),
                }
            }
        }
    }

    /// Mark a service degraded. Idempotent; the first reason wins until the
    /// service is restored.
    pub fn degrade_service(&self, service: &str, reason: &str) {
        let mut degraded = self.degraded.write();
        degraded
            .entry(service.to_string())
            .or_insert_with(|| {
                warn!(service = %service, reason = %reason, "Service marked degraded");
                DegradedService {
                    reason: reason.to_string(),
                    since: Instant::now(),
                }
            });
    }

    pub fn restore_service(&self, service: &str) {
        if self.degraded.write().remove(service).is_some() {
            info!(service = %service, "Service restored");
        }
    }

    pub fn is_degraded(&self, service: &str) -> bool {
        self.degraded.read().contains_key(service)
    }

    pub fn degraded_services(&self) -> HashMap<String, DegradedService> {
        self.degraded.read().clone()
    }
}
