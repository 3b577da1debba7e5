//! Aggregated health probe.
//!
//! Each component exposes its own metrics snapshot; this module folds them
//! into a coarse three-band status per component plus the raw numbers, for
//! consumption by an operator command or external probe.

use std::time::Duration;

use serde::Serialize;

/// Coarse component status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentHealth {
    Healthy,
    Warning,
    Error,
}

/// Aggregated process health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub db: ComponentHealth,
    pub scheduler: ComponentHealth,
    pub cache: ComponentHealth,
    /// DB ping latency in milliseconds, if the ping succeeded.
    pub db_latency_ms: Option<u64>,
    /// Scheduler failure rate over recorded executions, 0.0–1.0.
    pub scheduler_failure_rate: f64,
    /// Cache hit rate over recorded lookups, 0.0–1.0.
    pub cache_hit_rate: f64,
}

/// Band a DB ping latency: 0–1 s healthy, 1–5 s warning, above (or failed)
/// error.
pub fn db_latency_band(latency: Option<Duration>) -> ComponentHealth {
    match latency {
        Some(d) if d <= Duration::from_secs(1) => ComponentHealth::Healthy,
        Some(d) if d <= Duration::from_secs(5) => ComponentHealth::Warning,
        _ => ComponentHealth::Error,
    }
}

/// Band a scheduler failure rate: warn above 10%, error above 20%.
pub fn scheduler_band(successes: u64, failures: u64) -> (ComponentHealth, f64) {
    let total = successes + failures;
    if total == 0 {
        return (ComponentHealth::Healthy, 0.0);
    }
    let rate = failures as f64 / total as f64;
    let band = if rate > 0.2 {
        ComponentHealth::Error
    } else if rate > 0.1 {
        ComponentHealth::Warning
    } else {
        ComponentHealth::Healthy
    };
    (band, rate)
}

/// Band a cache hit rate. Low hit rates only matter once there is real
/// traffic, so fewer than 100 lookups always report healthy.
pub fn cache_band(hits: u64, misses: u64) -> (ComponentHealth, f64) {
    let total = hits + misses;
    if total == 0 {
        return (ComponentHealth::Healthy, 0.0);
    }
    let rate = hits as f64 / total as f64;
    let band = if total >= 100 && rate < 0.5 {
        ComponentHealth::Warning
    } else {
        ComponentHealth::Healthy
    };
    (band, rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_latency_bands() {
        assert_eq!(
            db_latency_band(Some(Duration::from_millis(200))),
            ComponentHealth::Healthy
        );
        assert_eq!(
            db_latency_band(Some(Duration::from_secs(1))),
            ComponentHealth::Healthy
        );
        assert_eq!(
            db_latency_band(Some(Duration::from_secs(3))),
            ComponentHealth::Warning
        );
        assert_eq!(
            db_latency_band(Some(Duration::from_secs(6))),
            ComponentHealth::Error
        );
        assert_eq!(db_latency_band(None), ComponentHealth::Error);
    }

    #[test]
    fn test_scheduler_bands() {
        assert_eq!(scheduler_band(0, 0).0, ComponentHealth::Healthy);
        assert_eq!(scheduler_band(95, 5).0, ComponentHealth::Healthy);
        assert_eq!(scheduler_band(85, 15).0, ComponentHealth::Warning);
        assert_eq!(scheduler_band(70, 30).0, ComponentHealth::Error);
    }

    #[test]
    fn test_cache_band_needs_traffic() {
        // 10 lookups at 0% hit rate: not enough traffic to flag.
        assert_eq!(cache_band(0, 10).0, ComponentHealth::Healthy);
        assert_eq!(cache_band(30, 90).0, ComponentHealth::Warning);
        assert_eq!(cache_band(90, 30).0, ComponentHealth::Healthy);
    }
}
