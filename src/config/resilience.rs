use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Defaults for circuit breakers and retry policies guarding outbound
/// services (the database breaker has its own settings under `[database]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResilienceConfig {
    /// Consecutive failures before a service breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open breaker waits before allowing a probe.
    #[serde(default = "default_open_timeout")]
    pub open_timeout_secs: u64,

    /// Successful probes required in HALF_OPEN before the breaker closes.
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,

    /// Retry attempts for wrapped operations.
    #[serde(default = "default_max_attempts")]
    pub retry_max_attempts: u32,

    /// Base delay of the exponential backoff, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Backoff delay cap, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_timeout_secs: default_open_timeout(),
            half_open_max_calls: default_half_open_max_calls(),
            retry_max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ResilienceConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "resilience.failure_threshold must be at least 1".into(),
            ));
        }
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::Validation(
                "resilience.retry_max_attempts must be at least 1".into(),
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::Validation(
                "resilience.retry_base_delay_ms cannot exceed retry_max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_open_timeout() -> u64 {
    60
}

fn default_half_open_max_calls() -> u32 {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}
