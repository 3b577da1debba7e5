use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Rate limiting configuration for administrative commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Cooldown for destructive admin commands (initialize, reset).
    #[serde(default = "default_admin_cooldown")]
    pub admin_cooldown_secs: u64,

    /// Cooldown for the remaining admin commands (modify, setup, ptb).
    #[serde(default = "default_command_cooldown")]
    pub command_cooldown_secs: u64,

    /// Bucket entries older than this are purged by the hourly cleanup.
    #[serde(default = "default_max_age_hours")]
    pub cleanup_max_age_hours: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            admin_cooldown_secs: default_admin_cooldown(),
            command_cooldown_secs: default_command_cooldown(),
            cleanup_max_age_hours: default_max_age_hours(),
        }
    }
}

impl RateLimitConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.cleanup_max_age_hours == 0 {
            return Err(ConfigError::Validation(
                "rate_limits.cleanup_max_age_hours must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_admin_cooldown() -> u64 {
    600
}

fn default_command_cooldown() -> u64 {
    300
}

fn default_max_age_hours() -> u64 {
    24
}
