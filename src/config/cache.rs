use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Cache maintenance configuration.
///
/// Category TTLs are fixed (see `cache::categories`); this section only
/// tunes the background maintenance cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Seconds between maintenance passes (expired-entry cleanup, hot-key
    /// recomputation, predictive preload scheduling).
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,

    /// Number of most-active guilds whose common keys are preloaded during
    /// maintenance.
    #[serde(default = "default_active_guild_preloads")]
    pub active_guild_preloads: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            maintenance_interval_secs: default_maintenance_interval(),
            active_guild_preloads: default_active_guild_preloads(),
        }
    }
}

impl CacheConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.maintenance_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "cache.maintenance_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_maintenance_interval() -> u64 {
    300
}

fn default_active_guild_preloads() -> usize {
    3
}
