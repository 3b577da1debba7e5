use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Task scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// IANA timezone used to evaluate wall-clock job triggers.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// A single tick exceeding this many seconds is logged as a watchdog
    /// warning (the tick is never killed).
    #[serde(default = "default_watchdog")]
    pub tick_watchdog_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            tick_watchdog_secs: default_watchdog(),
        }
    }
}

impl SchedulerConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        self.timezone.parse::<chrono_tz::Tz>().map_err(|_| {
            ConfigError::Validation(format!(
                "scheduler.timezone '{}' is not a valid IANA timezone",
                self.timezone
            ))
        })?;
        Ok(())
    }

    /// Parsed timezone. Valid by construction after [`validate`].
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone
            .parse()
            .unwrap_or(chrono_tz::Tz::Europe__Paris)
    }
}

fn default_timezone() -> String {
    "Europe/Paris".to_string()
}

fn default_watchdog() -> u64 {
    45
}
