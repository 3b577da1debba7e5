use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Translation catalog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranslationConfig {
    /// Path to the JSON translation catalog.
    #[serde(default = "default_path")]
    pub path: String,

    /// Maximum catalog size in bytes. Larger files abort startup.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            max_bytes: default_max_bytes(),
        }
    }
}

impl TranslationConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.path.is_empty() {
            return Err(ConfigError::Validation(
                "translation.path cannot be empty".into(),
            ));
        }
        if self.max_bytes == 0 {
            return Err(ConfigError::Validation(
                "translation.max_bytes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_path() -> String {
    "translation.json".to_string()
}

fn default_max_bytes() -> u64 {
    5 * 1024 * 1024
}
