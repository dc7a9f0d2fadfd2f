//! Configuration validation rules.

use crate::config::EngineConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl EngineConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `max_cache_bytes` is 0
    /// - `max_preload_sessions` is 0
    /// - `user_agent` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_cache_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_cache_bytes".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.max_preload_sessions == 0 {
            return Err(ConfigError::Invalid {
                field: "max_preload_sessions".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }
        Ok(())
    }
}
