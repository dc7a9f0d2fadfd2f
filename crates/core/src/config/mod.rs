//! Engine configuration with layered loading.
//!
//! Loading precedence (highest wins):
//! 1. Environment variables (SONIC_*)
//! 2. TOML config file (if SONIC_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Process-wide engine configuration.
///
/// Per-session knobs (timeouts, delivery mode) live in the client's
/// `SessionConfig`; this struct covers everything shared by all
/// sessions: the cache store, its budget, and protocol backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the SQLite cache database.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// User-Agent suffix advertised on sync requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Total cache blob budget in bytes. The trim pass fires above 80%
    /// of this and deletes down to 25%.
    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: u64,

    /// Minimum interval between cache trim checks, in milliseconds.
    #[serde(default = "default_cache_check_interval_ms")]
    pub cache_check_interval_ms: u64,

    /// How long a session id stays off the sync protocol after the
    /// server answers `cache-offline: http`, in milliseconds.
    #[serde(default = "default_unavailable_backoff_ms")]
    pub unavailable_backoff_ms: u64,

    /// Capacity of the speculative preload pool.
    #[serde(default = "default_max_preload_sessions")]
    pub max_preload_sessions: usize,

    /// Verify cached documents by content hash; when false only the
    /// persisted size is checked.
    #[serde(default = "default_true")]
    pub verify_cache_with_hash: bool,

    /// Upper bound on per-entry expiry derived from Cache-Control, in
    /// milliseconds.
    #[serde(default = "default_cache_max_age_ms")]
    pub cache_max_age_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./sonic-cache.sqlite")
}

fn default_user_agent() -> String {
    "sonic-rs/0.1".into()
}

fn default_max_cache_bytes() -> u64 {
    30 * 1024 * 1024
}

fn default_cache_check_interval_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_unavailable_backoff_ms() -> u64 {
    6 * 60 * 60 * 1000
}

fn default_max_preload_sessions() -> usize {
    5
}

fn default_cache_max_age_ms() -> u64 {
    5 * 60 * 1000
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            max_cache_bytes: default_max_cache_bytes(),
            cache_check_interval_ms: default_cache_check_interval_ms(),
            unavailable_backoff_ms: default_unavailable_backoff_ms(),
            max_preload_sessions: default_max_preload_sessions(),
            verify_cache_with_hash: true,
            cache_max_age_ms: default_cache_max_age_ms(),
        }
    }
}

impl EngineConfig {
    /// Protocol-unavailable backoff as a Duration.
    pub fn unavailable_backoff(&self) -> Duration {
        Duration::from_millis(self.unavailable_backoff_ms)
    }

    /// Trim check interval as a Duration.
    pub fn cache_check_interval(&self) -> Duration {
        Duration::from_millis(self.cache_check_interval_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a source cannot be read or validation
    /// fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("SONIC_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("SONIC_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./sonic-cache.sqlite"));
        assert_eq!(config.max_cache_bytes, 30 * 1024 * 1024);
        assert_eq!(config.max_preload_sessions, 5);
        assert_eq!(config.unavailable_backoff(), Duration::from_millis(6 * 60 * 60 * 1000));
        assert!(config.verify_cache_with_hash);
    }

    #[test]
    fn test_default_validates() {
        EngineConfig::default().validate().unwrap();
    }
}
