//! Configuration management for the expression engine
//!
//! TOML file support, environment variable overrides and sensible defaults.
//!
//! ```toml
//! [cache]
//! expiration_secs = 60
//!
//! [query]
//! max_parallel_targets = 8
//! default_metadata_table = "ActiveMeasurements"
//!
//! [logging]
//! log_level = "info"
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Target cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Query evaluation settings
    #[serde(default)]
    pub query: QueryConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Target cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Idle window after which an unused entry is evicted
    #[serde(default = "default_expiration_secs")]
    pub expiration_secs: u64,
}

/// Query evaluation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Upper bound on targets evaluated concurrently within one request
    #[serde(default = "default_parallel_targets")]
    pub max_parallel_targets: usize,

    /// Catalog table used for tag, key and label lookups
    #[serde(default = "default_metadata_table")]
    pub default_metadata_table: String,

    /// Catalog field holding the series key (e.g. `PPA:1`)
    #[serde(default = "default_key_field")]
    pub key_field: String,

    /// Catalog field holding the point tag
    #[serde(default = "default_tag_field")]
    pub tag_field: String,

    /// Catalog field holding the signal GUID
    #[serde(default = "default_signal_id_field")]
    pub signal_id_field: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_expiration_secs() -> u64 { 60 }
fn default_parallel_targets() -> usize { num_cpus::get() }
fn default_metadata_table() -> String { "ActiveMeasurements".to_string() }
fn default_key_field() -> String { "ID".to_string() }
fn default_tag_field() -> String { "PointTag".to_string() }
fn default_signal_id_field() -> String { "SignalID".to_string() }
fn default_log_level() -> String { "info".to_string() }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiration_secs: default_expiration_secs(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_parallel_targets: default_parallel_targets(),
            default_metadata_table: default_metadata_table(),
            key_field: default_key_field(),
            tag_field: default_tag_field(),
            signal_id_field: default_signal_id_field(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl CacheConfig {
    /// Sliding expiration as a `Duration`
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secs) = std::env::var("KUBA_EXPR_CACHE_EXPIRATION_SECS") {
            if let Ok(s) = secs.parse() {
                self.cache.expiration_secs = s;
            }
        }

        if let Ok(parallel) = std::env::var("KUBA_EXPR_MAX_PARALLEL_TARGETS") {
            if let Ok(p) = parallel.parse() {
                self.query.max_parallel_targets = p;
            }
        }
        if let Ok(table) = std::env::var("KUBA_EXPR_METADATA_TABLE") {
            self.query.default_metadata_table = table;
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.logging.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.expiration_secs == 0 {
            return Err(Error::Configuration(
                "Cache expiration must be > 0 seconds".to_string(),
            ));
        }

        if self.query.max_parallel_targets == 0 {
            return Err(Error::Configuration(
                "Max parallel targets must be > 0".to_string(),
            ));
        }

        for (name, value) in [
            ("default_metadata_table", &self.query.default_metadata_table),
            ("key_field", &self.query.key_field),
            ("tag_field", &self.query.tag_field),
            ("signal_id_field", &self.query.signal_id_field),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Configuration(format!("{} cannot be empty", name)));
            }
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }
}

mod num_cpus {
    pub fn get() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.cache.expiration_secs, 60);
        assert_eq!(config.query.default_metadata_table, "ActiveMeasurements");
        assert_eq!(config.query.tag_field, "PointTag");
        assert!(config.query.max_parallel_targets > 0);
    }

    #[test]
    fn test_config_validation() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());

        let mut bad = EngineConfig::default();
        bad.cache.expiration_secs = 0;
        assert!(bad.validate().is_err());

        let mut bad = EngineConfig::default();
        bad.query.key_field = " ".to_string();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str("[cache]\nexpiration_secs = 5\n").unwrap();
        assert_eq!(config.cache.expiration_secs, 5);
        assert_eq!(config.query.key_field, "ID");
        assert_eq!(config.logging.log_level, "info");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");

        let mut config = EngineConfig::default();
        config.query.default_metadata_table = "Measurements".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.query.default_metadata_table, "Measurements");
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = EngineConfig::from_file("/nonexistent/engine.toml").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("KUBA_EXPR_CACHE_EXPIRATION_SECS", "7");
        let config = EngineConfig::from_env();
        assert_eq!(config.cache.expiration_secs, 7);
        std::env::remove_var("KUBA_EXPR_CACHE_EXPIRATION_SECS");
    }
}
