//! Tally Configuration
//!
//! TOML-based configuration loading with sensible defaults.
//! Minimal config should just work - only specify what you need to change.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use tally_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[cache]\nttl_secs = 60").unwrap();
//! assert_eq!(config.cache.ttl_secs, 60);
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [log]
//! level = "info"
//!
//! [cache]
//! ttl_secs = 900
//!
//! [query]
//! default_range = "30d"
//!
//! [store]
//! backend = "clickhouse"
//! url = "http://localhost:8123"
//! ```

mod error;
mod logging;
mod query;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput, init_logging};
pub use query::{CacheConfig, QueryConfig};
pub use tally_query::{StoreBackendType, StoreConfig};

use serde::Deserialize;
use tally_analytics::{CachePolicy, EngineConfig};

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,

    /// Result cache configuration
    pub cache: CacheConfig,

    /// Query defaults
    pub query: QueryConfig,

    /// Statistic store backend
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, contains invalid TOML or fails
    /// validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Cache policy seeded into new queries
    pub fn cache_policy(&self) -> CachePolicy {
        if !self.cache.enabled {
            return CachePolicy::disabled();
        }
        CachePolicy::with_ttl(self.cache.ttl()).with_stale_ttl(self.cache.stale_ttl())
    }

    /// Engine settings derived from the cache and query sections
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            cache_policy: self.cache_policy(),
            max_cache_entries: self.cache.max_entries,
            total_label: self.query.total_label.clone(),
            timeout: self.query.timeout(),
            default_range: self.query.default_range.clone(),
            max_buckets: self.query.max_buckets,
        }
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.log.level, LogLevel::Info);
        assert!(config.cache.enabled);
        assert_eq!(config.store.backend, StoreBackendType::Memory);

        let engine = config.engine_config();
        assert_eq!(engine, EngineConfig::default());
    }

    #[test]
    fn test_full_config_parse() {
        let toml = r#"
[log]
level = "debug"
format = "json"

[cache]
enabled = true
ttl_secs = 60
stale_ttl_secs = 120
max_entries = 500

[query]
total_label = "All"
timeout_ms = 5000
max_buckets = 250000
default_range = "30d"

[store]
backend = "clickhouse"
url = "http://localhost:8123"
database = "analytics"
table = "statistic_events"
"#;
        let config = Config::from_str(toml).unwrap();

        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.store.backend, StoreBackendType::ClickHouse);
        assert_eq!(config.store.database, "analytics");

        let engine = config.engine_config();
        assert_eq!(engine.cache_policy.ttl, Duration::from_secs(60));
        assert_eq!(engine.cache_policy.stale_ttl, Duration::from_secs(120));
        assert_eq!(engine.max_cache_entries, 500);
        assert_eq!(engine.total_label, "All");
        assert_eq!(engine.timeout, Duration::from_secs(5));
        assert_eq!(engine.default_range.as_deref(), Some("30d"));
        assert_eq!(engine.max_buckets, 250_000);
    }

    #[test]
    fn test_disabled_cache() {
        let config = Config::from_str("[cache]\nenabled = false").unwrap();
        assert!(!config.cache_policy().enabled);
    }

    #[test]
    fn test_invalid_toml() {
        let result = Config::from_str("invalid { toml");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[query]\ntotal_label = \"Sum\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.query.total_label, "Sum");
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::from_file(dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::IoError { .. })));
    }
}
