//! Store configuration types

use serde::{Deserialize, Serialize};

use crate::backend::clickhouse::ClickHouseStoreConfig;
use crate::error::StoreError;

/// Store backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendType {
    /// In-process table (development, tests, embedded use)
    #[default]
    Memory,
    /// ClickHouse over HTTP
    #[serde(alias = "ch")]
    ClickHouse,
}

impl std::fmt::Display for StoreBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::ClickHouse => write!(f, "clickhouse"),
        }
    }
}

/// Store configuration
///
/// ```toml
/// [store]
/// backend = "clickhouse"
/// url = "http://localhost:8123"
/// database = "analytics"
/// table = "statistic_events"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend type
    pub backend: StoreBackendType,

    /// ClickHouse HTTP URL
    pub url: Option<String>,

    /// Database name
    pub database: String,

    /// Fact table name
    pub table: String,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// Server-side execution limit in seconds
    pub max_execution_time_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendType::Memory,
            url: None,
            database: "default".to_string(),
            table: "statistic_events".to_string(),
            username: None,
            password: None,
            max_execution_time_secs: 60,
        }
    }
}

impl StoreConfig {
    /// Create config for the in-memory backend
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create config for the ClickHouse backend
    pub fn clickhouse(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            backend: StoreBackendType::ClickHouse,
            url: Some(url.into()),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Resolve ClickHouse connection settings
    pub fn clickhouse_config(&self) -> Result<ClickHouseStoreConfig, StoreError> {
        let url = self.url.as_ref().ok_or_else(|| {
            StoreError::Config("url required for clickhouse backend".to_string())
        })?;

        let mut config = ClickHouseStoreConfig::new(url, &self.database).with_table(&self.table);
        config.max_execution_time = self.max_execution_time_secs;

        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            config = config.with_credentials(user, pass);
        }

        Ok(config)
    }
}
