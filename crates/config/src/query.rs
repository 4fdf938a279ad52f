//! Query and cache configuration
//!
//! Engine-wide defaults applied to every statistic query.

use std::time::Duration;

use serde::Deserialize;
use tally_analytics::MAX_BUCKETS;

/// Result cache configuration
///
/// # Example
///
/// ```toml
/// [cache]
/// enabled = true
/// ttl_secs = 900
/// stale_ttl_secs = 1350
/// max_entries = 10000
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache query results
    /// Default: true
    pub enabled: bool,

    /// Fresh lifetime in seconds
    /// Default: 900
    pub ttl_secs: u64,

    /// Stale-but-servable lifetime in seconds, at least `ttl_secs`
    /// Default: 1.5 × ttl_secs
    pub stale_ttl_secs: Option<u64>,

    /// Maximum number of cached results
    /// Default: 10000
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 900,
            stale_ttl_secs: None,
            max_entries: 10_000,
        }
    }
}

impl CacheConfig {
    /// Fresh lifetime
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Stale lifetime, derived from the fresh one when unset
    pub fn stale_ttl(&self) -> Duration {
        match self.stale_ttl_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self.ttl().saturating_add(self.ttl() / 2),
        }
    }
}

/// Query defaults
///
/// # Example
///
/// ```toml
/// [query]
/// total_label = "Total"
/// timeout_ms = 30000
/// default_range = "30d"
/// max_buckets = 100000
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Label of the rollup total bucket
    /// Default: "Total"
    pub total_label: String,

    /// Store call timeout in milliseconds
    /// Default: 30000
    pub timeout_ms: u64,

    /// Range used when a query sets none (`30d`, `mtd`, ...)
    /// Default: the last month
    pub default_range: Option<String>,

    /// Largest number of buckets a query may span
    /// Default: 100000
    pub max_buckets: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            total_label: "Total".to_string(),
            timeout_ms: 30_000,
            default_range: None,
            max_buckets: MAX_BUCKETS,
        }
    }
}

impl QueryConfig {
    /// Store call timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
