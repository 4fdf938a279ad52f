//! Configuration validation
//!
//! Validates config consistency:
//! - Stale cache lifetime is at least the fresh lifetime
//! - Query timeout and total label are usable
//! - The default range parses
//! - The ClickHouse store has a URL and valid identifiers

use tally_analytics::TimeRange;
use tally_query::StoreBackendType;
use tally_query::event::is_valid_identifier;

use crate::Config;
use crate::error::{ConfigError, Result};

/// Validate the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_cache(config)?;
    validate_query(config)?;
    validate_store(config)?;
    Ok(())
}

fn validate_cache(config: &Config) -> Result<()> {
    let cache = &config.cache;

    if let Some(stale) = cache.stale_ttl_secs
        && stale < cache.ttl_secs
    {
        return Err(ConfigError::invalid_value(
            "cache",
            "stale_ttl_secs",
            format!("{} is less than ttl_secs ({})", stale, cache.ttl_secs),
        ));
    }

    if cache.max_entries == 0 {
        return Err(ConfigError::invalid_value(
            "cache",
            "max_entries",
            "must be positive",
        ));
    }

    Ok(())
}

fn validate_query(config: &Config) -> Result<()> {
    let query = &config.query;

    if query.timeout_ms == 0 {
        return Err(ConfigError::invalid_value(
            "query",
            "timeout_ms",
            "must be positive",
        ));
    }

    if query.max_buckets == 0 {
        return Err(ConfigError::invalid_value(
            "query",
            "max_buckets",
            "must be positive",
        ));
    }

    if query.total_label.trim().is_empty() {
        return Err(ConfigError::invalid_value(
            "query",
            "total_label",
            "must not be empty",
        ));
    }

    if let Some(range) = &query.default_range {
        TimeRange::parse(range)
            .map_err(|e| ConfigError::invalid_value("query", "default_range", e.to_string()))?;
    }

    Ok(())
}

fn validate_store(config: &Config) -> Result<()> {
    let store = &config.store;

    if store.backend != StoreBackendType::ClickHouse {
        return Ok(());
    }

    if store.url.as_deref().is_none_or(|url| url.trim().is_empty()) {
        return Err(ConfigError::invalid_value(
            "store",
            "url",
            "is required for the clickhouse backend",
        ));
    }

    for (field, value) in [("database", &store.database), ("table", &store.table)] {
        if !is_valid_identifier(value) {
            return Err(ConfigError::invalid_value(
                "store",
                field,
                format!("'{}' is not a valid identifier", value),
            ));
        }
    }

    Ok(())
}
