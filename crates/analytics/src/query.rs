//! Frozen statistic query
//!
//! A [`QuerySpec`] is the validated, immutable form of a
//! [`StatisticQuery`](crate::builder::StatisticQuery). It knows how to compile
//! itself into a store query and how to derive its cache key.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use tally_query::{Aggregate, Granularity, StoreQuery, VALUE_COLUMN};

use crate::aggregate::expression;
use crate::cache::CachePolicy;
use crate::calendar::{boundaries, bucket_count};
use crate::error::{AnalyticsError, Result};
use crate::filter::{FilterSet, canonical};

/// Prefix of every cache key
pub const CACHE_KEY_PREFIX: &str = "statistics:";

/// Default label of the rollup total bucket
pub const DEFAULT_TOTAL_LABEL: &str = "Total";

/// Default bound on a single store call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Validated statistic query
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    /// Metric to aggregate
    pub metric_name: String,
    /// Range start (inclusive)
    pub start: DateTime<Utc>,
    /// Range end (inclusive)
    pub end: DateTime<Utc>,
    /// Bucket size; `None` aggregates the whole range into one bucket
    pub period: Option<Granularity>,
    /// Aggregate function
    pub aggregate: Aggregate,
    /// Count distinct values of this parameter (count only)
    pub unique_by: Option<String>,
    /// Attribute constraints
    pub filters: FilterSet,
    /// Caching policy
    pub cache_policy: CachePolicy,
    /// Append a rollup total bucket
    pub include_total: bool,
    /// Label of the total bucket
    pub total_label: String,
    /// Bound on the store call
    pub timeout: Duration,
    /// Largest number of buckets the query may enumerate
    pub max_buckets: u64,
}

impl QuerySpec {
    /// Check every invariant that must hold before the store is touched
    pub fn validate(&self) -> Result<()> {
        if self.metric_name.trim().is_empty() {
            return Err(AnalyticsError::InvalidQuerySpec(
                "metric name is required".to_string(),
            ));
        }

        if self.end < self.start {
            return Err(AnalyticsError::InvalidQuerySpec(format!(
                "end {} precedes start {}",
                self.end, self.start
            )));
        }

        if let Some(period) = self.period {
            let buckets = bucket_count(period, self.start, self.end);
            if buckets > self.max_buckets {
                return Err(AnalyticsError::InvalidQuerySpec(format!(
                    "{} {} buckets exceed max_buckets ({}); narrow the range, coarsen the period or raise max_buckets",
                    buckets, period, self.max_buckets
                )));
            }
        }

        if self.include_total && self.total_label.trim().is_empty() {
            return Err(AnalyticsError::InvalidQuerySpec(
                "total label must not be empty".to_string(),
            ));
        }

        if self.timeout.is_zero() {
            return Err(AnalyticsError::InvalidQuerySpec(
                "timeout must be positive".to_string(),
            ));
        }

        expression(self.aggregate, self.unique_by.as_deref(), VALUE_COLUMN)?;
        self.filters.compile()?;
        Ok(())
    }

    /// Instants scanned by the store
    ///
    /// With a period, the range widens to whole periods so the first and last
    /// buckets are complete.
    pub fn store_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        match self.period {
            Some(period) => (
                boundaries(period, self.start).0,
                boundaries(period, self.end).1,
            ),
            None => (self.start, self.end),
        }
    }

    /// Compile into the store-level query
    pub fn to_store_query(&self) -> Result<StoreQuery> {
        let (start, end) = self.store_range();
        Ok(StoreQuery {
            metric_name: self.metric_name.clone(),
            start,
            end,
            bucket: self.period,
            aggregate: expression(self.aggregate, self.unique_by.as_deref(), VALUE_COLUMN)?,
            predicate: self.filters.compile()?,
        })
    }

    /// Canonical cache key
    ///
    /// Two queries share a key iff they scan the same periods with the same
    /// aggregate, uniqueness, total and filters. Start and end are written at
    /// the precision of the bucket label, so instants inside the same first
    /// and last periods map to one key.
    pub fn cache_key(&self) -> Result<String> {
        let (start, end) = match self.period {
            Some(period) => (period.label(self.start), period.label(self.end)),
            None => (
                self.start.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                self.end.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ),
        };

        let fields = CacheKeyFields {
            metric: &self.metric_name,
            aggregate: self.aggregate,
            unique_by: self.unique_by.as_deref(),
            include_total: self.include_total,
            total_label: self.include_total.then_some(self.total_label.as_str()),
            period: self.period,
            start,
            end,
            filters: canonical(&self.filters.compile()?),
        };

        let encoded = serde_json::to_string(&fields).map_err(|e| {
            AnalyticsError::InvalidQuerySpec(format!("failed to encode cache key: {}", e))
        })?;
        Ok(format!("{}{}", CACHE_KEY_PREFIX, encoded))
    }
}

/// Cache key payload; field order is part of the key
#[derive(Serialize)]
struct CacheKeyFields<'a> {
    metric: &'a str,
    aggregate: Aggregate,
    unique_by: Option<&'a str>,
    include_total: bool,
    total_label: Option<&'a str>,
    period: Option<Granularity>,
    start: String,
    end: String,
    filters: String,
}
