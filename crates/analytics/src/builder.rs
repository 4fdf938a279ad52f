//! Statistic query builder
//!
//! Fluent, consuming builder for statistic queries:
//! - Metric, time range and bucket granularity
//! - Aggregate function and unique-by key
//! - Attribute filters
//! - Caching policy, rollup total and timeout
//!
//! Parse errors from string inputs are held until [`StatisticQuery::build`],
//! which freezes the builder into a validated [`QuerySpec`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use tally_query::{Aggregate, Connective, Granularity};

use crate::aggregate::parse_aggregate;
use crate::cache::CachePolicy;
use crate::calendar::{MAX_BUCKETS, parse_period};
use crate::error::{AnalyticsError, Result};
use crate::filter::FilterSet;
use crate::metric::Metric;
use crate::query::{DEFAULT_TIMEOUT, DEFAULT_TOTAL_LABEL, QuerySpec};
use crate::timerange::TimeRange;

/// Builder for a statistic query
#[derive(Clone)]
pub struct StatisticQuery {
    metric_name: String,
    metric: Option<Arc<dyn Metric>>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    period: Option<Granularity>,
    aggregate: Aggregate,
    unique_by: Option<String>,
    filters: FilterSet,
    cache_policy: CachePolicy,
    include_total: bool,
    total_label: String,
    timeout: Duration,
    max_buckets: u64,
    pending_error: Option<AnalyticsError>,
}

impl Default for StatisticQuery {
    fn default() -> Self {
        Self {
            metric_name: String::new(),
            metric: None,
            start: None,
            end: None,
            period: Some(Granularity::Day),
            aggregate: Aggregate::Sum,
            unique_by: None,
            filters: FilterSet::new(),
            cache_policy: CachePolicy::default(),
            include_total: false,
            total_label: DEFAULT_TOTAL_LABEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_buckets: MAX_BUCKETS,
            pending_error: None,
        }
    }
}

impl std::fmt::Debug for StatisticQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticQuery")
            .field("metric_name", &self.metric_name)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("period", &self.period)
            .field("aggregate", &self.aggregate)
            .field("unique_by", &self.unique_by)
            .field("filters", &self.filters)
            .field("cache_policy", &self.cache_policy)
            .field("include_total", &self.include_total)
            .field("pending_error", &self.pending_error)
            .finish_non_exhaustive()
    }
}

impl StatisticQuery {
    /// Start a query for a metric name
    ///
    /// Defaults: daily buckets, `sum`, the last month up to now, cached for
    /// 15 minutes.
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            metric_name: metric_name.into(),
            ..Default::default()
        }
    }

    /// Start a query for a metric, making its scopes available
    pub fn for_metric(metric: Arc<dyn Metric>) -> Self {
        Self {
            metric_name: metric.name().to_string(),
            metric: Some(metric),
            ..Default::default()
        }
    }

    /// Metric name this query aggregates
    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    fn fail(mut self, err: AnalyticsError) -> Self {
        if self.pending_error.is_none() {
            self.pending_error = Some(err);
        }
        self
    }

    // Range

    /// Set the range start (inclusive)
    pub fn start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    /// Set the range end (inclusive)
    pub fn end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    /// Set both ends of the range
    pub fn between(self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start(start).end(end)
    }

    /// Use a parsed time range
    pub fn range(self, range: TimeRange) -> Self {
        self.between(range.start, range.end)
    }

    /// Fill in whichever range ends are still unset
    pub fn or_range(mut self, range: TimeRange) -> Self {
        self.start = self.start.or(Some(range.start));
        self.end = self.end.or(Some(range.end));
        self
    }

    /// Parse and use a time range (`7d`, `mtd`, `2024-01-01,2024-01-31`)
    pub fn range_str(self, range: &str) -> Self {
        match TimeRange::parse(range) {
            Ok(range) => self.range(range),
            Err(err) => self.fail(err),
        }
    }

    // Grouping

    /// Set the bucket granularity; `None` yields one whole-range bucket
    pub fn group_by(mut self, period: Option<Granularity>) -> Self {
        self.period = period;
        self
    }

    /// Parse and set the bucket granularity
    pub fn group_by_str(self, tag: &str) -> Self {
        match parse_period(tag) {
            Ok(period) => self.group_by(Some(period)),
            Err(err) => self.fail(err),
        }
    }

    /// Aggregate the whole range into a single bucket
    pub fn ungrouped(self) -> Self {
        self.group_by(None)
    }

    /// Bucket per year
    pub fn group_by_year(self) -> Self {
        self.group_by(Some(Granularity::Year))
    }

    /// Bucket per month
    pub fn group_by_month(self) -> Self {
        self.group_by(Some(Granularity::Month))
    }

    /// Bucket per ISO week
    pub fn group_by_week(self) -> Self {
        self.group_by(Some(Granularity::Week))
    }

    /// Bucket per day
    pub fn group_by_day(self) -> Self {
        self.group_by(Some(Granularity::Day))
    }

    /// Bucket per hour
    pub fn group_by_hour(self) -> Self {
        self.group_by(Some(Granularity::Hour))
    }

    /// Bucket per minute
    pub fn group_by_minute(self) -> Self {
        self.group_by(Some(Granularity::Minute))
    }

    // Aggregation

    /// Set the aggregate function
    pub fn aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregate = aggregate;
        self
    }

    /// Parse and set the aggregate function
    pub fn aggregate_str(self, token: &str) -> Self {
        match parse_aggregate(token) {
            Ok(aggregate) => self.aggregate(aggregate),
            Err(err) => self.fail(err),
        }
    }

    /// Count distinct values of a parameter instead of events
    pub fn unique_by(mut self, key: impl Into<String>) -> Self {
        self.unique_by = Some(key.into());
        self
    }

    // Filters

    /// Set a constraint with explicit connective and negation
    pub fn filter(
        mut self,
        column: impl Into<String>,
        value: impl Into<serde_json::Value>,
        connective: Connective,
        negate: bool,
    ) -> Self {
        self.filters.add(column, value, connective, negate);
        self
    }

    /// `column = value`, AND-ed
    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filters.where_eq(column, value);
        self
    }

    /// `column = value`, OR-ed
    pub fn or_where(mut self, column: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filters.or_where(column, value);
        self
    }

    /// `NOT column = value`, AND-ed
    pub fn where_not(mut self, column: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filters.where_not(column, value);
        self
    }

    /// `NOT column = value`, OR-ed
    pub fn or_where_not(
        mut self,
        column: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.filters.or_where_not(column, value);
        self
    }

    /// `column = true`
    pub fn where_true(mut self, column: impl Into<String>) -> Self {
        self.filters.where_true(column);
        self
    }

    /// `column = false`
    pub fn where_false(mut self, column: impl Into<String>) -> Self {
        self.filters.where_false(column);
        self
    }

    /// AND one equality constraint per entry
    pub fn where_all<K, V, I>(mut self, entries: I) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.filters.where_all(entries);
        self
    }

    /// Mutable access to the filter set, for scopes
    pub fn filters_mut(&mut self) -> &mut FilterSet {
        &mut self.filters
    }

    /// Apply a scope defined by the query's metric
    ///
    /// Fails at build time with `UnknownOperation` when the metric does not
    /// define the scope or the query has no metric.
    pub fn scope(mut self, name: &str, args: &[serde_json::Value]) -> Self {
        if let Some(metric) = self.metric.clone()
            && metric.apply_scope(&mut self, name, args)
        {
            return self;
        }
        self.fail(AnalyticsError::UnknownOperation(name.to_string()))
    }

    // Caching

    /// Enable or disable the cache
    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.cache_policy.enabled = enabled;
        self
    }

    /// Bypass the cache
    pub fn without_cache(self) -> Self {
        self.use_cache(false)
    }

    /// Cache results for `ttl`, servable stale for half as long again
    pub fn cache_for(mut self, ttl: Duration) -> Self {
        self.cache_policy = CachePolicy::with_ttl(ttl);
        self
    }

    /// Set the full caching policy
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    // Output

    /// Append a rollup total bucket
    pub fn include_total(mut self, include: bool) -> Self {
        self.include_total = include;
        self
    }

    /// Label of the rollup total bucket
    pub fn total_label(mut self, label: impl Into<String>) -> Self {
        self.total_label = label.into();
        self
    }

    /// Bound the store call
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Raise or lower the bucket limit for this query
    pub fn max_buckets(mut self, max_buckets: u64) -> Self {
        self.max_buckets = max_buckets;
        self
    }

    /// Freeze and validate the query
    pub fn build(self) -> Result<QuerySpec> {
        self.build_at(Utc::now())
    }

    /// Freeze and validate the query, resolving default range ends at `now`
    pub fn build_at(self, now: DateTime<Utc>) -> Result<QuerySpec> {
        if let Some(err) = self.pending_error {
            return Err(err);
        }

        let default = TimeRange::last_month(now);
        let spec = QuerySpec {
            metric_name: self.metric_name,
            start: self.start.unwrap_or(default.start),
            end: self.end.unwrap_or(default.end),
            period: self.period,
            aggregate: self.aggregate,
            unique_by: self.unique_by,
            filters: self.filters,
            cache_policy: self.cache_policy,
            include_total: self.include_total,
            total_label: self.total_label,
            timeout: self.timeout,
            max_buckets: self.max_buckets,
        };

        spec.validate()?;
        Ok(spec)
    }
}
