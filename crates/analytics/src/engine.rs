//! Statistic query engine
//!
//! Executes frozen queries against a [`StatisticStore`] through the query
//! cache and assembles store rows into zero-filled time series.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tally_query::{Aggregate, AggregateRows, StatisticStore};

use crate::aggregate::rollup;
use crate::builder::StatisticQuery;
use crate::cache::{CachePolicy, DEFAULT_MAX_ENTRIES, QueryCache};
use crate::calendar::{MAX_BUCKETS, enumerate, range_label};
use crate::error::{AnalyticsError, Result};
use crate::metric::Metric;
use crate::query::{DEFAULT_TIMEOUT, DEFAULT_TOTAL_LABEL, QuerySpec};
use crate::timerange::TimeRange;
use crate::timeseries::{Bucket, TimeSeries};

/// Engine-wide defaults
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Cache policy seeded into new queries
    pub cache_policy: CachePolicy,
    /// Maximum number of cached results
    pub max_cache_entries: usize,
    /// Total label seeded into new queries
    pub total_label: String,
    /// Store timeout seeded into new queries
    pub timeout: Duration,
    /// Range applied when a query sets none (`30d`, `mtd`, ...)
    pub default_range: Option<String>,
    /// Bucket limit seeded into new queries
    pub max_buckets: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_policy: CachePolicy::default(),
            max_cache_entries: DEFAULT_MAX_ENTRIES,
            total_label: DEFAULT_TOTAL_LABEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            default_range: None,
            max_buckets: MAX_BUCKETS,
        }
    }
}

/// Statistic query engine
///
/// Cloning shares the store and the cache.
#[derive(Clone)]
pub struct MetricsEngine {
    store: Arc<dyn StatisticStore>,
    cache: QueryCache<TimeSeries>,
    config: Arc<EngineConfig>,
}

impl std::fmt::Debug for MetricsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsEngine")
            .field("backend", &self.store.name())
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish()
    }
}

impl MetricsEngine {
    /// Create an engine with default settings
    pub fn new(store: Arc<dyn StatisticStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    /// Create an engine with explicit settings
    pub fn with_config(store: Arc<dyn StatisticStore>, config: EngineConfig) -> Self {
        Self {
            store,
            cache: QueryCache::new(config.max_cache_entries),
            config: Arc::new(config),
        }
    }

    /// Engine settings
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The result cache
    pub fn cache(&self) -> &QueryCache<TimeSeries> {
        &self.cache
    }

    /// Get the backend name
    pub fn backend_name(&self) -> &'static str {
        self.store.name()
    }

    /// Check that the store is reachable
    pub async fn health_check(&self) -> Result<()> {
        Ok(self.store.health_check().await?)
    }

    /// Start a query for `metric_name` seeded with the engine defaults
    pub fn query(&self, metric_name: impl Into<String>) -> StatisticQuery {
        self.seed(StatisticQuery::new(metric_name))
    }

    /// Start a query for `metric`, with its scopes, seeded with the engine defaults
    pub fn query_metric(&self, metric: Arc<dyn Metric>) -> StatisticQuery {
        self.seed(StatisticQuery::for_metric(metric))
    }

    fn seed(&self, query: StatisticQuery) -> StatisticQuery {
        query
            .cache_policy(self.config.cache_policy)
            .total_label(self.config.total_label.clone())
            .timeout(self.config.timeout)
            .max_buckets(self.config.max_buckets)
    }

    /// Build and execute a query
    pub async fn get(&self, query: StatisticQuery) -> Result<TimeSeries> {
        let query = match &self.config.default_range {
            Some(range) => query.or_range(TimeRange::parse(range)?),
            None => query,
        };
        self.execute(&query.build()?).await
    }

    /// Execute with the `sum` aggregate
    pub async fn sum(&self, query: StatisticQuery) -> Result<TimeSeries> {
        self.get(query.aggregate(Aggregate::Sum)).await
    }

    /// Execute with the `count` aggregate
    pub async fn count(&self, query: StatisticQuery) -> Result<TimeSeries> {
        self.get(query.aggregate(Aggregate::Count)).await
    }

    /// Execute with the `avg` aggregate
    pub async fn avg(&self, query: StatisticQuery) -> Result<TimeSeries> {
        self.get(query.aggregate(Aggregate::Avg)).await
    }

    /// Execute with the `min` aggregate
    pub async fn min(&self, query: StatisticQuery) -> Result<TimeSeries> {
        self.get(query.aggregate(Aggregate::Min)).await
    }

    /// Execute with the `max` aggregate
    pub async fn max(&self, query: StatisticQuery) -> Result<TimeSeries> {
        self.get(query.aggregate(Aggregate::Max)).await
    }

    /// Execute a frozen query
    ///
    /// Validation failures surface before the store or the cache is touched.
    /// Store failures and timeouts fail the whole query; nothing partial is
    /// returned or cached.
    pub async fn execute(&self, spec: &QuerySpec) -> Result<TimeSeries> {
        spec.validate()?;
        let key = spec.cache_key()?;

        let engine = self.clone();
        let owned = spec.clone();
        self.cache
            .get_or_compute(&key, spec.cache_policy, move || async move {
                engine.compute(&owned).await
            })
            .await
    }

    async fn compute(&self, spec: &QuerySpec) -> Result<TimeSeries> {
        let query = spec.to_store_query()?;
        let started = Instant::now();

        let rows = tokio::time::timeout(spec.timeout, self.store.aggregate(&query))
            .await
            .map_err(|_| AnalyticsError::Timeout(spec.timeout))??;

        tracing::debug!(
            metric = %spec.metric_name,
            period = ?spec.period,
            rows = rows.rows.len(),
            time_ms = started.elapsed().as_millis() as u64,
            backend = self.store.name(),
            "statistic query executed"
        );

        Ok(assemble(spec, &rows))
    }
}

/// Zero-fill store rows into the expected buckets
///
/// With a period, every calendar label of the range appears once in order,
/// taking the store value or 0. Without one, a single bucket labelled with
/// the date range carries the whole-range value. `include_total` appends the
/// rollup of the filled values.
pub fn assemble(spec: &QuerySpec, rows: &AggregateRows) -> TimeSeries {
    let buckets = match spec.period {
        Some(period) => {
            let values = rows.by_period();
            enumerate(period, spec.start, spec.end)
                .into_iter()
                .map(|label| {
                    let value = values.get(&label).copied().unwrap_or(0.0);
                    Bucket::new(label, value)
                })
                .collect()
        }
        None => vec![Bucket::new(range_label(spec.start, spec.end), rows.scalar())],
    };

    let series = TimeSeries::from_buckets(buckets);
    if spec.include_total {
        let total = rollup(spec.aggregate, &series.values());
        series.with_total(spec.total_label.clone(), total)
    } else {
        series
    }
}
