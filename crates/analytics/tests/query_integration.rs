//! Integration tests for statistic queries
//!
//! Record events through the write path and read them back through the
//! engine, all against the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use tally_analytics::{
    Aggregate, AnalyticsError, CachePolicy, Metric, MetricsEngine, NamedMetric, StatisticQuery,
};
use tally_query::{AggregateRows, MemoryStore, StatisticStore, StoreError, StoreQuery};

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, minute, 0).unwrap()
}

/// Store wrapper counting aggregate calls, optionally slowed down
struct CountingStore {
    inner: MemoryStore,
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    fn slow(inner: MemoryStore, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(inner)
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatisticStore for CountingStore {
    async fn aggregate(&self, query: &StoreQuery) -> Result<AggregateRows, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.aggregate(query).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

async fn record(store: &MemoryStore, metric: &NamedMetric, when: DateTime<Utc>, user: &str) {
    metric
        .increment()
        .occurred_at(when)
        .with("user", user)
        .commit(store)
        .await
        .unwrap();
}

async fn signups_store() -> MemoryStore {
    let store = MemoryStore::new();
    let signups = NamedMetric::new("signups");
    record(&store, &signups, at(1, 10, 0), "a").await;
    record(&store, &signups, at(1, 11, 30), "a").await;
    record(&store, &signups, at(2, 9, 0), "b").await;
    store
}

fn daily(start: u32, end: u32) -> StatisticQuery {
    StatisticQuery::new("signups")
        .between(at(start, 0, 0), at(end, 0, 0))
        .group_by_day()
}

#[tokio::test]
async fn test_signups_per_day() {
    let engine = MetricsEngine::new(Arc::new(signups_store().await));

    let series = engine.sum(daily(1, 2)).await.unwrap();

    assert_eq!(
        serde_json::to_value(&series).unwrap(),
        json!([
            {"period": "2024-01-01", "value": 2.0},
            {"period": "2024-01-02", "value": 1.0}
        ])
    );
}

#[tokio::test]
async fn test_unique_by_counts_distinct_parameter_values() {
    let engine = MetricsEngine::new(Arc::new(signups_store().await));

    let series = engine
        .count(daily(1, 1).unique_by("user"))
        .await
        .unwrap();

    assert_eq!(series.values(), vec![2.0]);
}

#[tokio::test]
async fn test_missing_buckets_zero_filled() {
    let store = MemoryStore::new();
    let signups = NamedMetric::new("signups");
    record(&store, &signups, at(1, 8, 0), "a").await;
    record(&store, &signups, at(1, 9, 0), "b").await;
    for hour in 0..5 {
        record(&store, &signups, at(3, hour, 0), "c").await;
    }
    let engine = MetricsEngine::new(Arc::new(store));

    let series = engine
        .sum(daily(1, 3).include_total(true))
        .await
        .unwrap();
    assert_eq!(series.values(), vec![2.0, 0.0, 5.0, 7.0]);
    assert_eq!(series.total().unwrap().period, "Total");

    let series = engine
        .avg(daily(1, 3).include_total(true).without_cache())
        .await
        .unwrap();
    assert_eq!(series.values(), vec![1.0, 0.0, 1.0, 2.0 / 3.0]);

    let series = engine
        .get(daily(1, 3).aggregate(Aggregate::Count).include_total(true).total_label("All"))
        .await
        .unwrap();
    assert_eq!(series.values(), vec![2.0, 0.0, 5.0, 7.0]);
    assert_eq!(series.total().unwrap().period, "All");

    let series = engine.max(daily(1, 3).include_total(true)).await.unwrap();
    assert_eq!(series.total().unwrap().value, 1.0);
}

#[tokio::test]
async fn test_empty_range_is_not_an_error() {
    let engine = MetricsEngine::new(Arc::new(MemoryStore::new()));

    let series = engine.sum(daily(1, 3)).await.unwrap();
    assert_eq!(series.values(), vec![0.0, 0.0, 0.0]);

    let series = engine.sum(daily(1, 3).ungrouped()).await.unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series.buckets()[0].period, "2024-01-01 - 2024-01-03");
    assert_eq!(series.buckets()[0].value, 0.0);
}

#[tokio::test]
async fn test_filters_restrict_events() {
    let store = signups_store().await;
    let engine = MetricsEngine::new(Arc::new(store));

    let series = engine.sum(daily(1, 2).where_eq("user", "a")).await.unwrap();
    assert_eq!(series.values(), vec![2.0, 0.0]);

    let series = engine.sum(daily(1, 2).where_not("user", "a")).await.unwrap();
    assert_eq!(series.values(), vec![0.0, 1.0]);

    let series = engine
        .sum(daily(1, 2).where_eq("user", "a").or_where("user", "b"))
        .await
        .unwrap();
    assert_eq!(series.values(), vec![2.0, 1.0]);
}

#[tokio::test]
async fn test_invalid_combination_rejected_before_store_access() {
    let store = Arc::new(CountingStore::new(signups_store().await));
    let engine = MetricsEngine::new(Arc::clone(&store) as Arc<dyn StatisticStore>);

    let result = engine.avg(daily(1, 2).unique_by("user_id")).await;

    assert!(matches!(
        result,
        Err(AnalyticsError::UnsupportedAggregateCombination { .. })
    ));
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn test_repeated_queries_are_idempotent() {
    let store = Arc::new(CountingStore::new(signups_store().await));
    let engine = MetricsEngine::new(Arc::clone(&store) as Arc<dyn StatisticStore>);

    let cached = engine.sum(daily(1, 2)).await.unwrap();
    assert_eq!(engine.sum(daily(1, 2)).await.unwrap(), cached);
    assert_eq!(store.calls(), 1);

    let uncached = engine.sum(daily(1, 2).without_cache()).await.unwrap();
    assert_eq!(uncached, cached);
    assert_eq!(store.calls(), 2);
}

#[tokio::test]
async fn test_concurrent_queries_share_one_store_call() {
    let store = Arc::new(CountingStore::slow(
        signups_store().await,
        Duration::from_millis(50),
    ));
    let engine = MetricsEngine::new(Arc::clone(&store) as Arc<dyn StatisticStore>);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.sum(daily(1, 2)).await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().values(), vec![2.0, 1.0]);
    }
    assert_eq!(store.calls(), 1);
}

#[tokio::test]
async fn test_stale_result_refreshed_in_background() {
    let store = MemoryStore::new();
    let signups = NamedMetric::new("signups");
    record(&store, &signups, at(1, 10, 0), "a").await;
    let engine = MetricsEngine::new(Arc::new(store.clone()));

    let stale = CachePolicy {
        enabled: true,
        ttl: Duration::ZERO,
        stale_ttl: Duration::from_secs(3600),
    };
    let query = || daily(1, 1).cache_policy(stale);

    assert_eq!(engine.sum(query()).await.unwrap().values(), vec![1.0]);

    record(&store, &signups, at(1, 12, 0), "b").await;
    assert_eq!(engine.sum(query()).await.unwrap().values(), vec![1.0]);

    let mut refreshed = false;
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if engine.sum(query()).await.unwrap().values() == vec![2.0] {
            refreshed = true;
            break;
        }
    }
    assert!(refreshed, "background refresh never stored the new value");
}

#[tokio::test]
async fn test_slow_store_times_out() {
    let store = Arc::new(CountingStore::slow(
        MemoryStore::new(),
        Duration::from_millis(500),
    ));
    let engine = MetricsEngine::new(store);

    let result = engine
        .sum(daily(1, 2).timeout(Duration::from_millis(20)))
        .await;

    let err = result.unwrap_err();
    assert_eq!(err, AnalyticsError::Timeout(Duration::from_millis(20)));
    assert!(err.is_retryable());
    assert!(engine.cache().is_empty());
}

#[tokio::test]
async fn test_metric_query_with_scope() {
    struct Signups;

    impl Metric for Signups {
        fn name(&self) -> &str {
            "signups"
        }

        fn apply_scope(
            &self,
            query: &mut StatisticQuery,
            name: &str,
            _args: &[serde_json::Value],
        ) -> bool {
            if name == "returning" {
                query.filters_mut().where_eq("user", "a");
                return true;
            }
            false
        }
    }

    let engine = MetricsEngine::new(Arc::new(signups_store().await));
    let query = engine
        .query_metric(Arc::new(Signups))
        .between(at(1, 0, 0), at(2, 0, 0))
        .scope("returning", &[]);

    assert_eq!(engine.count(query).await.unwrap().values(), vec![2.0, 0.0]);
}
