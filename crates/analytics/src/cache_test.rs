//! Tests for the query cache

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::*;
use crate::error::AnalyticsError;
use tally_query::StoreError;

fn fresh() -> CachePolicy {
    CachePolicy::with_ttl(Duration::from_secs(3600))
}

/// Every entry is stale but servable
fn always_stale() -> CachePolicy {
    CachePolicy {
        enabled: true,
        ttl: Duration::ZERO,
        stale_ttl: Duration::from_secs(3600),
    }
}

/// Every entry is hard-expired
fn always_expired() -> CachePolicy {
    CachePolicy {
        enabled: true,
        ttl: Duration::ZERO,
        stale_ttl: Duration::ZERO,
    }
}

fn unavailable() -> AnalyticsError {
    AnalyticsError::Store(StoreError::Unavailable("down".into()))
}

/// Compute closure returning successive counter values
fn counting(
    calls: &Arc<AtomicUsize>,
) -> impl FnOnce() -> std::future::Ready<Result<usize>> + Send + 'static {
    let calls = Arc::clone(calls);
    move || std::future::ready(Ok(calls.fetch_add(1, Ordering::SeqCst) + 1))
}

async fn wait_for_refresh(cache: &QueryCache<usize>, key: &str, expected: usize) {
    for _ in 0..200 {
        let value = cache
            .get_or_compute(key, fresh(), || async { Err(unavailable()) })
            .await;
        if value == Ok(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("background refresh never stored {}", expected);
}

#[test]
fn test_policy_defaults() {
    let policy = CachePolicy::default();
    assert!(policy.enabled);
    assert_eq!(policy.ttl, Duration::from_secs(900));
    assert_eq!(policy.stale_ttl, Duration::from_secs(1350));
    assert!(!CachePolicy::disabled().enabled);
}

#[test]
fn test_policy_stale_ttl_clamped() {
    let policy = CachePolicy::with_ttl(Duration::from_secs(60)).with_stale_ttl(Duration::from_secs(10));
    assert_eq!(policy.stale_ttl, Duration::from_secs(60));
}

#[test]
fn test_policy_huge_ttl_saturates() {
    let policy = CachePolicy::with_ttl(Duration::MAX);
    assert_eq!(policy.ttl, Duration::MAX);
    assert_eq!(policy.stale_ttl, Duration::MAX);
}

#[tokio::test]
async fn test_huge_ttl_entry_is_stored() {
    let cache = QueryCache::new(16);
    let calls = Arc::new(AtomicUsize::new(0));
    let forever = CachePolicy::with_ttl(Duration::MAX);

    assert_eq!(cache.get_or_compute("k", forever, counting(&calls)).await, Ok(1));
    assert_eq!(cache.get_or_compute("k", forever, counting(&calls)).await, Ok(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fresh_hit_skips_compute() {
    let cache = QueryCache::new(16);
    let calls = Arc::new(AtomicUsize::new(0));

    assert_eq!(cache.get_or_compute("k", fresh(), counting(&calls)).await, Ok(1));
    assert_eq!(cache.get_or_compute("k", fresh(), counting(&calls)).await, Ok(1));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
    assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_keys_are_independent() {
    let cache = QueryCache::new(16);
    let calls = Arc::new(AtomicUsize::new(0));

    assert_eq!(cache.get_or_compute("a", fresh(), counting(&calls)).await, Ok(1));
    assert_eq!(cache.get_or_compute("b", fresh(), counting(&calls)).await, Ok(2));
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn test_disabled_policy_bypasses() {
    let cache = QueryCache::new(16);
    let calls = Arc::new(AtomicUsize::new(0));

    for expected in 1..=3 {
        let value = cache
            .get_or_compute("k", CachePolicy::disabled(), counting(&calls))
            .await;
        assert_eq!(value, Ok(expected));
    }
    assert!(cache.is_empty());
    assert_eq!(cache.stats().bypasses.load(Ordering::Relaxed), 3);
}

#[tokio::test]
async fn test_concurrent_misses_coalesce() {
    let cache: QueryCache<usize> = QueryCache::new(16);
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get_or_compute("k", fresh(), move || async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(calls.fetch_add(1, Ordering::SeqCst) + 41)
                })
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Ok(41));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_waiters_share_error() {
    let cache: QueryCache<usize> = QueryCache::new(16);
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get_or_compute("k", fresh(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err(unavailable())
                })
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Err(unavailable()));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_errors_are_not_cached() {
    let cache = QueryCache::new(16);
    let calls = Arc::new(AtomicUsize::new(0));

    let first = cache
        .get_or_compute("k", fresh(), || async { Err(unavailable()) })
        .await;
    assert!(first.is_err());
    assert!(cache.is_empty());

    assert_eq!(cache.get_or_compute("k", fresh(), counting(&calls)).await, Ok(1));
}

#[tokio::test]
async fn test_stale_entry_served_and_refreshed_once() {
    let cache = QueryCache::new(16);
    let calls = Arc::new(AtomicUsize::new(0));

    assert_eq!(cache.get_or_compute("k", fresh(), counting(&calls)).await, Ok(1));

    let slow_calls = Arc::clone(&calls);
    let slow_refresh = move || async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(slow_calls.fetch_add(1, Ordering::SeqCst) + 1)
    };

    // Both callers get the stale value; only the first starts a refresh
    assert_eq!(cache.get_or_compute("k", always_stale(), slow_refresh).await, Ok(1));
    assert_eq!(cache.get_or_compute("k", always_stale(), counting(&calls)).await, Ok(1));

    wait_for_refresh(&cache, "k", 2).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.stats().refreshes.load(Ordering::Relaxed), 1);
    assert_eq!(cache.stats().stale_hits.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn test_failed_refresh_keeps_stale_value() {
    let cache = QueryCache::new(16);
    let calls = Arc::new(AtomicUsize::new(0));

    assert_eq!(cache.get_or_compute("k", fresh(), counting(&calls)).await, Ok(1));

    let failing_calls = Arc::clone(&calls);
    let failing = move || async move {
        failing_calls.fetch_add(1, Ordering::SeqCst);
        Err(unavailable())
    };
    assert_eq!(cache.get_or_compute("k", always_stale(), failing).await, Ok(1));

    for _ in 0..200 {
        if cache.stats().refresh_failures.load(Ordering::Relaxed) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(cache.stats().refresh_failures.load(Ordering::Relaxed), 1);

    // Stale value still served, no further background refresh
    assert_eq!(cache.get_or_compute("k", always_stale(), counting(&calls)).await, Ok(1));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Once hard-expired, the next caller recomputes synchronously
    assert_eq!(cache.get_or_compute("k", always_expired(), counting(&calls)).await, Ok(3));
}

#[tokio::test]
async fn test_expired_entry_recomputed_synchronously() {
    let cache = QueryCache::new(16);
    let calls = Arc::new(AtomicUsize::new(0));

    assert_eq!(cache.get_or_compute("k", always_expired(), counting(&calls)).await, Ok(1));
    assert_eq!(cache.get_or_compute("k", always_expired(), counting(&calls)).await, Ok(2));
    assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn test_invalidate_and_clear() {
    let cache = QueryCache::new(16);
    let calls = Arc::new(AtomicUsize::new(0));

    cache.get_or_compute("a", fresh(), counting(&calls)).await.unwrap();
    cache.get_or_compute("b", fresh(), counting(&calls)).await.unwrap();

    cache.invalidate("a");
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get_or_compute("a", fresh(), counting(&calls)).await, Ok(3));

    cache.clear();
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_evicts_oldest_over_capacity() {
    let cache = QueryCache::new(2);
    let calls = Arc::new(AtomicUsize::new(0));

    for key in ["a", "b", "c"] {
        cache.get_or_compute(key, fresh(), counting(&calls)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert_eq!(cache.len(), 2);
    // "a" was evicted and is recomputed
    assert_eq!(cache.get_or_compute("a", fresh(), counting(&calls)).await, Ok(4));
}

#[tokio::test]
async fn test_evicts_expired_first() {
    let cache = QueryCache::new(2);
    let calls = Arc::new(AtomicUsize::new(0));

    cache.get_or_compute("fresh", fresh(), counting(&calls)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    cache.get_or_compute("expired", always_expired(), counting(&calls)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    cache.get_or_compute("new", fresh(), counting(&calls)).await.unwrap();

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get_or_compute("fresh", fresh(), counting(&calls)).await, Ok(1));
}

#[test]
fn test_hit_rate() {
    let stats = CacheStats::default();
    assert_eq!(stats.hit_rate(), 0.0);
    stats.hits.store(3, Ordering::Relaxed);
    stats.misses.store(1, Ordering::Relaxed);
    assert_eq!(stats.hit_rate(), 0.75);
    stats.reset();
    assert_eq!(stats.hits.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_dropped_computation_releases_flight() {
    let cache = QueryCache::new(16);
    let calls = Arc::new(AtomicUsize::new(0));

    assert_eq!(cache.get_or_compute("k", fresh(), counting(&calls)).await, Ok(1));

    // The only caller gives up before its recomputation settles
    let hung = cache.get_or_compute("k", always_expired(), || async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(99)
    });
    assert!(tokio::time::timeout(Duration::from_millis(10), hung).await.is_err());

    // The stale entry still triggers a background refresh
    assert_eq!(cache.get_or_compute("k", always_stale(), counting(&calls)).await, Ok(1));
    wait_for_refresh(&cache, "k", 2).await;
    assert_eq!(cache.stats().refreshes.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_dropped_first_computation_leaves_no_slot() {
    let cache: QueryCache<usize> = QueryCache::new(16);

    let hung = cache.get_or_compute("k", fresh(), || async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(1)
    });
    assert!(tokio::time::timeout(Duration::from_millis(10), hung).await.is_err());

    assert!(cache.is_empty());
}
