//! Query result cache
//!
//! Process-local, stampede-resistant cache with two lifetimes per entry:
//! - younger than `ttl`: served as is
//! - younger than `stale_ttl`: served immediately while one background task
//!   recomputes it
//! - older, or absent: the caller computes synchronously
//!
//! Every computation runs as a single flight per key. Concurrent callers
//! that find a flight in progress await its result instead of computing
//! again, and all of them receive the same value or error.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::error::Result;

/// Default fresh lifetime of a cached result
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Default maximum number of cached keys
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Expiry used when `stale_ttl` runs past what `Instant` can represent
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

// =============================================================================
// Policy
// =============================================================================

/// Per-query caching policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Use the cache at all
    pub enabled: bool,
    /// Age below which an entry is fresh
    pub ttl: Duration,
    /// Age below which a stale entry may still be served
    pub stale_ttl: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }
}

impl CachePolicy {
    /// Enabled policy whose stale window is half the fresh lifetime
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            enabled: true,
            ttl,
            stale_ttl: ttl.saturating_add(ttl / 2),
        }
    }

    /// Policy that bypasses the cache
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set the stale lifetime (clamped to at least `ttl`)
    pub fn with_stale_ttl(mut self, stale_ttl: Duration) -> Self {
        self.stale_ttl = stale_ttl.max(self.ttl);
        self
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Cache counters
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Fresh hits
    pub hits: AtomicU64,
    /// Stale entries served
    pub stale_hits: AtomicU64,
    /// Lookups that had to wait for a computation
    pub misses: AtomicU64,
    /// Lookups with caching disabled
    pub bypasses: AtomicU64,
    /// Background refreshes started
    pub refreshes: AtomicU64,
    /// Recomputations of an existing entry that failed
    pub refresh_failures: AtomicU64,
}

impl CacheStats {
    /// Share of cached lookups answered without waiting
    pub fn hit_rate(&self) -> f64 {
        let served =
            self.hits.load(Ordering::Relaxed) + self.stale_hits.load(Ordering::Relaxed);
        let total = served + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.stale_hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.bypasses.store(0, Ordering::Relaxed);
        self.refreshes.store(0, Ordering::Relaxed);
        self.refresh_failures.store(0, Ordering::Relaxed);
    }
}

// =============================================================================
// Cache
// =============================================================================

type Flight<V> = Arc<OnceCell<Result<V>>>;

struct Entry<V> {
    value: V,
    stored_at: Instant,
    expires_at: Instant,
}

struct Slot<V> {
    entry: Option<Entry<V>>,
    flight: Option<Flight<V>>,
    refresh_failed: bool,
}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Self {
            entry: None,
            flight: None,
            refresh_failed: false,
        }
    }
}

enum Lookup<V> {
    Fresh(V),
    Stale(V, Option<Flight<V>>),
    Miss(Flight<V>),
}

struct Inner<V> {
    slots: Mutex<HashMap<String, Slot<V>>>,
    max_entries: usize,
    stats: CacheStats,
}

/// Single-flight query cache keyed by canonical query strings
///
/// Cloning shares the underlying cache.
pub struct QueryCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for QueryCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for QueryCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.inner.slots.lock().len())
            .field("max_entries", &self.inner.max_entries)
            .finish()
    }
}

impl<V> Default for QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl<V> QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache holding at most `max_entries` keys
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                max_entries: max_entries.max(1),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Return the cached value for `key`, computing it when needed
    ///
    /// `compute` is invoked at most once per call and only when this call
    /// starts the flight; callers joining a flight drop theirs unused.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, policy: CachePolicy, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let stats = &self.inner.stats;

        if !policy.enabled {
            stats.bypasses.fetch_add(1, Ordering::Relaxed);
            return compute().await;
        }

        match self.inner.lookup(key, &policy) {
            Lookup::Fresh(value) => {
                stats.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key, "cache hit");
                Ok(value)
            }
            Lookup::Stale(value, refresh) => {
                stats.stale_hits.fetch_add(1, Ordering::Relaxed);
                if let Some(flight) = refresh {
                    stats.refreshes.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key, "cache stale, refreshing in background");
                    let inner = Arc::clone(&self.inner);
                    let key = key.to_string();
                    tokio::spawn(async move {
                        let _ = fly(inner, key, flight, policy, compute).await;
                    });
                } else {
                    tracing::debug!(key, "cache stale");
                }
                Ok(value)
            }
            Lookup::Miss(flight) => {
                stats.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key, "cache miss");
                fly(Arc::clone(&self.inner), key.to_string(), flight, policy, compute).await
            }
        }
    }

    /// Drop the entry for `key`
    ///
    /// A computation already in flight still completes and stores its result.
    pub fn invalidate(&self, key: &str) {
        let mut slots = self.inner.slots.lock();
        if let Some(slot) = slots.get_mut(key) {
            slot.entry = None;
            slot.refresh_failed = false;
            if slot.flight.is_none() {
                slots.remove(key);
            }
        }
    }

    /// Drop every entry without a computation in flight
    pub fn clear(&self) {
        self.inner.slots.lock().retain(|_, slot| slot.flight.is_some());
    }

    /// Number of cached keys
    pub fn len(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// Check if the cache holds no keys
    pub fn is_empty(&self) -> bool {
        self.inner.slots.lock().is_empty()
    }

    /// Cache counters
    pub fn stats(&self) -> &CacheStats {
        &self.inner.stats
    }
}

/// Run or join the flight for `key`
async fn fly<V, F, Fut>(
    inner: Arc<Inner<V>>,
    key: String,
    flight: Flight<V>,
    policy: CachePolicy,
    compute: F,
) -> Result<V>
where
    V: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<V>> + Send + 'static,
{
    let cell = Arc::clone(&flight);
    cell.get_or_init(|| async move {
        let mut guard = FlightGuard {
            inner,
            key,
            flight,
            armed: true,
        };
        let result = compute().await;
        guard.inner.settle(&guard.key, &guard.flight, &policy, &result);
        guard.armed = false;
        result
    })
    .await
    .clone()
}

/// Releases the slot's flight if the initialising future is dropped
/// before it settles
struct FlightGuard<V: Clone> {
    inner: Arc<Inner<V>>,
    key: String,
    flight: Flight<V>,
    armed: bool,
}

impl<V: Clone> Drop for FlightGuard<V> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(key = %self.key, "cache computation abandoned");
            self.inner.abandon(&self.key, &self.flight);
        }
    }
}

impl<V: Clone> Inner<V> {
    fn lookup(&self, key: &str, policy: &CachePolicy) -> Lookup<V> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.to_string()).or_default();

        if let Some(entry) = &slot.entry {
            let age = now.saturating_duration_since(entry.stored_at);
            if age < policy.ttl {
                return Lookup::Fresh(entry.value.clone());
            }
            if age < policy.stale_ttl {
                let value = entry.value.clone();
                if slot.flight.is_some() || slot.refresh_failed {
                    return Lookup::Stale(value, None);
                }
                let flight: Flight<V> = Arc::new(OnceCell::new());
                slot.flight = Some(Arc::clone(&flight));
                return Lookup::Stale(value, Some(flight));
            }
        }

        let flight = slot
            .flight
            .get_or_insert_with(|| Arc::new(OnceCell::new()));
        Lookup::Miss(Arc::clone(flight))
    }

    fn settle(&self, key: &str, flight: &Flight<V>, policy: &CachePolicy, result: &Result<V>) {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.to_string()).or_default();

        if slot.flight.as_ref().is_some_and(|f| Arc::ptr_eq(f, flight)) {
            slot.flight = None;
        }

        match result {
            Ok(value) => {
                slot.entry = Some(Entry {
                    value: value.clone(),
                    stored_at: now,
                    expires_at: now
                        .checked_add(policy.stale_ttl)
                        .or_else(|| now.checked_add(FAR_FUTURE))
                        .unwrap_or(now),
                });
                slot.refresh_failed = false;
            }
            Err(err) if slot.entry.is_some() => {
                slot.refresh_failed = true;
                self.stats.refresh_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key, error = %err, "cache recomputation failed, keeping previous value");
            }
            Err(_) => {}
        }

        if slot.entry.is_none() && slot.flight.is_none() {
            slots.remove(key);
        }

        self.evict(&mut slots, now);
    }

    fn abandon(&self, key: &str, flight: &Flight<V>) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            return;
        };

        if slot.flight.as_ref().is_some_and(|f| Arc::ptr_eq(f, flight)) {
            slot.flight = None;
        }
        if slot.entry.is_none() && slot.flight.is_none() {
            slots.remove(key);
        }
    }

    fn evict(&self, slots: &mut HashMap<String, Slot<V>>, now: Instant) {
        if slots.len() <= self.max_entries {
            return;
        }

        slots.retain(|_, slot| {
            slot.flight.is_some() || slot.entry.as_ref().is_some_and(|e| e.expires_at > now)
        });

        while slots.len() > self.max_entries {
            let oldest = slots
                .iter()
                .filter(|(_, slot)| slot.flight.is_none())
                .min_by_key(|(_, slot)| slot.entry.as_ref().map(|e| e.stored_at))
                .map(|(key, _)| key.clone());

            match oldest {
                Some(key) => {
                    slots.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
