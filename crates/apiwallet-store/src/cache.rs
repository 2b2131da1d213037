//! Persistent TTL cache.
//!
//! One [`TtlCache`] instance per logical domain (quota results, model lists,
//! availability probes). Each instance owns a namespace key in the
//! [`KeyValueStore`] and serializes its whole map there on every mutation.
//! Entries carry only their insertion time; expiry is a property of the
//! cache (`now - stored_at > ttl`). Stale entries are evicted lazily on
//! access and in bulk by [`TtlCache::sweep`], which a background task can
//! run periodically via [`TtlCache::spawn_sweeper`].
//!
//! Concurrent writers to the same namespace are not merged: the last
//! persisted map wins.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::StoreResult;
use crate::kv::KeyValueStore;

/// Default freshness window.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

/// Default period of the background sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

// ── cache stats ──────────────────────────────────────────────────────

/// Counters tracking cache effectiveness.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_expirations(&self, n: u64) {
        self.expirations.fetch_add(n, Ordering::Relaxed);
    }

    /// Total cache hits since creation.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total cache misses since creation (absent or expired).
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Entries dropped because they outlived the TTL.
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Hit rate between 0.0 and 1.0 (0.0 if nothing was looked up yet).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} expired={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.expirations(),
            self.hit_rate() * 100.0,
        )
    }
}

// ── entries ──────────────────────────────────────────────────────────

/// A cached value and the instant it was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub value: T,
    pub stored_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        // A negative age (clock moved backwards) counts as fresh.
        now.signed_duration_since(self.stored_at)
            .to_std()
            .map(|age| age > ttl)
            .unwrap_or(false)
    }
}

// ── cache ────────────────────────────────────────────────────────────

/// A namespaced, persisted, expiring key → value map.
///
/// # Example
///
/// ```ignore
/// let cache: TtlCache<NormalizedQuota> = TtlCache::builder("quotaCache", store)
///     .ttl(Duration::from_secs(600))
///     .build()?;
///
/// if let Some(hit) = cache.get("deepseek:k1")? {
///     return Ok(hit);
/// }
/// ```
pub struct TtlCache<T> {
    namespace: String,
    ttl: Duration,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    stats: CacheStats,
}

impl<T> TtlCache<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    /// Start building a cache persisted under `namespace` in `store`.
    pub fn builder(
        namespace: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
    ) -> TtlCacheBuilder<T> {
        TtlCacheBuilder {
            namespace: namespace.into(),
            store,
            ttl: DEFAULT_TTL,
            clock: Arc::new(SystemClock),
            _marker: PhantomData,
        }
    }

    /// Look up `key`. Expired entries are evicted (and the map persisted)
    /// before reporting a miss.
    pub fn get(&self, key: &str) -> StoreResult<Option<T>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock()?;

        if let Some(entry) = entries.get(key) {
            if !entry.is_expired(now, self.ttl) {
                self.stats.record_hit();
                debug!(cache = %self.namespace, key = key, "cache hit");
                return Ok(Some(entry.value.clone()));
            }
            let mut next = entries.clone();
            next.remove(key);
            self.commit(&mut entries, next)?;
            self.stats.record_expirations(1);
            debug!(cache = %self.namespace, key = key, "cache entry expired");
        } else {
            debug!(cache = %self.namespace, key = key, "cache miss");
        }

        self.stats.record_miss();
        Ok(None)
    }

    /// Store `value` under `key`, stamped with the current time.
    pub fn set(&self, key: impl Into<String>, value: T) -> StoreResult<()> {
        let key = key.into();
        let stored_at = self.clock.now();
        let mut entries = self.entries.lock()?;
        debug!(cache = %self.namespace, key = %key, "cache insert");
        let mut next = entries.clone();
        next.insert(key, CacheEntry { value, stored_at });
        self.commit(&mut entries, next)
    }

    /// Remove `key`. Persists even when the key was absent.
    pub fn delete(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock()?;
        let mut next = entries.clone();
        next.remove(key);
        debug!(cache = %self.namespace, key = key, "cache invalidate");
        self.commit(&mut entries, next)
    }

    /// Remove every key starting with `prefix`; returns how many went.
    pub fn delete_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let mut entries = self.entries.lock()?;
        let mut next = entries.clone();
        next.retain(|key, _| !key.starts_with(prefix));
        let removed = entries.len() - next.len();
        debug!(cache = %self.namespace, prefix = prefix, removed, "cache invalidate prefix");
        self.commit(&mut entries, next)?;
        Ok(removed)
    }

    /// Drop every entry.
    pub fn clear(&self) -> StoreResult<()> {
        let mut entries = self.entries.lock()?;
        debug!(cache = %self.namespace, "cache cleared");
        self.commit(&mut entries, HashMap::new())
    }

    /// Evict every entry older than the TTL, persisting once if anything
    /// was removed. Returns the number of evicted entries.
    pub fn sweep(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        let mut entries = self.entries.lock()?;
        let mut next = entries.clone();
        next.retain(|_, entry| !entry.is_expired(now, self.ttl));
        let removed = entries.len() - next.len();

        if removed > 0 {
            self.commit(&mut entries, next)?;
            self.stats.record_expirations(removed as u64);
        }
        debug!(cache = %self.namespace, removed, remaining = entries.len(), "cache sweep");
        Ok(removed)
    }

    /// Run [`sweep`](Self::sweep) every `period` on the tokio runtime.
    ///
    /// The task holds only a weak reference and ends once the cache is
    /// dropped. Must be called from within a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = period.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                if let Err(err) = cache.sweep() {
                    warn!(cache = %cache.namespace, %err, "periodic cache sweep failed");
                }
            }
        })
    }

    /// Number of entries currently held, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Persist `next`, then make it the in-memory map. On a failed write the
    /// in-memory map is left as it was.
    fn commit(
        &self,
        entries: &mut HashMap<String, CacheEntry<T>>,
        next: HashMap<String, CacheEntry<T>>,
    ) -> StoreResult<()> {
        let json = serde_json::to_string(&next)?;
        self.store.set(&self.namespace, &json)?;
        *entries = next;
        Ok(())
    }
}

// ── builder ──────────────────────────────────────────────────────────

/// Builder for [`TtlCache`].
pub struct TtlCacheBuilder<T> {
    namespace: String,
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    _marker: PhantomData<T>,
}

impl<T> TtlCacheBuilder<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    /// Freshness window for every entry (default 10 minutes).
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Time source (default [`SystemClock`]).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Load any persisted map for the namespace and build the cache.
    ///
    /// A persisted map that no longer parses is discarded with a warning;
    /// cached data is always safe to refetch.
    pub fn build(self) -> StoreResult<TtlCache<T>> {
        let entries = match self.store.get(&self.namespace)? {
            Some(raw) => match serde_json::from_str::<HashMap<String, CacheEntry<T>>>(&raw) {
                Ok(map) => map,
                Err(err) => {
                    warn!(cache = %self.namespace, %err, "persisted cache unreadable, starting empty");
                    HashMap::new()
                }
            },
            None => HashMap::new(),
        };

        debug!(
            cache = %self.namespace,
            ttl_secs = self.ttl.as_secs(),
            loaded = entries.len(),
            "cache created"
        );

        Ok(TtlCache {
            namespace: self.namespace,
            ttl: self.ttl,
            store: self.store,
            clock: self.clock,
            entries: Mutex::new(entries),
            stats: CacheStats::default(),
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::StoreError;
    use crate::kv::MemoryStore;
    use chrono::TimeDelta;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestRecord {
        id: u64,
        name: String,
    }

    fn record(id: u64, name: &str) -> TestRecord {
        TestRecord {
            id,
            name: name.to_string(),
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, TtlCache<TestRecord>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let cache = TtlCache::builder("test", store.clone())
            .ttl(Duration::from_secs(600))
            .clock(clock.clone())
            .build()
            .unwrap();
        (store, clock, cache)
    }

    #[test]
    fn set_then_get_returns_value() {
        let (_store, _clock, cache) = setup();
        cache.set("rec:1", record(1, "Alice")).unwrap();
        assert_eq!(cache.get("rec:1").unwrap(), Some(record(1, "Alice")));
    }

    #[test]
    fn miss_returns_none() {
        let (_store, _clock, cache) = setup();
        assert_eq!(cache.get("nonexistent").unwrap(), None);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn entry_at_exactly_ttl_is_still_fresh() {
        let (_store, clock, cache) = setup();
        cache.set("rec:1", record(1, "a")).unwrap();
        clock.advance(TimeDelta::seconds(600));
        assert!(cache.get("rec:1").unwrap().is_some());
    }

    #[test]
    fn expired_entry_is_evicted_on_access() {
        let (store, clock, cache) = setup();
        cache.set("rec:1", record(1, "a")).unwrap();
        clock.advance(TimeDelta::seconds(601));

        assert_eq!(cache.get("rec:1").unwrap(), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations(), 1);

        let persisted = store.get("test").unwrap().unwrap();
        assert_eq!(persisted, "{}");
    }

    #[test]
    fn sweep_removes_only_stale_entries_and_persists_once() {
        let (store, clock, cache) = setup();
        cache.set("old:1", record(1, "a")).unwrap();
        cache.set("old:2", record(2, "b")).unwrap();
        clock.advance(TimeDelta::seconds(400));
        cache.set("new:1", record(3, "c")).unwrap();
        clock.advance(TimeDelta::seconds(300));

        let writes_before = store.write_count();
        let removed = cache.sweep().unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.write_count(), writes_before + 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("new:1").unwrap().is_some());
    }

    #[test]
    fn sweep_without_stale_entries_does_not_write() {
        let (store, _clock, cache) = setup();
        cache.set("a", record(1, "a")).unwrap();
        let writes_before = store.write_count();
        assert_eq!(cache.sweep().unwrap(), 0);
        assert_eq!(store.write_count(), writes_before);
    }

    #[test]
    fn delete_and_clear_persist() {
        let (store, _clock, cache) = setup();
        cache.set("a", record(1, "a")).unwrap();
        cache.set("b", record(2, "b")).unwrap();

        let writes_before = store.write_count();
        cache.delete("missing").unwrap();
        assert_eq!(store.write_count(), writes_before + 1);

        cache.delete("a").unwrap();
        assert_eq!(cache.get("a").unwrap(), None);

        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert_eq!(store.get("test").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn delete_prefix_removes_matching_keys() {
        let (_store, _clock, cache) = setup();
        cache.set("deepseek:k1", record(1, "a")).unwrap();
        cache.set("deepseek:k2", record(2, "b")).unwrap();
        cache.set("kimi:k1", record(3, "c")).unwrap();

        assert_eq!(cache.delete_prefix("deepseek:").unwrap(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn reload_from_store_keeps_entries_and_timestamps() {
        let (store, clock, cache) = setup();
        cache.set("rec:1", record(1, "Alice")).unwrap();
        drop(cache);

        clock.advance(TimeDelta::seconds(300));
        let reloaded: TtlCache<TestRecord> = TtlCache::builder("test", store.clone())
            .ttl(Duration::from_secs(600))
            .clock(clock.clone())
            .build()
            .unwrap();
        assert_eq!(reloaded.get("rec:1").unwrap(), Some(record(1, "Alice")));

        clock.advance(TimeDelta::seconds(301));
        assert_eq!(reloaded.get("rec:1").unwrap(), None);
    }

    #[test]
    fn corrupt_persisted_map_starts_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set("test", "not json").unwrap();
        let cache: TtlCache<TestRecord> = TtlCache::builder("test", store).build().unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn namespaces_are_independent() {
        let store = Arc::new(MemoryStore::new());
        let a: TtlCache<TestRecord> = TtlCache::builder("a", store.clone()).build().unwrap();
        let b: TtlCache<TestRecord> = TtlCache::builder("b", store.clone()).build().unwrap();
        a.set("k", record(1, "a")).unwrap();
        assert_eq!(b.get("k").unwrap(), None);
        assert!(store.get("a").unwrap().is_some());
    }

    #[test]
    fn default_ttl_is_ten_minutes() {
        let store = Arc::new(MemoryStore::new());
        let cache: TtlCache<TestRecord> = TtlCache::builder("x", store).build().unwrap();
        assert_eq!(cache.ttl(), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn sweeper_task_evicts_in_background() {
        let (_store, clock, cache) = setup();
        let cache = Arc::new(cache);
        cache.set("rec:1", record(1, "a")).unwrap();
        clock.advance(TimeDelta::seconds(601));

        let handle = cache.spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.len(), 0);

        drop(cache);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop once the cache is dropped")
            .unwrap();
    }

    #[test]
    fn stats_display() {
        let stats = CacheStats::default();
        stats.hits.store(50, Ordering::Relaxed);
        stats.misses.store(50, Ordering::Relaxed);
        let display = format!("{stats}");
        assert!(display.contains("hits=50"));
        assert!(display.contains("50.00%"));
    }

    /// Accepts writes until `fail_writes` is flipped.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: std::sync::atomic::AtomicBool,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> StoreResult<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> StoreResult<()> {
            if self.fail_writes.load(std::sync::atomic::Ordering::Relaxed) {
                return Err(StoreError::LockPoisoned("write rejected".into()));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> StoreResult<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn failed_persist_leaves_memory_unchanged() {
        let store = Arc::new(FlakyStore::default());
        let cache: TtlCache<TestRecord> = TtlCache::builder("test", store.clone())
            .build()
            .unwrap();
        cache.set("a", record(1, "a")).unwrap();
        let persisted = store.get("test").unwrap();

        store
            .fail_writes
            .store(true, std::sync::atomic::Ordering::Relaxed);
        assert!(cache.set("b", record(2, "b")).is_err());
        assert!(cache.delete("a").is_err());
        assert!(cache.delete_prefix("a").is_err());
        assert!(cache.clear().is_err());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a").unwrap(), Some(record(1, "a")));
        assert_eq!(cache.get("b").unwrap(), None);
        assert_eq!(store.get("test").unwrap(), persisted);
    }
}
