//! Sliding-expiration target cache
//!
//! Memoizes parse and resolution results keyed by expression text. An entry
//! survives as long as it keeps being read; once it sits unused for the
//! configured idle window it is evicted. There is no capacity bound: query
//! vocabularies (point tags, filter expressions) are small compared to
//! request volume.
//!
//! # Example
//!
//! ```rust
//! use kuba_expr::cache::TargetCache;
//! use std::time::Duration;
//!
//! let cache: TargetCache<String, usize> = TargetCache::new(Duration::from_secs(60));
//! let len = cache.get_or_insert_with("PPA:1; PPA:2".to_string(), || 2);
//! assert_eq!(len, 2);
//! assert_eq!(cache.get(&"PPA:1; PPA:2".to_string()), Some(2));
//! ```

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Cached value with its last access time
#[derive(Debug)]
struct CachedEntry<V> {
    data: V,
    /// Milliseconds since epoch of the last read or write
    last_access: AtomicI64,
}

impl<V> CachedEntry<V> {
    fn new(data: V) -> Self {
        Self {
            data,
            last_access: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    fn is_expired(&self, now: i64, idle_ms: i64) -> bool {
        now - self.last_access.load(Ordering::Relaxed) > idle_ms
    }

    fn touch(&self, now: i64) {
        self.last_access.store(now, Ordering::Relaxed);
    }
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Total cache hits
    pub hits: AtomicU64,

    /// Total cache misses
    pub misses: AtomicU64,

    /// Total evictions
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Hit ratio in `[0, 1]`, zero before any lookup
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Thread-safe memoization map with sliding expiration
pub struct TargetCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    entries: RwLock<HashMap<K, CachedEntry<V>>>,
    /// Idle window in milliseconds
    idle_ms: i64,
    /// Time of the last expired-entry sweep
    last_sweep: AtomicI64,
    stats: CacheStats,
}

impl<K, V> TargetCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache evicting entries unused for `expiration`
    pub fn new(expiration: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            idle_ms: expiration.as_millis().min(i64::MAX as u128) as i64,
            last_sweep: AtomicI64::new(Utc::now().timestamp_millis()),
            stats: CacheStats::default(),
        }
    }

    /// Get a live entry, refreshing its expiration
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Utc::now().timestamp_millis();
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now, self.idle_ms) => {
                entry.touch(now);
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.data.clone())
            }
            _ => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace an entry
    pub fn insert(&self, key: K, data: V) {
        self.maybe_sweep();
        self.entries.write().insert(key, CachedEntry::new(data));
    }

    /// Return the cached value or compute, store and return it
    pub fn get_or_insert_with<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(data) = self.get(&key) {
            return data;
        }
        let data = f();
        self.insert(key, data.clone());
        data
    }

    /// Fallible variant of [`get_or_insert_with`](Self::get_or_insert_with)
    ///
    /// Errors are returned to the caller and never cached.
    pub fn try_get_or_insert_with<F, E>(&self, key: K, f: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(data) = self.get(&key) {
            return Ok(data);
        }
        let data = f()?;
        self.insert(key, data.clone());
        Ok(data)
    }

    /// Remove all expired entries, returning how many were evicted
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now().timestamp_millis();
        self.last_sweep.store(now, Ordering::Relaxed);

        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now, self.idle_ms));
        let evicted = before - entries.len();

        self.stats
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Sweep at most once per idle window, piggybacking on writes
    fn maybe_sweep(&self) {
        let now = Utc::now().timestamp_millis();
        if now - self.last_sweep.load(Ordering::Relaxed) > self.idle_ms {
            self.cleanup_expired();
        }
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Entry count, including entries not yet swept
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Idle window
    pub fn expiration(&self) -> Duration {
        Duration::from_millis(self.idle_ms.max(0) as u64)
    }

    /// Hit/miss/eviction counters
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_get_or_insert_computes_once() {
        let cache: TargetCache<String, usize> = TargetCache::new(Duration::from_secs(60));
        let mut calls = 0;
        for _ in 0..3 {
            let v = cache.get_or_insert_with("expr".to_string(), || {
                calls += 1;
                42
            });
            assert_eq!(v, 42);
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache: TargetCache<String, usize> = TargetCache::new(Duration::from_secs(60));
        let result: Result<usize, String> =
            cache.try_get_or_insert_with("bad".to_string(), || Err("nope".to_string()));
        assert!(result.is_err());
        assert!(cache.is_empty());

        let ok: Result<usize, String> = cache.try_get_or_insert_with("bad".to_string(), || Ok(1));
        assert_eq!(ok, Ok(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_unused_entries_expire() {
        let cache: TargetCache<u64, String> = TargetCache::new(Duration::from_millis(20));
        cache.insert(1, "v1".to_string());
        cache.insert(2, "v2".to_string());

        std::thread::sleep(Duration::from_millis(60));

        assert!(cache.get(&1).is_none());
        assert_eq!(cache.cleanup_expired(), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_reads_slide_expiration() {
        let cache: TargetCache<u64, u64> = TargetCache::new(Duration::from_millis(150));
        cache.insert(1, 10);

        for _ in 0..4 {
            std::thread::sleep(Duration::from_millis(50));
            assert_eq!(cache.get(&1), Some(10));
        }
        // 200ms since insert, but never idle for 150ms
        assert_eq!(cache.cleanup_expired(), 0);
    }

    #[test]
    fn test_concurrent_access() {
        let cache: Arc<TargetCache<u64, u64>> = Arc::new(TargetCache::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let v = cache.get_or_insert_with(i % 10, || i % 10 * 2);
                        assert_eq!(v, (i % 10) * 2);
                    }
                    t
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 10);
    }

    #[test]
    fn test_hit_rate() {
        let cache: TargetCache<u64, u64> = TargetCache::new(Duration::from_secs(60));
        assert_eq!(cache.stats().hit_rate(), 0.0);
        cache.insert(1, 1);
        cache.get(&1);
        cache.get(&2);
        assert_eq!(cache.stats().hit_rate(), 0.5);
    }
}
