//! Bounded series key/id cache
//!
//! Two LRU maps kept side by side: series key -> series id for lookups by
//! tag set, series id -> series key when a cursor needs the tags back.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::types::SeriesId;

/// Snapshot of the cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeriesIndexStats {
    /// Lookups served, hits and misses
    pub requests: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Entries in the key -> id map
    pub entries: usize,
}

impl SeriesIndexStats {
    /// Hit ratio in `[0, 1]`, 0 when nothing was requested
    pub fn hit_ratio(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        (self.requests - self.misses) as f64 / self.requests as f64
    }
}

/// LRU cache resolving series keys to ids and back
pub struct SeriesIndexCache {
    by_key: Mutex<LruCache<Vec<u8>, SeriesId>>,
    by_id: Mutex<LruCache<SeriesId, Vec<u8>>>,
    requests: AtomicU64,
    misses: AtomicU64,
}

impl SeriesIndexCache {
    /// Cache holding at most `capacity` series (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            by_key: Mutex::new(LruCache::new(capacity)),
            by_id: Mutex::new(LruCache::new(capacity)),
            requests: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Id of the series with `key`
    pub fn get_id(&self, key: &[u8]) -> Option<SeriesId> {
        let found = self.by_key.lock().get(key).copied();
        self.count(found.is_some());
        found
    }

    /// Key of the series `id`
    pub fn get_key(&self, id: SeriesId) -> Option<Vec<u8>> {
        let found = self.by_id.lock().get(&id).cloned();
        self.count(found.is_some());
        found
    }

    /// Remember `key <-> id`, evicting the least recently used entry when full
    pub fn insert(&self, key: Vec<u8>, id: SeriesId) {
        self.by_id.lock().put(id, key.clone());
        self.by_key.lock().put(key, id);
    }

    /// Drop the entries of series `id`
    pub fn remove(&self, id: SeriesId) {
        if let Some(key) = self.by_id.lock().pop(&id) {
            self.by_key.lock().pop(&key);
        }
    }

    /// Number of cached series
    pub fn len(&self) -> usize {
        self.by_key.lock().len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry and reset the counters
    pub fn clear(&self) {
        self.by_key.lock().clear();
        self.by_id.lock().clear();
        self.requests.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Counter snapshot
    pub fn stats(&self) -> SeriesIndexStats {
        SeriesIndexStats {
            requests: self.requests.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn count(&self, hit: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if !hit {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for SeriesIndexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesIndexCache")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::series_key;

    fn key(host: &str) -> Vec<u8> {
        series_key("cpu", &[("host".to_string(), host.to_string())])
    }

    #[test]
    fn test_lookup_both_directions() {
        let cache = SeriesIndexCache::new(8);
        cache.insert(key("a"), 1);
        assert_eq!(cache.get_id(&key("a")), Some(1));
        assert_eq!(cache.get_key(1), Some(key("a")));
        assert_eq!(cache.get_id(&key("b")), None);

        let stats = cache.stats();
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_ratio() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = SeriesIndexCache::new(2);
        cache.insert(key("a"), 1);
        cache.insert(key("b"), 2);
        // touch a, so b is the eviction candidate
        assert!(cache.get_id(&key("a")).is_some());
        cache.insert(key("c"), 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.get_id(&key("b")).is_none());
        assert!(cache.get_id(&key("c")).is_some());
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = SeriesIndexCache::new(4);
        cache.insert(key("a"), 1);
        cache.remove(1);
        assert!(cache.get_id(&key("a")).is_none());
        cache.insert(key("b"), 2);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), SeriesIndexStats::default());
    }
}
