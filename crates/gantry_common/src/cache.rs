//! Synchronized LRU caches.
//!
//! The namespace keeps four SQL-fingerprint caches (slow, error, backend
//! slow, backend error) and one plan cache. Capacity is fixed per cache;
//! inserting into a full cache evicts the least-recently-used entry.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

/// Capacity of each SQL fingerprint cache.
pub const SQL_CACHE_CAPACITY: usize = 64;
/// Capacity of the query plan cache.
pub const PLAN_CACHE_CAPACITY: usize = 128;

/// An LRU map behind a mutex, shareable across sessions and the admin path.
pub struct SyncLru<V> {
    entries: Mutex<LruCache<String, V>>,
}

impl<V: Clone> SyncLru<V> {
    /// A zero capacity is clamped to one entry.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Fetch a value, marking the key most-recently-used.
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }

    /// Insert or replace, evicting the LRU entry on overflow.
    pub fn put(&self, key: impl Into<String>, value: V) {
        self.entries.lock().put(key.into(), value);
    }

    /// Insert only when the key is absent. Returns whether the value was
    /// stored. Concurrent equivalent builds keep the first one.
    pub fn put_if_absent(&self, key: impl Into<String>, value: V) -> bool {
        let key = key.into();
        let mut entries = self.entries.lock();
        if entries.contains(&key) {
            return false;
        }
        entries.put(key, value);
        true
    }

    /// Snapshot of all entries; iteration order is unspecified and recency
    /// is not affected.
    pub fn entries(&self) -> Vec<(String, V)> {
        self.entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let cache = SyncLru::with_capacity(4);
        cache.put("k1", "v1".to_string());
        assert_eq!(cache.get("k1").as_deref(), Some("v1"));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn test_overflow_evicts_lru() {
        let cache = SyncLru::with_capacity(2);
        cache.put("a", 1);
        cache.put("b", 2);
        // touch "a" so "b" becomes the eviction candidate
        assert_eq!(cache.get("a"), Some(1));
        cache.put("c", 3);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn test_put_if_absent_keeps_first() {
        let cache = SyncLru::with_capacity(4);
        assert!(cache.put_if_absent("k", 1));
        assert!(!cache.put_if_absent("k", 2));
        assert_eq!(cache.get("k"), Some(1));
    }

    #[test]
    fn test_entries_snapshot() {
        let cache = SyncLru::with_capacity(4);
        cache.put("a", 1);
        cache.put("b", 2);
        let mut entries = cache.entries();
        entries.sort();
        assert_eq!(entries, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn test_clear() {
        let cache = SyncLru::with_capacity(4);
        cache.put("a", 1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let cache = SyncLru::with_capacity(0);
        cache.put("a", 1);
        assert_eq!(cache.len(), 1);
    }
}
