//! Memory Cache - Bounded LRU Working Set
//!
//! The in-process tier of a region. A hash map plus a recency list (from the
//! `lru` crate) behind one mutex per region, so callers, the shrinker and
//! eviction never interleave inside the structure.
//!
//! # Eviction
//!
//! Eviction is an explicit step at the end of [`LruMemoryCache::update`]: once
//! the map holds more than `max_objects` entries, a chunk is popped from the
//! least-recent end and returned to the caller, which is expected to spool it.
//! The size bound therefore holds as soon as `update` returns.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use super::element::{now_millis, CacheElement};
use super::KEY_DELIMITER;

/// Memory cache configuration
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Maximum number of elements held
    pub max_objects: usize,
    /// Number of elements evicted at once when over capacity
    pub spool_chunk_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_objects: super::DEFAULT_MAX_OBJECTS,
            spool_chunk_size: super::DEFAULT_SPOOL_CHUNK_SIZE,
        }
    }
}

/// Bounded LRU memory cache
pub struct LruMemoryCache {
    /// Map + recency order, most recent first
    storage: Mutex<LruCache<String, CacheElement>>,
    /// Configuration
    config: MemoryConfig,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
    /// Eviction count
    evictions: AtomicU64,
}

impl LruMemoryCache {
    /// Create a new memory cache with default configuration
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    /// Create a new memory cache with custom configuration
    pub fn with_config(config: MemoryConfig) -> Self {
        Self {
            storage: Mutex::new(LruCache::unbounded()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get an element, marking it most recent and refreshing its last access
    pub fn get(&self, key: &str) -> Option<CacheElement> {
        let mut storage = self.storage.lock();
        match storage.get_mut(key) {
            Some(element) => {
                element.attributes_mut().touch(now_millis());
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(element.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Get an element without touching recency, access time or counters
    pub fn get_quiet(&self, key: &str) -> Option<CacheElement> {
        self.storage.lock().peek(key).cloned()
    }

    /// Insert or replace an element and return whatever had to be evicted to
    /// stay within capacity, least recent first.
    pub fn update(&self, element: CacheElement) -> Vec<CacheElement> {
        let mut storage = self.storage.lock();
        storage.put(element.key().to_string(), element);
        self.evict_locked(&mut storage)
    }

    fn evict_locked(&self, storage: &mut LruCache<String, CacheElement>) -> Vec<CacheElement> {
        let len = storage.len();
        if len <= self.config.max_objects {
            return Vec::new();
        }

        let over = len - self.config.max_objects;
        let chunk = self.config.spool_chunk_size.max(1).min(len);
        let count = over.max(chunk);

        let mut evicted = Vec::with_capacity(count);
        for _ in 0..count {
            match storage.pop_lru() {
                Some((_, element)) => evicted.push(element),
                None => break,
            }
        }
        self.evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        evicted
    }

    /// Remove the `count` least recently used elements and hand them back
    pub fn free_elements(&self, count: usize) -> Vec<CacheElement> {
        let mut storage = self.storage.lock();
        let mut freed = Vec::with_capacity(count.min(storage.len()));
        for _ in 0..count {
            match storage.pop_lru() {
                Some((_, element)) => freed.push(element),
                None => break,
            }
        }
        self.evictions
            .fetch_add(freed.len() as u64, Ordering::Relaxed);
        freed
    }

    /// Remove a key. A key ending in the hierarchical delimiter removes every
    /// key that starts with it. Returns true if anything was removed.
    pub fn remove(&self, key: &str) -> bool {
        let mut storage = self.storage.lock();
        if key.ends_with(KEY_DELIMITER) {
            let doomed: Vec<String> = storage
                .iter()
                .filter(|(k, _)| k.starts_with(key))
                .map(|(k, _)| k.clone())
                .collect();
            for k in &doomed {
                storage.pop(k);
            }
            !doomed.is_empty()
        } else {
            storage.pop(key).is_some()
        }
    }

    /// Remove a single key exactly and return the element
    pub fn take(&self, key: &str) -> Option<CacheElement> {
        self.storage.lock().pop(key)
    }

    /// Remove a single key only if the stored element still satisfies
    /// `pred`. The check and the removal happen under one lock, so a value
    /// stored after the caller's snapshot is left alone.
    pub fn take_if(
        &self,
        key: &str,
        pred: impl FnOnce(&CacheElement) -> bool,
    ) -> Option<CacheElement> {
        let mut storage = self.storage.lock();
        match storage.peek(key) {
            Some(current) if pred(current) => storage.pop(key),
            _ => None,
        }
    }

    /// Check if the cache contains a key
    pub fn contains(&self, key: &str) -> bool {
        self.storage.lock().contains(key)
    }

    /// Snapshot of all keys
    pub fn key_set(&self) -> HashSet<String> {
        self.storage.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Keys ordered from most to least recently used
    pub fn keys_by_recency(&self) -> Vec<String> {
        self.storage.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Snapshot of all elements without touching recency
    pub fn elements(&self) -> Vec<CacheElement> {
        self.storage.lock().iter().map(|(_, v)| v.clone()).collect()
    }

    /// Remove everything
    pub fn clear(&self) {
        self.storage.lock().clear();
    }

    /// Get number of elements
    pub fn len(&self) -> usize {
        self.storage.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.lock().is_empty()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.config.max_objects
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

impl Default for LruMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cache(max_objects: usize, chunk: usize) -> LruMemoryCache {
        LruMemoryCache::with_config(MemoryConfig {
            max_objects,
            spool_chunk_size: chunk,
        })
    }

    fn element(key: &str) -> CacheElement {
        CacheElement::new("test", key, format!("value-{}", key))
    }

    #[test]
    fn test_put_get() {
        let cache = cache(10, 1);
        assert!(cache.update(element("a")).is_empty());

        let got = cache.get("a").unwrap();
        assert_eq!(got.value().as_ref(), b"value-a");
        assert_eq!(cache.hits(), 1);

        assert!(cache.get("missing").is_none());
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_first_inserted_is_evicted() {
        let cache = cache(3, 1);
        for key in ["a", "b", "c"] {
            assert!(cache.update(element(key)).is_empty());
        }

        let evicted = cache.update(element("d"));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].key(), "a");
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("a"));
    }

    #[test]
    fn test_get_protects_from_eviction() {
        let cache = cache(3, 1);
        for key in ["a", "b", "c"] {
            cache.update(element(key));
        }

        cache.get("a");
        let evicted = cache.update(element("d"));
        assert_eq!(evicted[0].key(), "b");
        assert!(cache.contains("a"));
    }

    #[test]
    fn test_get_quiet_does_not_touch_recency() {
        let cache = cache(3, 1);
        for key in ["a", "b", "c"] {
            cache.update(element(key));
        }
        let before = cache.get_quiet("a").unwrap().attributes().last_access();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let quiet = cache.get_quiet("a").unwrap();
        assert_eq!(quiet.attributes().last_access(), before);
        assert_eq!(cache.hits(), 0);

        let evicted = cache.update(element("d"));
        assert_eq!(evicted[0].key(), "a");
    }

    #[test]
    fn test_take_if_leaves_replaced_entry() {
        let cache = cache(3, 1);
        cache.update(element("a"));
        let snapshot = cache.get_quiet("a").unwrap();

        cache.update(CacheElement::new("test", "a", "fresh"));
        assert!(cache.take_if("a", |current| current.same_entry(&snapshot)).is_none());
        assert_eq!(cache.get_quiet("a").unwrap().value().as_ref(), b"fresh");

        let snapshot = cache.get_quiet("a").unwrap();
        let taken = cache.take_if("a", |current| current.same_entry(&snapshot)).unwrap();
        assert_eq!(taken.value().as_ref(), b"fresh");
        assert!(!cache.contains("a"));
        assert!(cache.take_if("a", |_| true).is_none());
    }

    #[test]
    fn test_get_refreshes_last_access() {
        let cache = cache(3, 1);
        cache.update(element("a"));
        let before = cache.get_quiet("a").unwrap().attributes().last_access();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let after = cache.get("a").unwrap().attributes().last_access();
        assert!(after > before);
    }

    #[test]
    fn test_chunked_eviction() {
        let cache = cache(4, 2);
        for key in ["a", "b", "c", "d"] {
            cache.update(element(key));
        }

        let evicted = cache.update(element("e"));
        let keys: Vec<&str> = evicted.iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_replace_does_not_evict() {
        let cache = cache(2, 1);
        cache.update(element("a"));
        cache.update(element("b"));
        assert!(cache.update(element("a")).is_empty());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys_by_recency(), vec!["a", "b"]);
    }

    #[test]
    fn test_zero_capacity_evicts_immediately() {
        let cache = cache(0, 2);
        let evicted = cache.update(element("a"));
        assert_eq!(evicted.len(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hierarchical_remove() {
        let cache = cache(10, 1);
        for key in ["user:1", "user:2", "users", "group:1"] {
            cache.update(element(key));
        }

        assert!(cache.remove("user:"));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("users"));
        assert!(cache.contains("group:1"));

        assert!(!cache.remove("user:"));
        assert!(cache.remove("users"));
        assert!(!cache.remove("users"));
    }

    #[test]
    fn test_free_elements() {
        let cache = cache(10, 1);
        for key in ["a", "b", "c"] {
            cache.update(element(key));
        }
        let freed = cache.free_elements(2);
        assert_eq!(freed.len(), 2);
        assert_eq!(freed[0].key(), "a");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.free_elements(5).len(), 1);
    }

    #[test]
    fn test_concurrent_updates_respect_capacity() {
        use std::sync::Arc;
        use std::thread;

        let cache = Arc::new(cache(50, 2));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..500 {
                        cache.update(element(&format!("{}-{}", t, i)));
                        assert!(cache.len() <= 50);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.len() <= 50);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_capacity_never_exceeded(
            max in 0usize..20,
            chunk in 1usize..5,
            keys in prop::collection::vec(0u16..64, 1..200),
        ) {
            let cache = cache(max, chunk);
            for k in keys {
                cache.update(element(&k.to_string()));
                prop_assert!(cache.len() <= max);
            }
        }

        #[test]
        fn prop_evicted_plus_resident_accounts_for_every_key(
            keys in prop::collection::vec(0u16..32, 1..100),
        ) {
            let cache = cache(8, 1);
            let mut evicted = HashSet::new();
            let mut inserted = HashSet::new();
            for k in keys {
                let key = k.to_string();
                evicted.remove(&key);
                inserted.insert(key.clone());
                for e in cache.update(element(&key)) {
                    evicted.insert(e.key().to_string());
                }
            }
            let resident = cache.key_set();
            prop_assert!(resident.is_disjoint(&evicted));
            let all: HashSet<String> = resident.union(&evicted).cloned().collect();
            prop_assert_eq!(all, inserted);
        }
    }
}
