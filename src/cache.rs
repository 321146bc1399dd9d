//! Thread-safe bounded cache with least-recently-used eviction
//!
//! This module provides a fixed-capacity key/value store for expensive
//! decoded resources. Inserting at capacity evicts from the cold end, and
//! evicted values are dropped under the cache lock so that anything owning
//! native memory is released deterministically on the calling thread.

use parking_lot::Mutex;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// A thread-safe, count-bounded cache with LRU eviction.
///
/// Holds at most `max_count - 1` entries at rest: an insert that brings the
/// map to `max_count` entries evicts least-recently-used entries until the
/// count is back to `max_count - 1`. Both `add` and `get` promote the key
/// to most-recently-used. Displaced values (evicted, removed, cleared, or
/// overwritten) are dropped exactly once, inside the lock, so callers
/// should expect `add` to block briefly while stale resources are released.
pub struct BoundedCache<K, V> {
    inner: Mutex<BoundedCacheInner<K, V>>,
}

struct BoundedCacheInner<K, V> {
    data: HashMap<K, (V, u64)>, // value, access stamp
    max_count: usize,
    access_counter: u64,
}

impl<K: Clone + Hash + Eq, V> BoundedCache<K, V> {
    /// Create a cache bounded to `max_count` entries.
    ///
    /// # Panics
    ///
    /// Panics if `max_count` is zero.
    pub fn new(max_count: usize) -> Self {
        assert!(max_count > 0, "cache capacity must be at least 1");
        Self {
            inner: Mutex::new(BoundedCacheInner {
                data: HashMap::new(),
                max_count,
                access_counter: 0,
            }),
        }
    }

    /// Insert or overwrite the value for `key`, promoting it to most
    /// recently used. Overwriting drops the previous value. May evict (and
    /// drop) least-recently-used entries to satisfy the capacity bound.
    pub fn add(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        inner.add(key, value);
    }

    /// Look up `key`, promoting it to most recently used on a hit.
    ///
    /// A missing key is a cache miss, not an error.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let mut inner = self.inner.lock();
        inner.get(key)
    }

    /// Remove the entry for `key`, returning its value if present.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.inner.lock();
        inner.data.remove(key).map(|(value, _)| value)
    }

    /// Remove and drop the entry for `key`; reports whether it was present.
    pub fn try_remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove(key).is_some()
    }

    /// Check for `key` without promoting it.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().data.contains_key(key)
    }

    /// Drop all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.data.clear();
        inner.access_counter = 0;
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured capacity bound.
    pub fn capacity(&self) -> usize {
        self.inner.lock().max_count
    }
}

impl<K: Clone + Hash + Eq, V> BoundedCacheInner<K, V> {
    fn add(&mut self, key: K, value: V) {
        self.access_counter += 1;
        let stamp = self.access_counter;
        // Overwriting an existing key drops the old value here.
        self.data.insert(key, (value, stamp));

        while self.data.len() >= self.max_count && !self.data.is_empty() {
            self.evict_lru();
        }
    }

    fn get<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.access_counter += 1;
        let stamp = self.access_counter;
        if let Some(entry) = self.data.get_mut(key) {
            entry.1 = stamp;
            Some(entry.0.clone())
        } else {
            None
        }
    }

    fn evict_lru(&mut self) {
        let mut oldest_key = None;
        let mut oldest_stamp = u64::MAX;

        for (key, (_, stamp)) in &self.data {
            if *stamp < oldest_stamp {
                oldest_stamp = *stamp;
                oldest_key = Some(key.clone());
            }
        }

        if let Some(key) = oldest_key {
            self.data.remove(&key);
        }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BoundedCache")
            .field("len", &inner.data.len())
            .field("max_count", &inner.max_count)
            .finish()
    }
}
