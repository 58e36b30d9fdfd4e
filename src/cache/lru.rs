//! Fixed-capacity least-recently-used cache
//!
//! Entries carry a monotonically increasing recency tick; a `BTreeMap` from tick to
//! key gives the eviction order. The cache is not synchronized; the connectivity
//! caches wrap it in a lock.

use crate::cache::CacheError;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;

/// Callback invoked with every entry that leaves the cache
pub type EvictCallback<K, V> = Box<dyn FnMut(&K, &V) + Send + Sync>;

struct Slot<V> {
    value: V,
    tick: u64,
}

/// Fixed-capacity key/value cache with least-recently-used eviction
pub struct EvictionCache<K, V> {
    capacity: usize,
    entries: HashMap<K, Slot<V>>,
    recency: BTreeMap<u64, K>,
    next_tick: u64,
    on_evict: Option<EvictCallback<K, V>>,
}

impl<K, V> EvictionCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates a cache holding at most `capacity` entries
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidCapacity`] when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        if capacity == 0 {
            return Err(CacheError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            on_evict: None,
        })
    }

    /// Creates a cache that reports every removed entry to `on_evict`
    pub fn with_eviction_callback(
        capacity: usize,
        on_evict: EvictCallback<K, V>,
    ) -> Result<Self, CacheError> {
        let mut cache = Self::new(capacity)?;
        cache.on_evict = Some(on_evict);
        Ok(cache)
    }

    /// Adds or replaces a value, marking it most recently used
    ///
    /// Returns true if the insertion evicted the oldest entry.
    pub fn add(&mut self, key: K, value: V) -> bool {
        let tick = self.bump();
        if let Some(slot) = self.entries.get_mut(&key) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            slot.value = value;
            self.recency.insert(tick, key);
            return false;
        }

        self.recency.insert(tick, key.clone());
        self.entries.insert(key, Slot { value, tick });

        if self.entries.len() > self.capacity {
            self.remove_oldest();
            return true;
        }
        false
    }

    /// Looks up a value and marks it most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let tick = self.bump();
        let slot = self.entries.get_mut(key)?;
        self.recency.remove(&slot.tick);
        slot.tick = tick;
        self.recency.insert(tick, key.clone());
        Some(&slot.value)
    }

    /// Looks up a value without touching its recency
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Checks for a key without touching its recency
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes a key, returning true if it was present
    pub fn remove(&mut self, key: &K) -> bool {
        match self.entries.remove_entry(key) {
            Some((key, slot)) => {
                self.recency.remove(&slot.tick);
                self.notify(&key, &slot.value);
                true
            }
            None => false,
        }
    }

    /// Removes and returns the least recently used entry
    pub fn remove_oldest(&mut self) -> Option<(K, V)> {
        let (_, key) = self.recency.pop_first()?;
        let slot = self.entries.remove(&key)?;
        self.notify(&key, &slot.value);
        Some((key, slot.value))
    }

    /// Returns the least recently used entry without removing it
    pub fn oldest(&self) -> Option<(&K, &V)> {
        let (_, key) = self.recency.first_key_value()?;
        self.entries.get(key).map(|slot| (key, &slot.value))
    }

    /// Keys from least to most recently used
    pub fn keys(&self) -> Vec<K> {
        self.recency.values().cloned().collect()
    }

    /// Changes the capacity, evicting the oldest entries that no longer fit
    ///
    /// Returns the number of evicted entries.
    pub fn resize(&mut self, capacity: usize) -> Result<usize, CacheError> {
        if capacity == 0 {
            return Err(CacheError::InvalidCapacity(capacity));
        }
        let overflow = self.entries.len().saturating_sub(capacity);
        for _ in 0..overflow {
            self.remove_oldest();
        }
        self.capacity = capacity;
        Ok(overflow)
    }

    /// Removes every entry, reporting each to the eviction callback
    pub fn purge(&mut self) {
        while self.remove_oldest().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn notify(&mut self, key: &K, value: &V) {
        if let Some(callback) = self.on_evict.as_mut() {
            callback(key, value);
        }
    }
}

impl<K, V> fmt::Debug for EvictionCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvictionCache")
            .field("capacity", &self.capacity)
            .field("len", &self.entries.len())
            .finish()
    }
}
