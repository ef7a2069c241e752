//! Per-connection value cache
//!
//! LRU-bounded map from primary key to deserialized value. Unbounded when the
//! collection declares no capacity; a capacity of zero disables caching.
//!
//! While a write transaction runs the cache keeps an undo log, so a rollback
//! puts back every entry the transaction touched. Evictions are never undone:
//! dropping an entry can't make the cache disagree with the store.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

enum CacheUndo<V> {
    /// Put `key` back to `previous` (absent when `None`)
    Restore {
        key: String,
        previous: Option<Arc<V>>,
    },
    /// Refill the cache with these entries, least recently used first
    RestoreAll(Vec<(String, Arc<V>)>),
}

/// LRU cache of deserialized values
pub struct ValueCache<V> {
    entries: LruCache<String, Arc<V>>,
    capacity: Option<usize>,
    undo: Option<Vec<CacheUndo<V>>>,
}

impl<V> ValueCache<V> {
    /// Create a cache bounded by `capacity` values (`None` = unbounded)
    pub fn new(capacity: Option<usize>) -> Self {
        let entries = match capacity.and_then(NonZeroUsize::new) {
            Some(n) => LruCache::new(n),
            None => LruCache::unbounded(),
        };
        ValueCache {
            entries,
            capacity,
            undo: None,
        }
    }

    fn enabled(&self) -> bool {
        self.capacity != Some(0)
    }

    /// Declared capacity
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Number of cached values
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached value for `key`, marking it most recently used
    pub fn get(&mut self, key: &str) -> Option<Arc<V>> {
        self.entries.get(key).cloned()
    }

    /// Cached value for `key` without touching recency
    pub fn peek(&self, key: &str) -> Option<&Arc<V>> {
        self.entries.peek(key)
    }

    /// True if `key` is cached
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    /// Cache `value` under `key`
    pub fn insert(&mut self, key: &str, value: Arc<V>) {
        if !self.enabled() {
            return;
        }
        let previous = self.entries.put(key.to_string(), value);
        self.record(key, previous);
    }

    /// Drop `key` from the cache
    pub fn remove(&mut self, key: &str) {
        let previous = self.entries.pop(key);
        if previous.is_some() {
            self.record(key, previous);
        }
    }

    /// Drop every cached value
    pub fn clear(&mut self) {
        if let Some(undo) = self.undo.as_mut() {
            let mut all: Vec<(String, Arc<V>)> = self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), Arc::clone(v)))
                .collect();
            // iter() is most recent first
            all.reverse();
            undo.push(CacheUndo::RestoreAll(all));
        }
        self.entries.clear();
    }

    /// Replace `key` with `value` only if it is already cached
    ///
    /// Used when replaying other connections' commits: keys this connection
    /// never looked at stay out of its cache.
    pub fn refresh(&mut self, key: &str, value: Arc<V>) {
        if let Some(slot) = self.entries.peek_mut(key) {
            *slot = value;
        }
    }

    /// Start recording an undo log
    pub fn begin_undo(&mut self) {
        self.undo = Some(Vec::new());
    }

    /// Keep every change made since `begin_undo`
    pub fn commit_undo(&mut self) {
        self.undo = None;
    }

    /// Revert every change made since `begin_undo`
    pub fn rollback_undo(&mut self) {
        let Some(log) = self.undo.take() else {
            return;
        };
        for entry in log.into_iter().rev() {
            match entry {
                CacheUndo::Restore { key, previous } => match previous {
                    Some(v) => {
                        self.entries.put(key, v);
                    }
                    None => {
                        self.entries.pop(&key);
                    }
                },
                CacheUndo::RestoreAll(all) => {
                    self.entries.clear();
                    for (k, v) in all {
                        self.entries.put(k, v);
                    }
                }
            }
        }
    }

    fn record(&mut self, key: &str, previous: Option<Arc<V>>) {
        if let Some(undo) = self.undo.as_mut() {
            undo.push(CacheUndo::Restore {
                key: key.to_string(),
                previous,
            });
        }
    }
}
