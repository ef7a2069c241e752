//! Per-connection, per-collection state
//!
//! Each connection owns one `LocalStorage` per collection it has touched:
//! - `value_cache`: deserialized values, consistent with the store as of the
//!   connection's snapshot (plus the active transaction's own writes)
//! - `change_set`: key-level mutations of the active transaction
//! - `cache_updates`: value mutations waiting to be published
//!
//! None of this is thread safe on its own; the owning connection's state
//! lock must be held for every call.

use std::any::Any;
use std::sync::Arc;
use tracing::debug;
use turf_core::{CacheUpdate, CacheUpdates, ChangeSet, Error, Result, SnapshotNumber};

use crate::database::snapshots::SnapshotRegistry;
use crate::value_cache::ValueCache;

/// Operations the connection performs on every collection's local storage
/// without knowing its value type
pub trait TypeErasedLocalStorage: Send + 'static {
    /// Name of the collection
    fn collection(&self) -> &str;

    /// Registration generation the cache was built for
    fn generation(&self) -> u64;

    /// Number of values currently cached
    fn cached_value_count(&self) -> usize;

    /// True if the value under `key` is cached
    fn is_value_cached(&self, key: &str) -> bool;

    /// Removes all values from the value cache
    fn reset_value_cache(&mut self);

    /// Rebuild the cache for a new capacity and generation
    fn reconfigure(&mut self, capacity: Option<usize>, generation: u64);

    /// Empties the change set
    fn reset_change_set(&mut self);

    /// Empties the list of pending cache updates
    fn reset_cache_updates(&mut self);

    /// True if this transaction produced cache updates
    fn has_pending_cache_updates(&self) -> bool;

    /// Returns a copy of the change set for delivery to permanent observers
    /// and clears it
    fn notify_observers(&mut self) -> ChangeSet;

    /// Hands the pending cache updates to `registry`, tagged with `snapshot`
    ///
    /// The updates are staged there before the store commit lands so the
    /// snapshot becomes fetchable the moment it is marked committed.
    ///
    /// # Errors
    ///
    /// Returns an error if `snapshot` is not the registry's next snapshot.
    fn record_pending_cache_updates(
        &mut self,
        snapshot: SnapshotNumber,
        registry: &mut SnapshotRegistry,
    ) -> Result<()>;

    /// Replays every update in `(min_snapshot, max_snapshot]` into the value
    /// cache
    ///
    /// Idempotent: replaying the same range twice leaves the same cache.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotGap` if the registry no longer holds the range.
    fn apply_change_sets(
        &mut self,
        min_snapshot: SnapshotNumber,
        max_snapshot: SnapshotNumber,
        registry: &SnapshotRegistry,
    ) -> Result<()>;

    /// Start a write transaction: cache changes become undoable
    fn begin_write(&mut self);

    /// Keep the write transaction's cache changes
    fn commit_write(&mut self);

    /// Undo the write transaction's cache changes and drop its records
    fn rollback_write(&mut self);

    /// Downcast support
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Local storage of one collection on one connection
pub struct LocalStorage<V> {
    collection: String,
    generation: u64,
    /// Cached values
    pub value_cache: ValueCache<V>,
    /// Mutations of the active transaction
    pub change_set: ChangeSet,
    /// Value mutations not yet published
    pub cache_updates: CacheUpdates<V>,
}

impl<V> LocalStorage<V> {
    /// Create empty local storage for `collection`
    pub fn new(collection: &str, capacity: Option<usize>, generation: u64) -> Self {
        LocalStorage {
            collection: collection.to_string(),
            generation,
            value_cache: ValueCache::new(capacity),
            change_set: ChangeSet::new(collection),
            cache_updates: CacheUpdates::new(),
        }
    }

    fn apply(&mut self, updates: &CacheUpdates<V>) {
        for update in updates.updates() {
            match update {
                CacheUpdate::Upserted { key, value } => {
                    self.value_cache.refresh(key, Arc::clone(value));
                }
                CacheUpdate::Removed { key } => self.value_cache.remove(key),
                CacheUpdate::AllRemoved => self.value_cache.clear(),
            }
        }
    }
}

impl<V: Send + Sync + 'static> TypeErasedLocalStorage for LocalStorage<V> {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn cached_value_count(&self) -> usize {
        self.value_cache.len()
    }

    fn is_value_cached(&self, key: &str) -> bool {
        self.value_cache.contains(key)
    }

    fn reset_value_cache(&mut self) {
        self.value_cache.clear();
    }

    fn reconfigure(&mut self, capacity: Option<usize>, generation: u64) {
        debug!(
            target: "turf::cache",
            collection = %self.collection,
            generation,
            "Rebuilding value cache"
        );
        self.value_cache = ValueCache::new(capacity);
        self.generation = generation;
    }

    fn reset_change_set(&mut self) {
        self.change_set.clear();
    }

    fn reset_cache_updates(&mut self) {
        self.cache_updates.clear();
    }

    fn has_pending_cache_updates(&self) -> bool {
        !self.cache_updates.is_empty()
    }

    fn notify_observers(&mut self) -> ChangeSet {
        self.change_set.drain()
    }

    fn record_pending_cache_updates(
        &mut self,
        snapshot: SnapshotNumber,
        registry: &mut SnapshotRegistry,
    ) -> Result<()> {
        let published = self.cache_updates.take_tagged(snapshot);
        registry.publish(snapshot, &self.collection, Arc::new(published))
    }

    fn apply_change_sets(
        &mut self,
        min_snapshot: SnapshotNumber,
        max_snapshot: SnapshotNumber,
        registry: &SnapshotRegistry,
    ) -> Result<()> {
        let batches = registry.fetch(&self.collection, min_snapshot, max_snapshot)?;
        for erased in &batches {
            let updates = erased
                .downcast_ref::<CacheUpdates<V>>()
                .ok_or_else(|| Error::CollectionTypeMismatch(self.collection.clone()))?;
            self.apply(updates);
        }
        if !batches.is_empty() {
            debug!(
                target: "turf::cache",
                collection = %self.collection,
                after = min_snapshot,
                up_to = max_snapshot,
                batches = batches.len(),
                "Applied cache updates"
            );
        }
        Ok(())
    }

    fn begin_write(&mut self) {
        self.value_cache.begin_undo();
    }

    fn commit_write(&mut self) {
        self.value_cache.commit_undo();
    }

    fn rollback_write(&mut self) {
        self.value_cache.rollback_undo();
        self.change_set.clear();
        self.cache_updates.clear();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
