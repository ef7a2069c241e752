//! Cache update records
//!
//! While a write transaction runs, every value mutation is also appended to
//! the collection's pending `CacheUpdates`. On commit the batch is tagged with
//! the transaction's snapshot number and handed to the database-level
//! registry, from where other connections replay it into their own caches.
//!
//! Replay is idempotent: an upsert stores the same value again, a removal of
//! an absent key is a no-op, and remove-all of an empty cache stays empty.

use crate::types::SnapshotNumber;
use std::sync::Arc;

/// One value-level mutation
#[derive(Debug)]
pub enum CacheUpdate<V> {
    /// `key` now maps to `value`
    Upserted {
        /// Primary key
        key: String,
        /// New value
        value: Arc<V>,
    },
    /// `key` no longer has a value
    Removed {
        /// Primary key
        key: String,
    },
    /// The collection was emptied
    AllRemoved,
}

impl<V> Clone for CacheUpdate<V> {
    fn clone(&self) -> Self {
        match self {
            CacheUpdate::Upserted { key, value } => CacheUpdate::Upserted {
                key: key.clone(),
                value: Arc::clone(value),
            },
            CacheUpdate::Removed { key } => CacheUpdate::Removed { key: key.clone() },
            CacheUpdate::AllRemoved => CacheUpdate::AllRemoved,
        }
    }
}

/// Ordered cache updates of one collection, optionally tagged with the
/// snapshot they were committed at
#[derive(Debug)]
pub struct CacheUpdates<V> {
    snapshot: Option<SnapshotNumber>,
    updates: Vec<CacheUpdate<V>>,
}

impl<V> Default for CacheUpdates<V> {
    fn default() -> Self {
        CacheUpdates {
            snapshot: None,
            updates: Vec::new(),
        }
    }
}

impl<V> CacheUpdates<V> {
    /// Create an empty, untagged list
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `value` was stored under `key`
    pub fn record_value_upserted(&mut self, key: &str, value: Arc<V>) {
        self.updates.push(CacheUpdate::Upserted {
            key: key.to_string(),
            value,
        });
    }

    /// Record that `key` was removed
    pub fn record_value_removed(&mut self, key: &str) {
        self.updates.push(CacheUpdate::Removed {
            key: key.to_string(),
        });
    }

    /// Record that every value was removed
    pub fn record_all_values_removed(&mut self) {
        self.updates.push(CacheUpdate::AllRemoved);
    }

    /// Updates in origination order
    pub fn updates(&self) -> &[CacheUpdate<V>] {
        &self.updates
    }

    /// Snapshot these updates were committed at, if published
    pub fn snapshot(&self) -> Option<SnapshotNumber> {
        self.snapshot
    }

    /// Number of updates
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// True if no updates are pending
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Drop every pending update
    pub fn clear(&mut self) {
        self.updates.clear();
        self.snapshot = None;
    }

    /// Move the pending updates out, tagged with `snapshot`
    pub fn take_tagged(&mut self, snapshot: SnapshotNumber) -> CacheUpdates<V> {
        self.snapshot = None;
        CacheUpdates {
            snapshot: Some(snapshot),
            updates: std::mem::take(&mut self.updates),
        }
    }
}
