//! Snapshot registry
//!
//! Process-wide shared state created with the database. It owns:
//! - the snapshot counter: advanced only by a committing write transaction,
//!   which holds the global write lock while doing so
//! - the cache update log: per snapshot, the value mutations each collection
//!   received, in origination order
//! - the last snapshot every live connection has caught up to, which bounds
//!   how much of the log must be retained
//!
//! The registry lives behind one mutex; publication and catch-up range
//! queries both run under it. It is never held across store I/O.
//!
//! ## Commit protocol
//!
//! ```text
//! 1. N = current() + 1
//! 2. publish(N, collection, updates)   (staged: not yet fetchable)
//! 3. store prepare, registry unlocked
//! 4. store publish + mark_committed(N) in one critical section
//!    (fetchable; current() == N), or withdraw(N) if the prepare failed
//! ```

use rustc_hash::FxHashMap;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use turf_core::{ConnectionId, Error, Result, SnapshotNumber};

/// Type-erased `CacheUpdates<V>` of one collection
pub type ErasedUpdates = Arc<dyn Any + Send + Sync>;

struct PublishedEntry {
    collection: String,
    updates: ErasedUpdates,
}

/// Database-level snapshot counter and cache update log
pub struct SnapshotRegistry {
    current: SnapshotNumber,
    /// Entries at or below this snapshot have been pruned
    retained_after: SnapshotNumber,
    entries: BTreeMap<SnapshotNumber, Vec<PublishedEntry>>,
    connections: FxHashMap<ConnectionId, SnapshotNumber>,
    /// Max snapshots kept for lagging connections (0 = unbounded)
    retention: usize,
}

impl SnapshotRegistry {
    /// Create an empty registry
    pub fn new(retention: usize) -> Self {
        SnapshotRegistry {
            current: 0,
            retained_after: 0,
            entries: BTreeMap::new(),
            connections: FxHashMap::default(),
            retention,
        }
    }

    /// Highest committed snapshot
    pub fn current(&self) -> SnapshotNumber {
        self.current
    }

    /// Lowest exclusive bound `fetch` still accepts
    pub fn retained_after(&self) -> SnapshotNumber {
        self.retained_after
    }

    /// Number of snapshots with retained entries
    pub fn retained_snapshots(&self) -> usize {
        self.entries.len()
    }

    /// Stage `updates` for `collection` at `snapshot`
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` unless `snapshot` is the next snapshot.
    pub fn publish(
        &mut self,
        snapshot: SnapshotNumber,
        collection: &str,
        updates: ErasedUpdates,
    ) -> Result<()> {
        if snapshot != self.current + 1 {
            return Err(Error::InvalidOperation(format!(
                "Cannot publish snapshot {} while current snapshot is {}",
                snapshot, self.current
            )));
        }
        self.entries
            .entry(snapshot)
            .or_default()
            .push(PublishedEntry {
                collection: collection.to_string(),
                updates,
            });
        Ok(())
    }

    /// Make `snapshot` the current snapshot
    pub fn mark_committed(&mut self, snapshot: SnapshotNumber) {
        debug_assert_eq!(snapshot, self.current + 1);
        self.current = snapshot;
        self.prune();
    }

    /// Drop staged entries of a snapshot whose store commit failed
    pub fn withdraw(&mut self, snapshot: SnapshotNumber) {
        if snapshot > self.current {
            self.entries.remove(&snapshot);
        }
    }

    /// Updates for `collection` in `(after, up_to]`, in snapshot order and
    /// origination order within a snapshot
    ///
    /// # Errors
    ///
    /// - `SnapshotGap` if part of the range has been pruned
    /// - `InvalidOperation` if `up_to` is beyond the current snapshot
    pub fn fetch(
        &self,
        collection: &str,
        after: SnapshotNumber,
        up_to: SnapshotNumber,
    ) -> Result<Vec<ErasedUpdates>> {
        if up_to > self.current {
            return Err(Error::InvalidOperation(format!(
                "Cannot fetch up to snapshot {} beyond current snapshot {}",
                up_to, self.current
            )));
        }
        if after >= up_to {
            return Ok(Vec::new());
        }
        if after < self.retained_after {
            return Err(Error::SnapshotGap {
                requested_after: after,
                retained_after: self.retained_after,
            });
        }
        Ok(self
            .entries
            .range(after + 1..=up_to)
            .flat_map(|(_, entries)| entries.iter())
            .filter(|e| e.collection == collection)
            .map(|e| Arc::clone(&e.updates))
            .collect())
    }

    /// Track a new connection starting at the current snapshot
    pub fn register_connection(&mut self, id: ConnectionId) -> SnapshotNumber {
        self.connections.insert(id, self.current);
        self.current
    }

    /// Record that `id` has caught up to `snapshot`
    pub fn update_connection(&mut self, id: ConnectionId, snapshot: SnapshotNumber) {
        self.connections.insert(id, snapshot);
        self.prune();
    }

    /// Stop tracking `id`
    pub fn unregister_connection(&mut self, id: ConnectionId) {
        self.connections.remove(&id);
        self.prune();
    }

    fn prune(&mut self) {
        let min_live = self
            .connections
            .values()
            .copied()
            .min()
            .unwrap_or(self.current);
        let mut cut = min_live.max(self.retained_after);

        if self.retention > 0 {
            let floor = self.current.saturating_sub(self.retention as u64);
            if floor > cut {
                warn!(
                    target: "turf::cache",
                    lagging_at = min_live,
                    pruned_through = floor,
                    "Pruning cache updates a lagging connection still needs"
                );
                cut = floor;
            }
        }

        if cut > self.retained_after {
            // split_off keeps everything > cut
            self.entries = self.entries.split_off(&(cut + 1));
            self.retained_after = cut;
            debug!(target: "turf::cache", retained_after = cut, "Pruned cache update log");
        }
    }
}
