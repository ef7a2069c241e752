//! Connections and the transaction lifecycle
//!
//! A connection owns per-collection local storage (value cache, change set,
//! pending cache updates) and the snapshot those caches are consistent with.
//! Transactions on one connection are serialized by its state lock; across
//! connections, read-write transactions are serialized by the database's
//! write lock while read transactions run concurrently.
//!
//! ## Begin
//!
//! ```text
//! 1. (read-write only) take the global write lock
//! 2. lock connection state; fail fast if the caches are inconsistent
//! 3. under the registry lock: max = current snapshot, open store view/batch
//! 4. rebuild caches whose registration generation changed
//! 5. replay cache updates in (snapshot, max] into every local storage
//! 6. snapshot = max; reset change sets
//! ```
//!
//! ## Commit
//!
//! ```text
//! 1. under the registry lock: N = current + 1, stage cache updates at N
//! 2. prepare the store batch, unlocked (withdraw N and roll back on failure)
//! 3. under the registry lock: publish the store state, mark N committed,
//!    snapshot = N
//! 4. drain change sets; release connection state
//! 5. deliver change sets to permanent observers; release the write lock
//! ```
//!
//! A panic inside a read-write transaction rolls it back before unwinding.
//!
//! Transactions must not be nested on the same connection, and observers
//! must not open read-write transactions synchronously.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::any::TypeId;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use turf_core::{
    ChangeSet, ConnectionId, Error, Result, SnapshotNumber, Storage, WriteBatch,
};

use crate::database::DatabaseInner;
use crate::extensions::ExtensionConnections;
use crate::local_storage::{LocalStorage, TypeErasedLocalStorage};
use crate::transaction::{ReadTransaction, ReadWriteTransaction};

pub(crate) type LocalStorages = FxHashMap<String, Box<dyn TypeErasedLocalStorage>>;

/// Everything a connection guards with its state lock
pub(crate) struct ConnectionState {
    pub(crate) snapshot: SnapshotNumber,
    pub(crate) local_storages: LocalStorages,
    pub(crate) extensions: ExtensionConnections,
    /// Set when catch-up failed; cleared by `reset_caches`
    inconsistent: bool,
    /// True while a read-write transaction is open
    pub(crate) write_active: bool,
}

/// The local storage of `collection`, created on first use
///
/// # Errors
///
/// - `CollectionNotRegistered` if the database doesn't know `collection`
/// - `CollectionTypeMismatch` if it was registered with another value type
pub(crate) fn local_storage_for<'s, V: Send + Sync + 'static>(
    db: &DatabaseInner,
    storages: &'s mut LocalStorages,
    write_active: bool,
    collection: &str,
) -> Result<&'s mut LocalStorage<V>> {
    let info = db
        .collections
        .get(collection)
        .map(|info| info.value().clone())
        .ok_or_else(|| Error::CollectionNotRegistered(collection.to_string()))?;
    if info.value_type != TypeId::of::<V>() {
        return Err(Error::CollectionTypeMismatch(collection.to_string()));
    }

    let storage = storages.entry(collection.to_string()).or_insert_with(|| {
        debug!(target: "turf::cache", collection, "Creating local storage");
        let mut local = LocalStorage::<V>::new(collection, info.capacity, info.generation);
        if write_active {
            local.begin_write();
        }
        let boxed: Box<dyn TypeErasedLocalStorage> = Box::new(local);
        boxed
    });
    storage
        .as_any_mut()
        .downcast_mut::<LocalStorage<V>>()
        .ok_or_else(|| Error::CollectionTypeMismatch(collection.to_string()))
}

/// A long-lived session against a database
///
/// Connections are `Send + Sync`; each one serializes its own transactions.
/// Dropping a connection releases the cache updates it was holding back.
pub struct Connection {
    id: ConnectionId,
    db: Arc<DatabaseInner>,
    state: Mutex<ConnectionState>,
}

impl Connection {
    pub(crate) fn new(db: Arc<DatabaseInner>) -> Self {
        let id = db.next_connection_id();
        let snapshot = db.registry.lock().register_connection(id);
        debug!(target: "turf::txn", connection = %id, snapshot, "Opened connection");
        Connection {
            id,
            state: Mutex::new(ConnectionState {
                snapshot,
                local_storages: FxHashMap::default(),
                extensions: ExtensionConnections::new(id),
                inconsistent: false,
                write_active: false,
            }),
            db,
        }
    }

    /// Connection identifier
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Snapshot the connection's caches are consistent with
    ///
    /// Blocks while a transaction is running on this connection.
    pub fn snapshot(&self) -> SnapshotNumber {
        self.state.lock().snapshot
    }

    /// True if a failed catch-up requires `reset_caches` before the next
    /// transaction
    pub fn is_inconsistent(&self) -> bool {
        self.state.lock().inconsistent
    }

    /// Number of values of `collection` cached on this connection
    pub fn cached_value_count(&self, collection: &str) -> usize {
        self.state
            .lock()
            .local_storages
            .get(collection)
            .map_or(0, |s| s.cached_value_count())
    }

    /// True if the value under `key` in `collection` is cached here
    pub fn is_value_cached(&self, collection: &str, key: &str) -> bool {
        self.state
            .lock()
            .local_storages
            .get(collection)
            .is_some_and(|s| s.is_value_cached(key))
    }

    /// Drop every cached value and jump to the current snapshot
    ///
    /// The only way out of the inconsistent state a snapshot gap leaves
    /// behind.
    pub fn reset_caches(&self) {
        let mut state = self.state.lock();
        let mut registry = self.db.registry.lock();
        let current = registry.current();
        for storage in state.local_storages.values_mut() {
            storage.reset_value_cache();
            storage.reset_change_set();
            storage.reset_cache_updates();
        }
        let from = state.snapshot;
        state.snapshot = current;
        state.inconsistent = false;
        registry.update_connection(self.id, current);
        info!(
            target: "turf::cache",
            connection = %self.id,
            from,
            to = current,
            "Reset connection caches"
        );
    }

    /// Run `f` in a read transaction
    ///
    /// `f` sees one consistent snapshot for its whole duration, unaffected
    /// by concurrent commits.
    ///
    /// # Errors
    ///
    /// - `CacheInconsistent` if the connection needs `reset_caches`
    /// - `SnapshotGap` if catching up failed (the connection becomes
    ///   inconsistent)
    /// - any error returned by `f`
    pub fn read_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut ReadTransaction<'_>) -> Result<T>,
    {
        let mut state = self.state.lock();
        let view = self.begin(&mut state, |storage| storage.snapshot())?;
        debug!(target: "turf::txn", connection = %self.id, snapshot = state.snapshot, "Begin read transaction");
        let mut txn = ReadTransaction::new(&self.db, &mut state, view);
        f(&mut txn)
    }

    /// Run `f` in a read-write transaction
    ///
    /// Commits if `f` returns `Ok` and no mutation inside it failed;
    /// otherwise every store write, extension write and cache change made by
    /// `f` is undone.
    ///
    /// # Errors
    ///
    /// - `CacheInconsistent` / `SnapshotGap` as for `read_transaction`
    /// - `TransactionAborted` if a mutation failed after touching the store,
    ///   even when `f` swallowed that error
    /// - store errors from the commit
    /// - any error returned by `f`
    pub fn read_write_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut ReadWriteTransaction<'_>) -> Result<T>,
    {
        let write_guard = self.db.write_lock.lock();
        let mut state = self.state.lock();
        let batch = self.begin(&mut state, |storage| storage.begin_write())?;
        for storage in state.local_storages.values_mut() {
            storage.begin_write();
        }
        state.write_active = true;
        debug!(target: "turf::txn", connection = %self.id, snapshot = state.snapshot, "Begin read-write transaction");

        let mut txn = ReadWriteTransaction::new(&self.db, &mut state, batch);
        let result = panic::catch_unwind(AssertUnwindSafe(|| f(&mut txn)));
        let (batch, modified, failure) = txn.into_parts();
        let result = match result {
            Ok(result) => result,
            Err(payload) => {
                drop(batch);
                self.rollback(&mut state, "closure panicked");
                state.write_active = false;
                drop(state);
                drop(write_guard);
                panic::resume_unwind(payload);
            }
        };

        let outcome = match (result, failure) {
            (Ok(value), None) => self
                .commit(&mut state, batch, &modified)
                .map(|change_sets| (value, change_sets)),
            (Ok(_), Some(reason)) => {
                self.rollback(&mut state, &reason);
                Err(Error::TransactionAborted(reason))
            }
            (Err(e), _) => {
                self.rollback(&mut state, &e.to_string());
                Err(e)
            }
        };
        state.write_active = false;
        drop(state);

        let (value, change_sets) = outcome?;
        for change_set in &change_sets {
            self.db.observers.notify(change_set);
        }
        drop(write_guard);
        Ok(value)
    }

    fn begin<H>(
        &self,
        state: &mut ConnectionState,
        open: impl FnOnce(&dyn Storage) -> Result<H>,
    ) -> Result<H> {
        if state.inconsistent {
            return Err(Error::CacheInconsistent);
        }

        let mut registry = self.db.registry.lock();
        let max = registry.current();
        let handle = open(self.db.storage.as_ref())?;

        let from = state.snapshot;
        for storage in state.local_storages.values_mut() {
            let current = self
                .db
                .collections
                .get(storage.collection())
                .map(|info| (info.capacity, info.generation));
            if let Some((capacity, generation)) = current {
                if generation != storage.generation() {
                    storage.reconfigure(capacity, generation);
                }
            }
            if let Err(e) = storage.apply_change_sets(from, max, &registry) {
                state.inconsistent = true;
                warn!(
                    target: "turf::cache",
                    connection = %self.id,
                    collection = storage.collection(),
                    from,
                    to = max,
                    error = %e,
                    "Catch-up failed, caches must be reset"
                );
                return Err(e);
            }
            storage.reset_change_set();
        }

        if max != from {
            debug!(target: "turf::cache", connection = %self.id, from, to = max, "Caught up");
        }
        state.snapshot = max;
        registry.update_connection(self.id, max);
        Ok(handle)
    }

    fn commit(
        &self,
        state: &mut ConnectionState,
        batch: Box<dyn WriteBatch>,
        modified: &BTreeSet<String>,
    ) -> Result<Vec<ChangeSet>> {
        if modified.is_empty() && batch.is_empty() {
            for storage in state.local_storages.values_mut() {
                storage.commit_write();
            }
            debug!(target: "turf::txn", connection = %self.id, "Committed read-write transaction without changes");
            return Ok(Vec::new());
        }

        let snapshot = {
            let mut registry = self.db.registry.lock();
            let snapshot = registry.current() + 1;
            for name in modified {
                let Some(storage) = state.local_storages.get_mut(name) else {
                    continue;
                };
                if !storage.has_pending_cache_updates() {
                    continue;
                }
                if let Err(e) = storage.record_pending_cache_updates(snapshot, &mut registry) {
                    registry.withdraw(snapshot);
                    drop(registry);
                    self.rollback(state, &e.to_string());
                    return Err(e);
                }
            }
            snapshot
        };

        // Slow part (persistence) runs without the registry lock; readers
        // keep pairing snapshot N - 1 with the previous store state.
        let prepared = match self.db.storage.prepare(batch) {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(
                    target: "turf::storage",
                    connection = %self.id,
                    snapshot,
                    error = %e,
                    "Store commit failed, withdrawing snapshot"
                );
                self.db.registry.lock().withdraw(snapshot);
                self.rollback(state, &e.to_string());
                return Err(e);
            }
        };

        let mut registry = self.db.registry.lock();
        prepared.publish();
        registry.mark_committed(snapshot);
        state.snapshot = snapshot;
        registry.update_connection(self.id, snapshot);
        drop(registry);

        let mut change_sets = Vec::with_capacity(modified.len());
        for name in modified {
            if let Some(storage) = state.local_storages.get_mut(name) {
                change_sets.push(storage.notify_observers());
            }
        }
        for storage in state.local_storages.values_mut() {
            storage.commit_write();
            storage.reset_cache_updates();
            storage.reset_change_set();
        }

        debug!(
            target: "turf::txn",
            connection = %self.id,
            snapshot,
            collections = modified.len(),
            "Committed read-write transaction"
        );
        Ok(change_sets)
    }

    fn rollback(&self, state: &mut ConnectionState, reason: &str) {
        for storage in state.local_storages.values_mut() {
            storage.rollback_write();
        }
        warn!(
            target: "turf::txn",
            connection = %self.id,
            snapshot = state.snapshot,
            reason,
            "Rolled back read-write transaction"
        );
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.db.registry.lock().unregister_connection(self.id);
        debug!(target: "turf::txn", connection = %self.id, "Closed connection");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}
