//! Read and read-write transactions
//!
//! Both are handed to the closure passed to `Connection::read_transaction`
//! or `Connection::read_write_transaction` and only live for its duration.
//! They give out collection views bound to the transaction's store view:
//! - `ReadTransaction`: a stable point-in-time store snapshot
//! - `ReadWriteTransaction`: the store write batch, so reads see the
//!   transaction's own writes
//!
//! A read-write transaction also tracks which collections were modified and
//! whether a mutation failed after touching the batch. A failed mutation
//! poisons the transaction: it rolls back even if the closure returns `Ok`.

use std::collections::BTreeSet;
use turf_core::{Collection, Result, SnapshotNumber, SnapshotView, WriteBatch};

use crate::collection::{ReadCollection, ReadWriteCollection};
use crate::connection::{local_storage_for, ConnectionState};
use crate::database::DatabaseInner;

/// A transaction that only reads
pub struct ReadTransaction<'c> {
    db: &'c DatabaseInner,
    state: &'c mut ConnectionState,
    view: Box<dyn SnapshotView>,
}

impl<'c> ReadTransaction<'c> {
    pub(crate) fn new(
        db: &'c DatabaseInner,
        state: &'c mut ConnectionState,
        view: Box<dyn SnapshotView>,
    ) -> Self {
        ReadTransaction { db, state, view }
    }

    /// Snapshot this transaction reads at
    pub fn snapshot(&self) -> SnapshotNumber {
        self.state.snapshot
    }

    /// Read view of `collection`
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotRegistered` or `CollectionTypeMismatch` if the
    /// collection isn't registered with this value type.
    pub fn read<'t, C: Collection>(&'t mut self, collection: &'t C) -> Result<ReadCollection<'t, C>> {
        let local = local_storage_for::<C::Value>(
            self.db,
            &mut self.state.local_storages,
            false,
            collection.name(),
        )?;
        Ok(ReadCollection::new(
            collection,
            local,
            self.view.as_ref(),
            &self.db.observers,
        ))
    }
}

/// A transaction that reads and writes
pub struct ReadWriteTransaction<'c> {
    db: &'c DatabaseInner,
    state: &'c mut ConnectionState,
    batch: Box<dyn WriteBatch>,
    modified: BTreeSet<String>,
    failure: Option<String>,
}

impl<'c> ReadWriteTransaction<'c> {
    pub(crate) fn new(
        db: &'c DatabaseInner,
        state: &'c mut ConnectionState,
        batch: Box<dyn WriteBatch>,
    ) -> Self {
        ReadWriteTransaction {
            db,
            state,
            batch,
            modified: BTreeSet::new(),
            failure: None,
        }
    }

    pub(crate) fn into_parts(self) -> (Box<dyn WriteBatch>, BTreeSet<String>, Option<String>) {
        (self.batch, self.modified, self.failure)
    }

    /// Snapshot this transaction started from
    pub fn snapshot(&self) -> SnapshotNumber {
        self.state.snapshot
    }

    /// Names of the collections modified so far
    pub fn modified_collections(&self) -> impl Iterator<Item = &str> {
        self.modified.iter().map(String::as_str)
    }

    /// True once a mutation failed; the transaction will roll back
    pub fn is_poisoned(&self) -> bool {
        self.failure.is_some()
    }

    /// Read view of `collection` that sees this transaction's writes
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotRegistered` or `CollectionTypeMismatch` if the
    /// collection isn't registered with this value type.
    pub fn read<'t, C: Collection>(&'t mut self, collection: &'t C) -> Result<ReadCollection<'t, C>> {
        let local = local_storage_for::<C::Value>(
            self.db,
            &mut self.state.local_storages,
            true,
            collection.name(),
        )?;
        Ok(ReadCollection::new(
            collection,
            local,
            self.batch.as_view(),
            &self.db.observers,
        ))
    }

    /// Read-write view of `collection`
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotRegistered` or `CollectionTypeMismatch` if the
    /// collection isn't registered with this value type.
    pub fn read_write<'t, C: Collection>(
        &'t mut self,
        collection: &'t C,
    ) -> Result<ReadWriteCollection<'t, C>> {
        let state = &mut *self.state;
        let local = local_storage_for::<C::Value>(
            self.db,
            &mut state.local_storages,
            true,
            collection.name(),
        )?;
        Ok(ReadWriteCollection::new(
            collection,
            local,
            self.batch.as_mut(),
            &mut state.extensions,
            &mut self.modified,
            &mut self.failure,
            &self.db.observers,
        ))
    }
}
