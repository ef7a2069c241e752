//! Store boundary traits
//!
//! The engine never talks to a concrete storage engine. It sees:
//! - `Storage`: hands out point-in-time read views and write batches, and
//!   atomically commits a batch
//! - `SnapshotView`: row lookups and scans against one consistent state
//! - `WriteBatch`: a view that also buffers row mutations; reads through it
//!   see its own writes
//!
//! Rolling back is dropping the batch. Committing is two steps: `prepare`
//! does the slow, fallible work (making the batch durable) and `publish`
//! swaps the new state in for readers, so callers can keep the second step
//! inside a short critical section.
//!
//! Rows live in named tables. A collection's primary rows live in the table
//! named after the collection; extensions keep their derived rows in tables
//! of their own, inside the same batch, so they commit or vanish together
//! with the primary write.

use std::any::Any;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{RowChange, RowId};

/// A stored row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Identity allocated when the key was first inserted
    pub row_id: RowId,
    /// Serialized value
    pub data: Arc<[u8]>,
}

/// Forward-only iterator over `(key, row)` pairs in key order
pub type RowIter<'a> = Box<dyn Iterator<Item = Result<(String, Row)>> + 'a>;

/// Read access to one consistent state of the store
///
/// Thread safety: views are handed between threads together with the
/// connection that owns them (requires Send + Sync).
pub trait SnapshotView: Send + Sync {
    /// Row stored under `key` in `table`, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn get(&self, table: &str, key: &str) -> Result<Option<Row>>;

    /// Every row of `table` in key order
    ///
    /// A missing table scans as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn scan(&self, table: &str) -> Result<RowIter<'_>>;

    /// Every key of `table` in key order
    fn keys(&self, table: &str) -> Result<Vec<String>> {
        self.scan(table)?.map(|r| r.map(|(k, _)| k)).collect()
    }

    /// Number of rows in `table`
    fn count(&self, table: &str) -> Result<u64> {
        let mut n = 0u64;
        for row in self.scan(table)? {
            row?;
            n += 1;
        }
        Ok(n)
    }
}

/// Buffered row mutations on top of a base state
pub trait WriteBatch: SnapshotView {
    /// Store `data` under `key`, classifying the write as insert or update
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn upsert(&mut self, table: &str, key: &str, data: Vec<u8>) -> Result<RowChange>;

    /// Delete `key`, returning the identity of the removed row if it existed
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn delete(&mut self, table: &str, key: &str) -> Result<Option<RowId>>;

    /// Delete every row of `table`, returning how many were visible
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn delete_all(&mut self, table: &str) -> Result<u64>;

    /// True if nothing has been buffered
    fn is_empty(&self) -> bool;

    /// This batch as a plain read view
    fn as_view(&self) -> &dyn SnapshotView;

    /// Hand the concrete batch back to the store that created it
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// A batch that is durable but not yet visible to new snapshots
///
/// Holding one keeps other batches from being prepared. Dropping it
/// without publishing leaves readers on the previous state.
pub trait PreparedCommit {
    /// Make the prepared state the latest committed state
    fn publish(self: Box<Self>);
}

/// Storage abstraction
///
/// Implementations must give every `snapshot()` a stable view that later
/// commits never change, and must apply a committed batch atomically.
pub trait Storage: Send + Sync {
    /// Read view of the latest committed state
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn snapshot(&self) -> Result<Box<dyn SnapshotView>>;

    /// Start buffering writes on top of the latest committed state
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn begin_write(&self) -> Result<Box<dyn WriteBatch>>;

    /// Make `batch` durable without exposing it to new snapshots
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be applied; nothing is applied
    /// in that case.
    fn prepare(&self, batch: Box<dyn WriteBatch>) -> Result<Box<dyn PreparedCommit + '_>>;

    /// Atomically apply `batch`
    ///
    /// Durable once this returns `Ok`.
    ///
    /// # Errors
    ///
    /// Same as `prepare`.
    fn commit(&self, batch: Box<dyn WriteBatch>) -> Result<()> {
        self.prepare(batch)?.publish();
        Ok(())
    }
}
