//! Copy-on-write, table-partitioned row store
//!
//! # Design
//!
//! - Committed state is an immutable `Arc<StoreState>`; a snapshot is just a
//!   clone of that pointer, so readers never block and never see a commit
//!   land underneath them
//! - Each table is `Arc`-shared: a commit clones only the tables it touched
//! - A `MemoryBatch` overlays per-table operations on its base state; reads
//!   through the batch see its own writes
//! - Commit builds and persists the new state under the commit lock, then
//!   swaps it in. The swap can be deferred through `MemoryPrepared`. A batch
//!   whose base is no longer the latest state is refused (single-writer
//!   discipline)
//!
//! Row identities are allocated from a store-wide counter and never reused.

use parking_lot::{Mutex, MutexGuard, RwLock};
use std::any::Any;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use turf_core::{
    Error, PreparedCommit, Result, Row, RowChange, RowId, RowIter, SnapshotView, Storage,
    WriteBatch,
};

use crate::persist;

/// Rows of one table, in key order
#[derive(Debug, Default, Clone)]
pub(crate) struct Table {
    pub(crate) rows: BTreeMap<String, Row>,
}

/// One committed state of the store
#[derive(Debug, Default, Clone)]
pub(crate) struct StoreState {
    /// Number of commits applied to reach this state
    pub(crate) version: u64,
    /// Next row identity to hand out
    pub(crate) next_row_id: i64,
    pub(crate) tables: BTreeMap<String, Arc<Table>>,
}

impl StoreState {
    fn get(&self, table: &str, key: &str) -> Option<Row> {
        self.tables.get(table).and_then(|t| t.rows.get(key)).cloned()
    }

    fn row_count(&self, table: &str) -> u64 {
        self.tables.get(table).map_or(0, |t| t.rows.len() as u64)
    }
}

/// How durable a file-backed store makes each commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Rename the new data file into place without fsync
    #[default]
    Standard,
    /// fsync the data file before renaming it into place
    Always,
}

/// In-memory row store with optional file persistence
pub struct MemoryStore {
    state: RwLock<Arc<StoreState>>,
    commit_lock: Mutex<()>,
    path: Option<PathBuf>,
    sync: SyncMode,
}

impl MemoryStore {
    /// Create an empty store that lives only in memory
    pub fn new() -> Self {
        MemoryStore {
            state: RwLock::new(Arc::new(StoreState::default())),
            commit_lock: Mutex::new(()),
            path: None,
            sync: SyncMode::Standard,
        }
    }

    /// Open (or create) a store persisted at `path`
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if the file exists but fails its integrity
    /// check, or `IoError` if it cannot be read.
    pub fn open(path: impl AsRef<Path>, sync: SyncMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = persist::load(&path)?;
        debug!(
            target: "turf::storage",
            path = %path.display(),
            tables = state.tables.len(),
            "Opened store"
        );
        Ok(MemoryStore {
            state: RwLock::new(Arc::new(state)),
            commit_lock: Mutex::new(()),
            path: Some(path),
            sync,
        })
    }

    /// Number of commits applied so far
    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    /// Concrete snapshot of the latest committed state
    pub fn memory_snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            state: Arc::clone(&self.state.read()),
        }
    }

    /// Concrete batch on top of the latest committed state
    pub fn memory_batch(&self) -> MemoryBatch {
        let base = Arc::clone(&self.state.read());
        MemoryBatch {
            next_row_id: base.next_row_id,
            base,
            overlays: BTreeMap::new(),
        }
    }

    /// Apply a concrete batch
    ///
    /// # Errors
    ///
    /// Same as `prepare_batch`.
    pub fn commit_batch(&self, batch: MemoryBatch) -> Result<()> {
        self.prepare_batch(batch)?.publish_state();
        Ok(())
    }

    /// Build and persist the state `batch` leads to without exposing it
    ///
    /// The returned handle holds the commit lock until it is published or
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if another batch committed since this one
    /// began, or the persistence error if the data file cannot be written.
    pub fn prepare_batch(&self, batch: MemoryBatch) -> Result<MemoryPrepared<'_>> {
        let guard = self.commit_lock.lock();
        let current = Arc::clone(&self.state.read());
        if current.version != batch.base.version {
            return Err(Error::StorageError(format!(
                "Write batch based on version {} but store is at version {}",
                batch.base.version, current.version
            )));
        }
        if batch.overlays.is_empty() {
            return Ok(MemoryPrepared {
                store: self,
                next: None,
                _guard: guard,
            });
        }

        let mut next = (*current).clone();
        for (name, overlay) in batch.overlays {
            let table = Arc::make_mut(next.tables.entry(name).or_default());
            if overlay.cleared {
                table.rows.clear();
            }
            for (key, op) in overlay.ops {
                match op {
                    Some(row) => {
                        table.rows.insert(key, row);
                    }
                    None => {
                        table.rows.remove(&key);
                    }
                }
            }
        }
        next.tables.retain(|_, t| !t.rows.is_empty());
        next.version += 1;
        next.next_row_id = batch.next_row_id;

        // Durable before visible
        if let Some(path) = &self.path {
            persist::save(path, &next, self.sync)?;
        }

        Ok(MemoryPrepared {
            store: self,
            next: Some(Arc::new(next)),
            _guard: guard,
        })
    }
}

/// A persisted state waiting to become visible
pub struct MemoryPrepared<'a> {
    store: &'a MemoryStore,
    /// `None` for a batch with nothing to apply
    next: Option<Arc<StoreState>>,
    _guard: MutexGuard<'a, ()>,
}

impl MemoryPrepared<'_> {
    /// Swap the prepared state in for readers
    pub fn publish_state(self) {
        if let Some(next) = self.next {
            debug!(target: "turf::storage", version = next.version, "Committed batch");
            *self.store.state.write() = next;
        }
    }
}

impl PreparedCommit for MemoryPrepared<'_> {
    fn publish(self: Box<Self>) {
        (*self).publish_state();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStore {
    fn snapshot(&self) -> Result<Box<dyn SnapshotView>> {
        Ok(Box::new(self.memory_snapshot()))
    }

    fn begin_write(&self) -> Result<Box<dyn WriteBatch>> {
        Ok(Box::new(self.memory_batch()))
    }

    fn prepare(&self, batch: Box<dyn WriteBatch>) -> Result<Box<dyn PreparedCommit + '_>> {
        let batch = batch.into_any().downcast::<MemoryBatch>().map_err(|_| {
            Error::StorageError("Write batch was not created by this store".to_string())
        })?;
        Ok(Box::new(self.prepare_batch(*batch)?))
    }
}

/// Stable read view of one committed state
#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    state: Arc<StoreState>,
}

impl MemorySnapshot {
    /// Store version this view was taken at
    pub fn version(&self) -> u64 {
        self.state.version
    }
}

impl SnapshotView for MemorySnapshot {
    fn get(&self, table: &str, key: &str) -> Result<Option<Row>> {
        Ok(self.state.get(table, key))
    }

    fn scan(&self, table: &str) -> Result<RowIter<'_>> {
        match self.state.tables.get(table) {
            Some(t) => Ok(Box::new(
                t.rows.iter().map(|(k, r)| Ok((k.clone(), r.clone()))),
            )),
            None => Ok(Box::new(std::iter::empty())),
        }
    }

    fn count(&self, table: &str) -> Result<u64> {
        Ok(self.state.row_count(table))
    }
}

/// Pending operations on one table
#[derive(Debug, Default)]
struct TableOverlay {
    /// Every base row is hidden
    cleared: bool,
    /// `Some` = upserted row, `None` = deleted
    ops: BTreeMap<String, Option<Row>>,
}

/// Buffered writes on top of a committed state
#[derive(Debug)]
pub struct MemoryBatch {
    base: Arc<StoreState>,
    next_row_id: i64,
    overlays: BTreeMap<String, TableOverlay>,
}

impl MemoryBatch {
    fn merged_rows(&self, table: &str, overlay: &TableOverlay) -> Vec<(String, Row)> {
        let mut merged: BTreeMap<&str, &Row> = BTreeMap::new();
        if !overlay.cleared {
            if let Some(t) = self.base.tables.get(table) {
                merged.extend(t.rows.iter().map(|(k, r)| (k.as_str(), r)));
            }
        }
        for (key, op) in &overlay.ops {
            match op {
                Some(row) => {
                    merged.insert(key.as_str(), row);
                }
                None => {
                    merged.remove(key.as_str());
                }
            }
        }
        merged
            .into_iter()
            .map(|(k, r)| (k.to_string(), r.clone()))
            .collect()
    }
}

impl SnapshotView for MemoryBatch {
    fn get(&self, table: &str, key: &str) -> Result<Option<Row>> {
        if let Some(overlay) = self.overlays.get(table) {
            if let Some(op) = overlay.ops.get(key) {
                return Ok(op.clone());
            }
            if overlay.cleared {
                return Ok(None);
            }
        }
        Ok(self.base.get(table, key))
    }

    fn scan(&self, table: &str) -> Result<RowIter<'_>> {
        match self.overlays.get(table) {
            Some(overlay) => Ok(Box::new(
                self.merged_rows(table, overlay).into_iter().map(Ok),
            )),
            None => match self.base.tables.get(table) {
                Some(t) => Ok(Box::new(
                    t.rows.iter().map(|(k, r)| Ok((k.clone(), r.clone()))),
                )),
                None => Ok(Box::new(std::iter::empty())),
            },
        }
    }
}

impl WriteBatch for MemoryBatch {
    fn upsert(&mut self, table: &str, key: &str, data: Vec<u8>) -> Result<RowChange> {
        let change = match self.get(table, key)? {
            Some(existing) => RowChange::Update {
                row_id: existing.row_id,
            },
            None => {
                self.next_row_id += 1;
                RowChange::Insert {
                    row_id: RowId(self.next_row_id),
                }
            }
        };
        let row = Row {
            row_id: change.row_id(),
            data: data.into(),
        };
        self.overlays
            .entry(table.to_string())
            .or_default()
            .ops
            .insert(key.to_string(), Some(row));
        Ok(change)
    }

    fn delete(&mut self, table: &str, key: &str) -> Result<Option<RowId>> {
        let existing = self.get(table, key)?;
        if existing.is_some() {
            self.overlays
                .entry(table.to_string())
                .or_default()
                .ops
                .insert(key.to_string(), None);
        }
        Ok(existing.map(|r| r.row_id))
    }

    fn delete_all(&mut self, table: &str) -> Result<u64> {
        let visible = self.count(table)?;
        let overlay = self.overlays.entry(table.to_string()).or_default();
        overlay.cleared = true;
        overlay.ops.clear();
        Ok(visible)
    }

    fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    fn as_view(&self) -> &dyn SnapshotView {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
