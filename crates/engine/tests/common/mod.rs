//! Shared fixtures: a restaurant point-of-sale model with checks and line
//! items, plus stores and extensions that fail on demand.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use turf_core::{
    codec, Collection, Error, Extension, ExtensionConnection, ExtensionWriteTransaction,
    PreparedCommit, Result, RowId, SnapshotView, Storage, WriteBatch,
};
use turf_engine::{
    Database, FtsProperty, FullTextSearch, IndexedProperty, RelationshipIndex, SecondaryIndex,
    ToManyRelationship,
};
use turf_storage::MemoryStore;

/// Route engine logs to the test harness; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("turf=debug")
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub uuid: String,
    pub name: Option<String>,
    pub is_open: bool,
    pub is_current: bool,
    pub line_item_uuids: Vec<String>,
}

impl Check {
    pub fn new(uuid: &str, name: &str) -> Self {
        Check {
            uuid: uuid.to_string(),
            name: Some(name.to_string()),
            is_open: true,
            is_current: true,
            line_item_uuids: Vec::new(),
        }
    }

    pub fn closed(mut self) -> Self {
        self.is_open = false;
        self
    }

    pub fn with_line_items(mut self, uuids: &[&str]) -> Self {
        self.line_item_uuids = uuids.iter().map(|s| s.to_string()).collect();
        self
    }
}

pub struct ChecksCollection {
    pub index: Arc<SecondaryIndex<Check>>,
    pub fts: Arc<FullTextSearch<Check>>,
    pub relationships: Arc<RelationshipIndex<Check>>,
    extensions: Vec<Arc<dyn Extension<Check>>>,
}

impl ChecksCollection {
    pub fn new() -> Self {
        let index = Arc::new(SecondaryIndex::new(
            "Checks",
            vec![
                IndexedProperty::new("isOpen", |c: &Check| c.is_open),
                IndexedProperty::new("name", |c: &Check| c.name.clone()),
                IndexedProperty::new("isCurrent", |c: &Check| c.is_current),
            ],
        ));
        let fts = Arc::new(FullTextSearch::new(
            "Checks",
            vec![FtsProperty::new("name", |c: &Check| {
                c.name.clone().unwrap_or_default()
            })],
        ));
        let relationships = Arc::new(RelationshipIndex::new(
            "Checks",
            vec![ToManyRelationship::new(
                "lineItems",
                "LineItems",
                |c: &Check| c.line_item_uuids.clone(),
            )],
        ));
        let extensions: Vec<Arc<dyn Extension<Check>>> = vec![
            index.clone() as Arc<dyn Extension<Check>>,
            fts.clone() as Arc<dyn Extension<Check>>,
            relationships.clone() as Arc<dyn Extension<Check>>,
        ];
        ChecksCollection {
            index,
            fts,
            relationships,
            extensions,
        }
    }
}

impl Collection for ChecksCollection {
    type Value = Check;

    fn name(&self) -> &str {
        "Checks"
    }

    fn schema_version(&self) -> u64 {
        1
    }

    fn value_cache_capacity(&self) -> Option<usize> {
        Some(50)
    }

    fn serialize_value(&self, value: &Check) -> Result<Vec<u8>> {
        codec::to_msgpack(value)
    }

    fn deserialize_value(&self, data: &[u8]) -> Result<Check> {
        codec::from_msgpack(data)
    }

    fn associated_extensions(&self) -> &[Arc<dyn Extension<Check>>] {
        &self.extensions
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub uuid: String,
    pub name: String,
    pub price_cents: i64,
}

impl LineItem {
    pub fn new(uuid: &str, name: &str, price_cents: i64) -> Self {
        LineItem {
            uuid: uuid.to_string(),
            name: name.to_string(),
            price_cents,
        }
    }
}

/// Unbounded cache, no extensions; schema version configurable
pub struct LineItemsCollection {
    pub schema_version: u64,
}

impl LineItemsCollection {
    pub fn new() -> Self {
        LineItemsCollection { schema_version: 1 }
    }
}

impl Collection for LineItemsCollection {
    type Value = LineItem;

    fn name(&self) -> &str {
        "LineItems"
    }

    fn schema_version(&self) -> u64 {
        self.schema_version
    }

    fn serialize_value(&self, value: &LineItem) -> Result<Vec<u8>> {
        codec::to_msgpack(value)
    }

    fn deserialize_value(&self, data: &[u8]) -> Result<LineItem> {
        codec::from_msgpack(data)
    }
}

/// Writes a marker row for every insertion and fails for one key
pub struct FailingExtension {
    fail_on_key: String,
}

pub const MARKER_TABLE: &str = "_failing_markers";

struct FailingConnection {
    fail_on_key: String,
}

struct FailingWriteTransaction<'a> {
    fail_on_key: &'a str,
    batch: &'a mut dyn WriteBatch,
}

impl Extension<Check> for FailingExtension {
    fn name(&self) -> &str {
        "failing"
    }

    fn new_connection(&self) -> Box<dyn ExtensionConnection<Check>> {
        Box::new(FailingConnection {
            fail_on_key: self.fail_on_key.clone(),
        })
    }
}

impl ExtensionConnection<Check> for FailingConnection {
    fn write_transaction<'a>(
        &'a mut self,
        batch: &'a mut dyn WriteBatch,
    ) -> Box<dyn ExtensionWriteTransaction<Check> + 'a> {
        Box::new(FailingWriteTransaction {
            fail_on_key: &self.fail_on_key,
            batch,
        })
    }
}

impl FailingWriteTransaction<'_> {
    fn mark(&mut self, key: &str) -> Result<()> {
        self.batch.upsert(MARKER_TABLE, key, Vec::new())?;
        if key == self.fail_on_key {
            return Err(Error::extension("failing", format!("refusing key {}", key)));
        }
        Ok(())
    }
}

impl ExtensionWriteTransaction<Check> for FailingWriteTransaction<'_> {
    fn handle_value_insertion(&mut self, _: &Check, key: &str, _: RowId, _: &str) -> Result<()> {
        self.mark(key)
    }

    fn handle_value_update(&mut self, _: &Check, key: &str, _: RowId, _: &str) -> Result<()> {
        self.mark(key)
    }

    fn handle_removal_of_keys(&mut self, keys: &[String], _: &str) -> Result<()> {
        for key in keys {
            self.batch.delete(MARKER_TABLE, key)?;
        }
        Ok(())
    }

    fn handle_removal_of_all(&mut self, _: &str) -> Result<()> {
        self.batch.delete_all(MARKER_TABLE)?;
        Ok(())
    }
}

/// Checks guarded by a secondary index and an extension that rejects one key
pub struct FlakyChecksCollection {
    pub index: Arc<SecondaryIndex<Check>>,
    extensions: Vec<Arc<dyn Extension<Check>>>,
}

impl FlakyChecksCollection {
    pub fn new(fail_on_key: &str) -> Self {
        let index = Arc::new(SecondaryIndex::new(
            "FlakyChecks",
            vec![IndexedProperty::new("isOpen", |c: &Check| c.is_open)],
        ));
        let failing: Arc<dyn Extension<Check>> = Arc::new(FailingExtension {
            fail_on_key: fail_on_key.to_string(),
        });
        FlakyChecksCollection {
            extensions: vec![index.clone() as Arc<dyn Extension<Check>>, failing],
            index,
        }
    }
}

impl Collection for FlakyChecksCollection {
    type Value = Check;

    fn name(&self) -> &str {
        "FlakyChecks"
    }

    fn schema_version(&self) -> u64 {
        1
    }

    fn serialize_value(&self, value: &Check) -> Result<Vec<u8>> {
        codec::to_msgpack(value)
    }

    fn deserialize_value(&self, data: &[u8]) -> Result<Check> {
        codec::from_msgpack(data)
    }

    fn associated_extensions(&self) -> &[Arc<dyn Extension<Check>>] {
        &self.extensions
    }
}

/// Collection whose encoder rejects checks named "unencodable"
pub struct PickyChecksCollection;

impl Collection for PickyChecksCollection {
    type Value = Check;

    fn name(&self) -> &str {
        "PickyChecks"
    }

    fn schema_version(&self) -> u64 {
        1
    }

    fn serialize_value(&self, value: &Check) -> Result<Vec<u8>> {
        if value.name.as_deref() == Some("unencodable") {
            return Err(Error::SerializationError("unencodable check".to_string()));
        }
        codec::to_msgpack(value)
    }

    fn deserialize_value(&self, data: &[u8]) -> Result<Check> {
        codec::from_msgpack(data)
    }
}

/// In-memory store whose commits can be made to fail
pub struct FailingStore {
    inner: MemoryStore,
    fail_commits: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        FailingStore {
            inner: MemoryStore::new(),
            fail_commits: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_commits.store(failing, Ordering::SeqCst);
    }
}

impl Storage for FailingStore {
    fn snapshot(&self) -> Result<Box<dyn SnapshotView>> {
        self.inner.snapshot()
    }

    fn begin_write(&self) -> Result<Box<dyn WriteBatch>> {
        self.inner.begin_write()
    }

    fn prepare(&self, batch: Box<dyn WriteBatch>) -> Result<Box<dyn PreparedCommit + '_>> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(Error::StorageError("disk full".to_string()));
        }
        self.inner.prepare(batch)
    }
}

/// In-memory store whose next prepare can be held open by the test
///
/// Once armed, the next `prepare` reports on `entered` and waits for
/// `release` before doing any work.
pub struct GatedStore {
    inner: MemoryStore,
    gate: parking_lot::Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl GatedStore {
    pub fn new() -> Self {
        GatedStore {
            inner: MemoryStore::new(),
            gate: parking_lot::Mutex::new(None),
        }
    }

    pub fn arm(&self, entered: Sender<()>, release: Receiver<()>) {
        *self.gate.lock() = Some((entered, release));
    }
}

impl Storage for GatedStore {
    fn snapshot(&self) -> Result<Box<dyn SnapshotView>> {
        self.inner.snapshot()
    }

    fn begin_write(&self) -> Result<Box<dyn WriteBatch>> {
        self.inner.begin_write()
    }

    fn prepare(&self, batch: Box<dyn WriteBatch>) -> Result<Box<dyn PreparedCommit + '_>> {
        let gate = self.gate.lock().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv();
        }
        self.inner.prepare(batch)
    }
}

/// Ephemeral database with `Checks` and `LineItems` registered
pub fn restaurant() -> (Database, ChecksCollection, LineItemsCollection) {
    let db = Database::ephemeral();
    let checks = ChecksCollection::new();
    let line_items = LineItemsCollection::new();
    db.register_collection(&checks).unwrap();
    db.register_collection(&line_items).unwrap();
    (db, checks, line_items)
}
