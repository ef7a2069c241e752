//! Turf - embedded typed key-value store
//!
//! Turf stores typed values in named collections. Every connection keeps an
//! LRU cache of deserialized values; commits on one connection reach the
//! caches of every other connection at the start of their next transaction,
//! so a transaction always reads one consistent snapshot.
//!
//! # Quick Start
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use turfdb::{codec, Collection, Database, Result};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Check {
//!     table: String,
//! }
//!
//! struct Checks;
//!
//! impl Collection for Checks {
//!     type Value = Check;
//!
//!     fn name(&self) -> &str {
//!         "Checks"
//!     }
//!
//!     fn schema_version(&self) -> u64 {
//!         1
//!     }
//!
//!     fn serialize_value(&self, value: &Check) -> Result<Vec<u8>> {
//!         codec::to_msgpack(value)
//!     }
//!
//!     fn deserialize_value(&self, data: &[u8]) -> Result<Check> {
//!         codec::from_msgpack(data)
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let db = Database::ephemeral();
//! db.register_collection(&Checks)?;
//!
//! let conn = db.new_connection();
//! conn.read_write_transaction(|txn| {
//!     txn.read_write(&Checks)?
//!         .set_value(Check { table: "Patio".into() }, "c1")?;
//!     Ok(())
//! })?;
//!
//! let table = conn.read_transaction(|txn| {
//!     Ok(txn.read(&Checks)?.value_for_key("c1")?.map(|c| c.table.clone()))
//! })?;
//! assert_eq!(table.as_deref(), Some("Patio"));
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - `turf-core`: error type, identifiers, change sets, the store boundary
//!   and the collection and extension traits
//! - `turf-storage`: the copy-on-write row store with file persistence
//! - `turf-engine`: databases, connections, transactions, caches, the
//!   snapshot registry and the built-in extensions

pub use turf_core::{
    codec, Change, ChangeSet, Collection, ConnectionId, Error, Extension, ExtensionConnection,
    ExtensionWriteTransaction, ObserverToken, Result, RowChange, RowId, SnapshotNumber, Storage,
};
pub use turf_engine::{
    Connection, Database, FtsProperty, FullTextSearch, IndexPredicate, IndexQuery, IndexValue,
    IndexedProperty, KeyedValuesSequence, ReadCollection, ReadTransaction, ReadWriteCollection,
    ReadWriteTransaction, RelationshipIndex, SecondaryIndex, ToManyRelationship, TurfConfig,
    ValuesSequence,
};
pub use turf_storage::{MemoryStore, SyncMode};
