//! Database engine for Turf
//!
//! This crate orchestrates the lower layers:
//! - Database: open/ephemeral, collection registration, shared registries
//! - Connection: per-connection caches and the transaction lifecycle
//! - Transactions and collection views
//! - Snapshot registry: cache update log and catch-up
//! - Built-in extensions: secondary index, full-text search, relationships
//!
//! The engine is the only component that knows about:
//! - Snapshot numbering and cache consistency
//! - Extension maintenance inside the owning transaction
//! - Change set delivery to observers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collection;
pub mod connection;
pub mod database;
pub mod extensions;
pub mod local_storage;
pub mod transaction;
pub mod value_cache;

pub use collection::{KeyedValuesSequence, ReadCollection, ReadWriteCollection, ValuesSequence};
pub use connection::Connection;
pub use database::{ChangeSetObserver, Database, TurfConfig};
pub use extensions::{
    FtsProperty, FullTextSearch, IndexPredicate, IndexQuery, IndexValue, IndexedProperty,
    RelationshipIndex, SecondaryIndex, ToManyRelationship,
};
pub use transaction::{ReadTransaction, ReadWriteTransaction};
