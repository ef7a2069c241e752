//! Core types and traits for Turf
//!
//! This crate defines the foundational types used throughout the system:
//! - Error: Error type hierarchy
//! - RowId, RowChange, SnapshotNumber, ObserverToken: identifiers
//! - ChangeSet: ordered key-level mutations of one transaction
//! - CacheUpdates: value-level mutations replayed into other connections
//! - Storage, SnapshotView, WriteBatch: the store boundary
//! - Collection: the collection declaration surface
//! - Extension traits: the write-hook capability set of derived structures

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache_update;
pub mod change_set;
pub mod codec;
pub mod collection;
pub mod error;
pub mod extension;
pub mod traits;
pub mod types;

pub use cache_update::{CacheUpdate, CacheUpdates};
pub use change_set::{Change, ChangeSet};
pub use collection::{Collection, RESERVED_TABLE_PREFIX};
pub use error::{Error, Result};
pub use extension::{Extension, ExtensionConnection, ExtensionWriteTransaction};
pub use traits::{PreparedCommit, Row, RowIter, SnapshotView, Storage, WriteBatch};
pub use types::{ConnectionId, ObserverToken, RowChange, RowId, SnapshotNumber};
