//! Collection declaration surface
//!
//! A collection is a typed logical table. Implementations supply its name,
//! schema version, optional cache bound, value codec and the extensions that
//! derive data from it. This is the only configuration the engine consumes
//! for a collection.

use std::sync::Arc;

use crate::error::Result;
use crate::extension::Extension;

/// Prefix reserved for tables the engine and extensions create
pub const RESERVED_TABLE_PREFIX: &str = "_";

/// A typed logical table of key -> value entries
///
/// # Example
///
/// ```
/// use turf_core::{codec, Collection, Result};
///
/// struct Notes;
///
/// impl Collection for Notes {
///     type Value = String;
///
///     fn name(&self) -> &str {
///         "Notes"
///     }
///
///     fn schema_version(&self) -> u64 {
///         1
///     }
///
///     fn serialize_value(&self, value: &String) -> Result<Vec<u8>> {
///         codec::to_msgpack(value)
///     }
///
///     fn deserialize_value(&self, data: &[u8]) -> Result<String> {
///         codec::from_msgpack(data)
///     }
/// }
/// ```
pub trait Collection: Send + Sync + 'static {
    /// Entity type stored in this collection
    type Value: Send + Sync + 'static;

    /// Name, unique within a database
    fn name(&self) -> &str;

    /// Must be bumped whenever the serialized form of `Value` changes
    fn schema_version(&self) -> u64;

    /// Maximum number of cached values per connection; `None` is unbounded
    fn value_cache_capacity(&self) -> Option<usize> {
        None
    }

    /// Encode a value
    ///
    /// # Errors
    ///
    /// Returns `SerializationError` if the value cannot be encoded.
    fn serialize_value(&self, value: &Self::Value) -> Result<Vec<u8>>;

    /// Decode a value
    ///
    /// # Errors
    ///
    /// Returns `SerializationError` if `data` is not a valid encoding.
    fn deserialize_value(&self, data: &[u8]) -> Result<Self::Value>;

    /// Extensions maintained alongside this collection's rows
    fn associated_extensions(&self) -> &[Arc<dyn Extension<Self::Value>>] {
        &[]
    }
}
