//! Extension capability set
//!
//! An extension is a derived structure (secondary index, full-text index,
//! relationship index, or a user-defined kind) kept consistent with a
//! collection's primary rows. It has three layers:
//!
//! 1. `Extension`: declared once per collection, shared by every connection
//! 2. `ExtensionConnection`: bound lazily, once per connection
//! 3. `ExtensionWriteTransaction`: opened inside the owning read-write
//!    transaction, writing derived rows into the same store batch
//!
//! Hooks run synchronously after the primary mutation. A hook error aborts
//! the whole outer transaction, so derived rows never diverge from primary
//! rows. Hooks must be a pure function of the value, key and row identity.

use crate::error::Result;
use crate::traits::WriteBatch;
use crate::types::RowId;

/// A derived structure declared by a collection
pub trait Extension<V>: Send + Sync + 'static {
    /// Name unique within the database
    fn name(&self) -> &str;

    /// Per-connection state for this extension
    fn new_connection(&self) -> Box<dyn ExtensionConnection<V>>;
}

/// An extension bound to one connection
pub trait ExtensionConnection<V>: Send + 'static {
    /// Open a write transaction nested in the batch of the owning transaction
    fn write_transaction<'a>(
        &'a mut self,
        batch: &'a mut dyn WriteBatch,
    ) -> Box<dyn ExtensionWriteTransaction<V> + 'a>;
}

/// The four write hooks every extension implements
pub trait ExtensionWriteTransaction<V> {
    /// `value` was stored under a new `key` with identity `row_id`
    fn handle_value_insertion(
        &mut self,
        value: &V,
        key: &str,
        row_id: RowId,
        collection: &str,
    ) -> Result<()>;

    /// `value` replaced the value under `key` (identity `row_id`)
    fn handle_value_update(
        &mut self,
        value: &V,
        key: &str,
        row_id: RowId,
        collection: &str,
    ) -> Result<()>;

    /// The values under `keys` were removed
    fn handle_removal_of_keys(&mut self, keys: &[String], collection: &str) -> Result<()>;

    /// Every value of the collection was removed
    fn handle_removal_of_all(&mut self, collection: &str) -> Result<()>;
}
