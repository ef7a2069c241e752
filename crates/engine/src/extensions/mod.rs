//! Built-in extensions and the per-connection extension registry
//!
//! - `SecondaryIndex`: queryable property values per primary key
//! - `FullTextSearch`: token index over text-producing properties
//! - `RelationshipIndex`: forward adjacency to keys of another collection
//!
//! Every kind stores its derived rows in tables of its own through the owning
//! transaction's write batch, so derived rows commit and roll back together
//! with the primary rows.

pub mod full_text;
pub mod relationship;
pub mod secondary_index;
pub mod tokenizer;

pub use full_text::{FtsProperty, FullTextSearch};
pub use relationship::{RelationshipIndex, ToManyRelationship};
pub use secondary_index::{
    IndexPredicate, IndexQuery, IndexValue, IndexedProperty, SecondaryIndex,
};

use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;
use turf_core::{ConnectionId, Error, Extension, ExtensionConnection, Result};

/// Memoized `Extension::new_connection` results for one connection, keyed by
/// extension name
pub struct ExtensionConnections {
    connection: ConnectionId,
    by_name: FxHashMap<String, Box<dyn Any + Send>>,
}

impl ExtensionConnections {
    /// Create an empty registry for `connection`
    pub fn new(connection: ConnectionId) -> Self {
        ExtensionConnections {
            connection,
            by_name: FxHashMap::default(),
        }
    }

    /// Number of extensions bound so far
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// True if no extension has been bound yet
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// The connection-bound instance of `extension`, created on first use
    ///
    /// # Errors
    ///
    /// Returns `ExtensionError` if an extension of the same name was already
    /// bound for a different value type.
    pub fn connection_for<V: 'static>(
        &mut self,
        extension: &Arc<dyn Extension<V>>,
    ) -> Result<&mut dyn ExtensionConnection<V>> {
        let name = extension.name();
        let connection = self.connection;
        let slot = self.by_name.entry(name.to_string()).or_insert_with(|| {
            debug!(target: "turf::ext", extension = name, %connection, "Binding extension");
            let bound: Box<dyn Any + Send> = Box::new(extension.new_connection());
            bound
        });
        match slot.downcast_mut::<Box<dyn ExtensionConnection<V>>>() {
            Some(bound) => Ok(bound.as_mut()),
            None => Err(Error::extension(
                name,
                "already bound on this connection for a different value type",
            )),
        }
    }
}

/// Name of the table an extension keeps its rows in
pub(crate) fn table_name(extension: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(s) => format!("_{}_{}", extension, s),
        None => format!("_{}", extension),
    }
}
