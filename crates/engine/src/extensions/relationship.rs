//! Relationship index extension
//!
//! Forward adjacency from a source key to keys of a destination collection.
//! Each declared relationship keeps one row per source key in
//! `_rel_<collection>_<relationship>`, recomputed from the value on every
//! insert or update. A value with no destination keys has no row.
//!
//! Reverse lookups (`source_keys`) scan the relationship table.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use turf_core::codec::{from_msgpack, to_msgpack};
use turf_core::{
    Error, Extension, ExtensionConnection, ExtensionWriteTransaction, Result, RowId, SnapshotView,
    WriteBatch,
};

use super::table_name;

type KeysProducer<V> = Box<dyn Fn(&V) -> Vec<String> + Send + Sync>;

/// A to-many relationship from values of `V` to another collection
pub struct ToManyRelationship<V> {
    name: String,
    destination_collection: String,
    destination_keys: KeysProducer<V>,
}

impl<V> ToManyRelationship<V> {
    /// Declare relationship `name` pointing into `destination_collection`
    pub fn new<F>(name: &str, destination_collection: &str, destination_keys: F) -> Self
    where
        F: Fn(&V) -> Vec<String> + Send + Sync + 'static,
    {
        ToManyRelationship {
            name: name.to_string(),
            destination_collection: destination_collection.to_string(),
            destination_keys: Box::new(destination_keys),
        }
    }

    /// Relationship name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection the destination keys belong to
    pub fn destination_collection(&self) -> &str {
        &self.destination_collection
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EdgeRow {
    row_id: i64,
    destination_collection: String,
    destination_keys: Vec<String>,
}

struct RelInner<V> {
    name: String,
    collection: String,
    relationships: Vec<(ToManyRelationship<V>, String)>,
}

impl<V> RelInner<V> {
    fn table_for(&self, relationship: &str) -> Result<&str> {
        self.relationships
            .iter()
            .find(|(r, _)| r.name == relationship)
            .map(|(_, table)| table.as_str())
            .ok_or_else(|| {
                Error::InvalidOperation(format!(
                    "Relationship {} is not declared by {}",
                    relationship, self.name
                ))
            })
    }

    fn check_collection(&self, collection: &str) -> Result<()> {
        if collection != self.collection {
            return Err(Error::extension(
                &self.name,
                format!(
                    "declared for collection {} but invoked for {}",
                    self.collection, collection
                ),
            ));
        }
        Ok(())
    }
}

/// Relationship index over the declared to-many relationships of a
/// collection
pub struct RelationshipIndex<V> {
    inner: Arc<RelInner<V>>,
}

impl<V: Send + Sync + 'static> RelationshipIndex<V> {
    /// Index `relationships` of `collection`, named `rel_<collection>`
    pub fn new(collection: &str, relationships: Vec<ToManyRelationship<V>>) -> Self {
        Self::named(&format!("rel_{}", collection), collection, relationships)
    }

    /// Index with an explicit extension name
    pub fn named(name: &str, collection: &str, relationships: Vec<ToManyRelationship<V>>) -> Self {
        let relationships = relationships
            .into_iter()
            .map(|r| {
                let table = table_name(name, Some(&r.name));
                (r, table)
            })
            .collect();
        RelationshipIndex {
            inner: Arc::new(RelInner {
                name: name.to_string(),
                collection: collection.to_string(),
                relationships,
            }),
        }
    }

    /// Collection this index is declared on
    pub fn collection(&self) -> &str {
        &self.inner.collection
    }

    /// Destination keys recorded for `source` under `relationship`
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for an undeclared relationship.
    pub fn destination_keys(
        &self,
        view: &dyn SnapshotView,
        relationship: &str,
        source: &str,
    ) -> Result<Vec<String>> {
        let table = self.inner.table_for(relationship)?;
        match view.get(table, source)? {
            Some(row) => {
                let edge: EdgeRow = from_msgpack(&row.data)?;
                Ok(edge.destination_keys)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Source keys whose `relationship` points at `destination`, in key order
    pub fn source_keys(
        &self,
        view: &dyn SnapshotView,
        relationship: &str,
        destination: &str,
    ) -> Result<Vec<String>> {
        let table = self.inner.table_for(relationship)?;
        let mut sources = Vec::new();
        for entry in view.scan(table)? {
            let (key, row) = entry?;
            let edge: EdgeRow = from_msgpack(&row.data)?;
            if edge.destination_keys.iter().any(|k| k == destination) {
                sources.push(key);
            }
        }
        Ok(sources)
    }
}

impl<V: Send + Sync + 'static> Extension<V> for RelationshipIndex<V> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn new_connection(&self) -> Box<dyn ExtensionConnection<V>> {
        Box::new(RelConnection {
            inner: Arc::clone(&self.inner),
        })
    }
}

struct RelConnection<V> {
    inner: Arc<RelInner<V>>,
}

impl<V: Send + Sync + 'static> ExtensionConnection<V> for RelConnection<V> {
    fn write_transaction<'a>(
        &'a mut self,
        batch: &'a mut dyn WriteBatch,
    ) -> Box<dyn ExtensionWriteTransaction<V> + 'a> {
        Box::new(RelWriteTransaction {
            inner: &self.inner,
            batch,
        })
    }
}

struct RelWriteTransaction<'a, V> {
    inner: &'a RelInner<V>,
    batch: &'a mut dyn WriteBatch,
}

impl<V> RelWriteTransaction<'_, V> {
    fn write_edges(&mut self, value: &V, key: &str, row_id: RowId, collection: &str) -> Result<()> {
        self.inner.check_collection(collection)?;
        for (relationship, table) in &self.inner.relationships {
            let mut destination_keys = (relationship.destination_keys)(value);
            destination_keys.dedup();
            if destination_keys.is_empty() {
                self.batch.delete(table, key)?;
                continue;
            }
            let edge = EdgeRow {
                row_id: row_id.as_i64(),
                destination_collection: relationship.destination_collection.clone(),
                destination_keys,
            };
            self.batch.upsert(table, key, to_msgpack(&edge)?)?;
        }
        Ok(())
    }
}

impl<V> ExtensionWriteTransaction<V> for RelWriteTransaction<'_, V> {
    fn handle_value_insertion(
        &mut self,
        value: &V,
        key: &str,
        row_id: RowId,
        collection: &str,
    ) -> Result<()> {
        self.write_edges(value, key, row_id, collection)
    }

    fn handle_value_update(
        &mut self,
        value: &V,
        key: &str,
        row_id: RowId,
        collection: &str,
    ) -> Result<()> {
        self.write_edges(value, key, row_id, collection)
    }

    fn handle_removal_of_keys(&mut self, keys: &[String], collection: &str) -> Result<()> {
        self.inner.check_collection(collection)?;
        for (_, table) in &self.inner.relationships {
            for key in keys {
                self.batch.delete(table, key)?;
            }
        }
        Ok(())
    }

    fn handle_removal_of_all(&mut self, collection: &str) -> Result<()> {
        self.inner.check_collection(collection)?;
        for (_, table) in &self.inner.relationships {
            self.batch.delete_all(table)?;
        }
        Ok(())
    }
}
