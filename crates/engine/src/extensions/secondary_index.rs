//! Secondary index extension
//!
//! Maintains one row per primary key holding the value of every declared
//! indexed property, recomputed from the value on each insert or update and
//! deleted on removal. Rows live in `_idx_<collection>` and carry the primary
//! row's identity.
//!
//! Lookups evaluate an `IndexPredicate` against one property and return the
//! matching primary keys in key order. An `IndexQuery` packages a checked
//! property and predicate so a lookup can be prepared once and run in many
//! transactions.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use turf_core::codec::{from_msgpack, to_msgpack};
use turf_core::{
    Error, Extension, ExtensionConnection, ExtensionWriteTransaction, Result, RowId, SnapshotView,
    WriteBatch,
};

use super::table_name;

/// Indexed property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexValue {
    /// Absent value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// UTF-8 text
    Text(String),
}

impl IndexValue {
    /// Ordering between two values of comparable kinds
    ///
    /// `Int` and `Float` compare numerically; `Null` only equals `Null`; any
    /// other cross-kind comparison is `None`.
    pub fn compare(&self, other: &IndexValue) -> Option<Ordering> {
        use IndexValue::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// True for `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, IndexValue::Null)
    }
}

impl From<bool> for IndexValue {
    fn from(v: bool) -> Self {
        IndexValue::Bool(v)
    }
}

impl From<i64> for IndexValue {
    fn from(v: i64) -> Self {
        IndexValue::Int(v)
    }
}

impl From<i32> for IndexValue {
    fn from(v: i32) -> Self {
        IndexValue::Int(v as i64)
    }
}

impl From<u32> for IndexValue {
    fn from(v: u32) -> Self {
        IndexValue::Int(v as i64)
    }
}

impl From<f64> for IndexValue {
    fn from(v: f64) -> Self {
        IndexValue::Float(v)
    }
}

impl From<String> for IndexValue {
    fn from(v: String) -> Self {
        IndexValue::Text(v)
    }
}

impl From<&str> for IndexValue {
    fn from(v: &str) -> Self {
        IndexValue::Text(v.to_string())
    }
}

impl<T: Into<IndexValue>> From<Option<T>> for IndexValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(IndexValue::Null, Into::into)
    }
}

/// Condition on one indexed property
#[derive(Debug, Clone, PartialEq)]
pub enum IndexPredicate {
    /// Equal to the value; `Equals(Null)` matches null values
    Equals(IndexValue),
    /// Comparable and not equal
    NotEquals(IndexValue),
    /// Strictly less than
    LessThan(IndexValue),
    /// Less than or equal
    LessThanOrEqual(IndexValue),
    /// Strictly greater than
    GreaterThan(IndexValue),
    /// Greater than or equal
    GreaterThanOrEqual(IndexValue),
    /// Equal to any of the values
    In(Vec<IndexValue>),
    /// Value is null
    IsNull,
    /// Value is not null
    IsNotNull,
}

impl IndexPredicate {
    /// Evaluate against one stored value
    pub fn matches(&self, value: &IndexValue) -> bool {
        use IndexPredicate::*;
        let non_null_cmp = |target: &IndexValue| {
            if value.is_null() || target.is_null() {
                None
            } else {
                value.compare(target)
            }
        };
        match self {
            Equals(t) => value.compare(t) == Some(Ordering::Equal),
            NotEquals(t) => matches!(non_null_cmp(t), Some(o) if o != Ordering::Equal),
            LessThan(t) => non_null_cmp(t) == Some(Ordering::Less),
            LessThanOrEqual(t) => matches!(non_null_cmp(t), Some(Ordering::Less | Ordering::Equal)),
            GreaterThan(t) => non_null_cmp(t) == Some(Ordering::Greater),
            GreaterThanOrEqual(t) => {
                matches!(non_null_cmp(t), Some(Ordering::Greater | Ordering::Equal))
            }
            In(ts) => ts.iter().any(|t| value.compare(t) == Some(Ordering::Equal)),
            IsNull => value.is_null(),
            IsNotNull => !value.is_null(),
        }
    }
}

type Extractor<V> = Box<dyn Fn(&V) -> IndexValue + Send + Sync>;

/// A property of `V` maintained in the index
pub struct IndexedProperty<V> {
    name: String,
    extract: Extractor<V>,
}

impl<V> IndexedProperty<V> {
    /// Declare property `name`, computed from a value by `extract`
    pub fn new<T, F>(name: &str, extract: F) -> Self
    where
        T: Into<IndexValue>,
        F: Fn(&V) -> T + Send + Sync + 'static,
    {
        IndexedProperty {
            name: name.to_string(),
            extract: Box::new(move |v| extract(v).into()),
        }
    }

    /// Property name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of this property for `value`
    pub fn value_for(&self, value: &V) -> IndexValue {
        (self.extract)(value)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexRow {
    row_id: i64,
    values: BTreeMap<String, IndexValue>,
}

struct IndexInner<V> {
    name: String,
    collection: String,
    table: String,
    properties: Vec<IndexedProperty<V>>,
}

impl<V> IndexInner<V> {
    fn row_for(&self, value: &V, row_id: RowId) -> IndexRow {
        IndexRow {
            row_id: row_id.as_i64(),
            values: self
                .properties
                .iter()
                .map(|p| (p.name.clone(), p.value_for(value)))
                .collect(),
        }
    }

    fn check_property(&self, property: &str) -> Result<()> {
        if self.properties.iter().any(|p| p.name == property) {
            Ok(())
        } else {
            Err(Error::InvalidOperation(format!(
                "Property {} is not indexed by {}",
                property, self.name
            )))
        }
    }

    fn scan_matching(
        &self,
        view: &dyn SnapshotView,
        property: &str,
        predicate: &IndexPredicate,
    ) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in view.scan(&self.table)? {
            let (key, row) = entry?;
            let indexed: IndexRow = from_msgpack(&row.data)?;
            let value = indexed.values.get(property).unwrap_or(&IndexValue::Null);
            if predicate.matches(value) {
                keys.push(key);
            }
        }
        Ok(keys)
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

/// Secondary index over declared properties of a collection's values
pub struct SecondaryIndex<V> {
    inner: Arc<IndexInner<V>>,
}

impl<V: Send + Sync + 'static> SecondaryIndex<V> {
    /// Index `properties` of `collection`, named `idx_<collection>`
    pub fn new(collection: &str, properties: Vec<IndexedProperty<V>>) -> Self {
        Self::named(&format!("idx_{}", collection), collection, properties)
    }

    /// Index with an explicit extension name
    pub fn named(name: &str, collection: &str, properties: Vec<IndexedProperty<V>>) -> Self {
        SecondaryIndex {
            inner: Arc::new(IndexInner {
                name: name.to_string(),
                collection: collection.to_string(),
                table: table_name(name, None),
                properties,
            }),
        }
    }

    /// Collection this index is declared on
    pub fn collection(&self) -> &str {
        &self.inner.collection
    }

    /// Names of the indexed properties, in declaration order
    pub fn property_names(&self) -> Vec<&str> {
        self.inner.properties.iter().map(|p| p.name()).collect()
    }

    /// Primary keys whose `property` satisfies `predicate`, in key order
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for an undeclared property, or the store
    /// error if the scan fails.
    pub fn find_keys(
        &self,
        view: &dyn SnapshotView,
        property: &str,
        predicate: &IndexPredicate,
    ) -> Result<Vec<String>> {
        self.inner.check_property(property)?;
        self.inner.scan_matching(view, property, predicate)
    }

    /// Number of primary keys whose `property` satisfies `predicate`
    pub fn count(
        &self,
        view: &dyn SnapshotView,
        property: &str,
        predicate: &IndexPredicate,
    ) -> Result<u64> {
        Ok(self.find_keys(view, property, predicate)?.len() as u64)
    }

    /// Indexed property values and row identity stored for `key`
    pub fn indexed_values(
        &self,
        view: &dyn SnapshotView,
        key: &str,
    ) -> Result<Option<(RowId, BTreeMap<String, IndexValue>)>> {
        match view.get(&self.inner.table, key)? {
            Some(row) => {
                let indexed: IndexRow = from_msgpack(&row.data)?;
                Ok(Some((RowId(indexed.row_id), indexed.values)))
            }
            None => Ok(None),
        }
    }
}

impl<V> SecondaryIndex<V> {
    /// Check `property` once and keep the lookup for reuse
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `property` is not indexed.
    pub fn prepare_query(&self, property: &str, predicate: IndexPredicate) -> Result<IndexQuery<V>> {
        self.inner.check_property(property)?;
        Ok(IndexQuery {
            index: Arc::clone(&self.inner),
            property: property.to_string(),
            predicate,
        })
    }
}

/// A prepared lookup on one indexed property
///
/// Holds no snapshot; each run reads the state of the transaction it runs
/// in.
pub struct IndexQuery<V> {
    index: Arc<IndexInner<V>>,
    property: String,
    predicate: IndexPredicate,
}

impl<V> IndexQuery<V> {
    /// Collection the underlying index is declared on
    pub fn collection(&self) -> &str {
        &self.index.collection
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn predicate(&self) -> &IndexPredicate {
        &self.predicate
    }

    /// Matching primary keys in `view`, in key order
    pub fn find_keys(&self, view: &dyn SnapshotView) -> Result<Vec<String>> {
        self.index.scan_matching(view, &self.property, &self.predicate)
    }

    /// Number of matching primary keys in `view`
    pub fn count(&self, view: &dyn SnapshotView) -> Result<u64> {
        Ok(self.find_keys(view)?.len() as u64)
    }
}

impl<V> Clone for IndexQuery<V> {
    fn clone(&self) -> Self {
        IndexQuery {
            index: Arc::clone(&self.index),
            property: self.property.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

impl<V> std::fmt::Debug for IndexQuery<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexQuery")
            .field("index", &self.index.name)
            .field("property", &self.property)
            .field("predicate", &self.predicate)
            .finish()
    }
}

impl<V: Send + Sync + 'static> Extension<V> for SecondaryIndex<V> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn new_connection(&self) -> Box<dyn ExtensionConnection<V>> {
        Box::new(IndexConnection {
            inner: Arc::clone(&self.inner),
        })
    }
}

struct IndexConnection<V> {
    inner: Arc<IndexInner<V>>,
}

impl<V: Send + Sync + 'static> ExtensionConnection<V> for IndexConnection<V> {
    fn write_transaction<'a>(
        &'a mut self,
        batch: &'a mut dyn WriteBatch,
    ) -> Box<dyn ExtensionWriteTransaction<V> + 'a> {
        Box::new(IndexWriteTransaction {
            inner: &self.inner,
            batch,
        })
    }
}

struct IndexWriteTransaction<'a, V> {
    inner: &'a IndexInner<V>,
    batch: &'a mut dyn WriteBatch,
}

impl<V> IndexWriteTransaction<'_, V> {
    fn write_row(&mut self, value: &V, key: &str, row_id: RowId, collection: &str) -> Result<()> {
        self.inner.check_collection(collection)?;
        let row = self.inner.row_for(value, row_id);
        self.batch.upsert(&self.inner.table, key, to_msgpack(&row)?)?;
        Ok(())
    }
}

impl<V> ExtensionWriteTransaction<V> for IndexWriteTransaction<'_, V> {
    fn handle_value_insertion(
        &mut self,
        value: &V,
        key: &str,
        row_id: RowId,
        collection: &str,
    ) -> Result<()> {
        self.write_row(value, key, row_id, collection)
    }

    fn handle_value_update(
        &mut self,
        value: &V,
        key: &str,
        row_id: RowId,
        collection: &str,
    ) -> Result<()> {
        self.write_row(value, key, row_id, collection)
    }

    fn handle_removal_of_keys(&mut self, keys: &[String], collection: &str) -> Result<()> {
        self.inner.check_collection(collection)?;
        for key in keys {
            self.batch.delete(&self.inner.table, key)?;
        }
        Ok(())
    }

    fn handle_removal_of_all(&mut self, collection: &str) -> Result<()> {
        self.inner.check_collection(collection)?;
        self.batch.delete_all(&self.inner.table)?;
        Ok(())
    }
}
