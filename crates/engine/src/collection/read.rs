use std::sync::Arc;
use tracing::trace;
use turf_core::{ChangeSet, Collection, Error, ObserverToken, Result, SnapshotView};

use super::values::ValuesSequence;
use crate::database::ObserverRegistry;
use crate::extensions::{
    FullTextSearch, IndexPredicate, IndexQuery, RelationshipIndex, SecondaryIndex,
};
use crate::local_storage::LocalStorage;

/// Read access to one collection inside a transaction
///
/// Point lookups go through the connection's value cache: a hit never
/// touches the store, a miss reads the row, decodes it and caches it.
pub struct ReadCollection<'t, C: Collection> {
    collection: &'t C,
    local: &'t mut LocalStorage<C::Value>,
    view: &'t dyn SnapshotView,
    observers: &'t ObserverRegistry,
}

impl<'t, C: Collection> ReadCollection<'t, C> {
    pub(crate) fn new(
        collection: &'t C,
        local: &'t mut LocalStorage<C::Value>,
        view: &'t dyn SnapshotView,
        observers: &'t ObserverRegistry,
    ) -> Self {
        ReadCollection {
            collection,
            local,
            view,
            observers,
        }
    }

    /// Collection name
    pub fn name(&self) -> &str {
        self.collection.name()
    }

    /// Declared schema version
    pub fn schema_version(&self) -> u64 {
        self.collection.schema_version()
    }

    /// Value stored under `key`
    ///
    /// # Errors
    ///
    /// Returns the store error, or `SerializationError` if the stored row
    /// can't be decoded.
    pub fn value_for_key(&mut self, key: &str) -> Result<Option<Arc<C::Value>>> {
        if let Some(value) = self.local.value_cache.get(key) {
            trace!(target: "turf::cache", collection = self.name(), key, "Cache hit");
            return Ok(Some(value));
        }
        let Some(row) = self.view.get(self.collection.name(), key)? else {
            return Ok(None);
        };
        let value = Arc::new(self.collection.deserialize_value(&row.data)?);
        self.local.value_cache.insert(key, Arc::clone(&value));
        Ok(Some(value))
    }

    /// Values stored under `keys`, in the order of `keys`; absent keys are
    /// skipped
    pub fn values_for_keys<K: AsRef<str>>(&mut self, keys: &[K]) -> Result<Vec<Arc<C::Value>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.value_for_key(key.as_ref())? {
                values.push(value);
            }
        }
        Ok(values)
    }

    /// True if a value is stored under `key`
    pub fn contains_key(&self, key: &str) -> Result<bool> {
        if self.local.value_cache.contains(key) {
            return Ok(true);
        }
        Ok(self.view.get(self.collection.name(), key)?.is_some())
    }

    /// Every value, lazily, in key order
    pub fn all_values(&self) -> Result<ValuesSequence<'t, C>> {
        let rows = self.view.scan(self.collection.name())?;
        Ok(ValuesSequence::new(self.collection, rows))
    }

    /// Every key, in key order
    pub fn all_keys(&self) -> Result<Vec<String>> {
        self.view.keys(self.collection.name())
    }

    /// Number of stored values
    pub fn number_of_keys(&self) -> Result<u64> {
        self.view.count(self.collection.name())
    }

    /// Call `observer` with the change set of every later committed
    /// transaction that modifies this collection, on any connection
    ///
    /// The registration outlives this transaction.
    pub fn register_permanent_change_set_observer<F>(&self, observer: F) -> ObserverToken
    where
        F: Fn(&ChangeSet) + Send + Sync + 'static,
    {
        self.observers
            .register(self.collection.name(), Arc::new(observer))
    }

    /// Remove an observer; returns false if `token` wasn't registered here
    pub fn unregister_permanent_change_set_observer(&self, token: ObserverToken) -> bool {
        self.observers.unregister(self.collection.name(), token)
    }

    fn check_extension_collection(&self, extension: &str, collection: &str) -> Result<()> {
        if collection == self.collection.name() {
            Ok(())
        } else {
            Err(Error::InvalidOperation(format!(
                "{} indexes collection {}, not {}",
                extension,
                collection,
                self.collection.name()
            )))
        }
    }

    /// Keys whose indexed `property` satisfies `predicate`, in key order
    pub fn find_keys_where(
        &self,
        index: &SecondaryIndex<C::Value>,
        property: &str,
        predicate: &IndexPredicate,
    ) -> Result<Vec<String>> {
        self.check_extension_collection("secondary index", index.collection())?;
        index.find_keys(self.view, property, predicate)
    }

    /// Values whose indexed `property` satisfies `predicate`, in key order
    pub fn find_values_where(
        &mut self,
        index: &SecondaryIndex<C::Value>,
        property: &str,
        predicate: &IndexPredicate,
    ) -> Result<Vec<Arc<C::Value>>> {
        let keys = self.find_keys_where(index, property, predicate)?;
        self.values_for_keys(&keys)
    }

    /// First value, in key order, whose indexed `property` satisfies
    /// `predicate`
    pub fn find_first_value_where(
        &mut self,
        index: &SecondaryIndex<C::Value>,
        property: &str,
        predicate: &IndexPredicate,
    ) -> Result<Option<Arc<C::Value>>> {
        match self.find_keys_where(index, property, predicate)?.first() {
            Some(key) => self.value_for_key(key),
            None => Ok(None),
        }
    }

    /// Number of values whose indexed `property` satisfies `predicate`
    pub fn count_values_where(
        &self,
        index: &SecondaryIndex<C::Value>,
        property: &str,
        predicate: &IndexPredicate,
    ) -> Result<u64> {
        self.check_extension_collection("secondary index", index.collection())?;
        index.count(self.view, property, predicate)
    }

    /// Keys matching a prepared index query, in key order
    pub fn keys_matching(&self, query: &IndexQuery<C::Value>) -> Result<Vec<String>> {
        self.check_extension_collection("secondary index", query.collection())?;
        query.find_keys(self.view)
    }

    /// Values matching a prepared index query, in key order
    pub fn values_matching(&mut self, query: &IndexQuery<C::Value>) -> Result<Vec<Arc<C::Value>>> {
        let keys = self.keys_matching(query)?;
        self.values_for_keys(&keys)
    }

    /// First value, in key order, matching a prepared index query
    pub fn first_value_matching(
        &mut self,
        query: &IndexQuery<C::Value>,
    ) -> Result<Option<Arc<C::Value>>> {
        match self.keys_matching(query)?.first() {
            Some(key) => self.value_for_key(key),
            None => Ok(None),
        }
    }

    /// Number of values matching a prepared index query
    pub fn count_matching(&self, query: &IndexQuery<C::Value>) -> Result<u64> {
        self.check_extension_collection("secondary index", query.collection())?;
        query.count(self.view)
    }

    /// Keys of values matching every term of `query`, best match first
    pub fn search(&self, fts: &FullTextSearch<C::Value>, query: &str) -> Result<Vec<String>> {
        self.check_extension_collection("full-text index", fts.collection())?;
        fts.search(self.view, query)
    }

    /// Values matching every term of `query`, best match first
    pub fn search_values(
        &mut self,
        fts: &FullTextSearch<C::Value>,
        query: &str,
    ) -> Result<Vec<Arc<C::Value>>> {
        let keys = self.search(fts, query)?;
        self.values_for_keys(&keys)
    }

    /// Keys of the destination collection `source_key` points to through
    /// `relationship`
    pub fn destination_keys(
        &self,
        index: &RelationshipIndex<C::Value>,
        relationship: &str,
        source_key: &str,
    ) -> Result<Vec<String>> {
        self.check_extension_collection("relationship index", index.collection())?;
        index.destination_keys(self.view, relationship, source_key)
    }

    /// Keys of this collection pointing to `destination_key` through
    /// `relationship`
    pub fn source_keys(
        &self,
        index: &RelationshipIndex<C::Value>,
        relationship: &str,
        destination_key: &str,
    ) -> Result<Vec<String>> {
        self.check_extension_collection("relationship index", index.collection())?;
        index.source_keys(self.view, relationship, destination_key)
    }
}
