use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{trace, warn};
use turf_core::{ChangeSet, Collection, Error, ObserverToken, Result, RowChange, WriteBatch};

use super::read::ReadCollection;
use super::values::ValuesSequence;
use crate::database::ObserverRegistry;
use crate::extensions::{
    ExtensionConnections, FullTextSearch, IndexPredicate, IndexQuery, RelationshipIndex,
    SecondaryIndex,
};
use crate::local_storage::LocalStorage;

/// Read-write access to one collection inside a read-write transaction
///
/// Every successful mutation updates, in this order: the store batch, the
/// change set, the value cache, the pending cache updates, and then every
/// associated extension through the same batch. A failure after the batch
/// was touched poisons the transaction.
pub struct ReadWriteCollection<'t, C: Collection> {
    collection: &'t C,
    local: &'t mut LocalStorage<C::Value>,
    batch: &'t mut dyn WriteBatch,
    extensions: &'t mut ExtensionConnections,
    modified: &'t mut BTreeSet<String>,
    failure: &'t mut Option<String>,
    observers: &'t ObserverRegistry,
}

impl<'t, C: Collection> ReadWriteCollection<'t, C> {
    pub(crate) fn new(
        collection: &'t C,
        local: &'t mut LocalStorage<C::Value>,
        batch: &'t mut dyn WriteBatch,
        extensions: &'t mut ExtensionConnections,
        modified: &'t mut BTreeSet<String>,
        failure: &'t mut Option<String>,
        observers: &'t ObserverRegistry,
    ) -> Self {
        ReadWriteCollection {
            collection,
            local,
            batch,
            extensions,
            modified,
            failure,
            observers,
        }
    }

    /// Read view over this transaction's writes
    pub fn as_read(&mut self) -> ReadCollection<'_, C> {
        ReadCollection::new(
            self.collection,
            &mut *self.local,
            self.batch.as_view(),
            self.observers,
        )
    }

    fn poison(&mut self, error: &Error) {
        warn!(
            target: "turf::txn",
            collection = self.collection.name(),
            error = %error,
            "Mutation failed, transaction will roll back"
        );
        if self.failure.is_none() {
            *self.failure = Some(format!(
                "mutation of collection {} failed: {}",
                self.collection.name(),
                error
            ));
        }
    }

    /// Store `value` under `key`, replacing any existing value
    ///
    /// # Errors
    ///
    /// A `SerializationError` from encoding the value leaves the transaction
    /// usable. Any later failure (store or extension) poisons it.
    pub fn set_value(&mut self, value: C::Value, key: &str) -> Result<RowChange> {
        let data = self.collection.serialize_value(&value)?;
        let value = Arc::new(value);
        let result = self.write_value(&value, key, data);
        if let Err(e) = &result {
            self.poison(e);
        }
        result
    }

    fn write_value(&mut self, value: &Arc<C::Value>, key: &str, data: Vec<u8>) -> Result<RowChange> {
        let name = self.collection.name();
        let change = self.batch.upsert(name, key, data)?;
        match change {
            RowChange::Insert { .. } => self.local.change_set.record_value_inserted(key),
            RowChange::Update { .. } => self.local.change_set.record_value_updated(key),
        }
        self.local.value_cache.insert(key, Arc::clone(value));
        self.local
            .cache_updates
            .record_value_upserted(key, Arc::clone(value));
        self.modified.insert(name.to_string());
        trace!(target: "turf::txn", collection = name, key, insert = change.is_insert(), "Set value");

        for extension in self.collection.associated_extensions() {
            let connection = self.extensions.connection_for(extension)?;
            let mut txn = connection.write_transaction(&mut *self.batch);
            match change {
                RowChange::Insert { row_id } => {
                    txn.handle_value_insertion(&**value, key, row_id, name)?
                }
                RowChange::Update { row_id } => {
                    txn.handle_value_update(&**value, key, row_id, name)?
                }
            }
        }
        Ok(change)
    }

    /// Remove the value under `key`
    pub fn remove_value_with_key(&mut self, key: &str) -> Result<()> {
        self.remove_values_with_keys(&[key])
    }

    /// Remove the values under `keys`
    ///
    /// Every key is recorded as removed, whether or not it had a value.
    ///
    /// # Errors
    ///
    /// Any failure poisons the transaction.
    pub fn remove_values_with_keys<K: AsRef<str>>(&mut self, keys: &[K]) -> Result<()> {
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
        if keys.is_empty() {
            return Ok(());
        }
        let result = self.remove_keys(&keys);
        if let Err(e) = &result {
            self.poison(e);
        }
        result
    }

    fn remove_keys(&mut self, keys: &[String]) -> Result<()> {
        let name = self.collection.name();
        for key in keys {
            self.batch.delete(name, key)?;
            self.local.value_cache.remove(key);
            self.local.change_set.record_value_removed(key);
            self.local.cache_updates.record_value_removed(key);
        }
        self.modified.insert(name.to_string());
        trace!(target: "turf::txn", collection = name, count = keys.len(), "Removed values");

        for extension in self.collection.associated_extensions() {
            let connection = self.extensions.connection_for(extension)?;
            connection
                .write_transaction(&mut *self.batch)
                .handle_removal_of_keys(keys, name)?;
        }
        Ok(())
    }

    /// Remove every value of the collection
    ///
    /// # Errors
    ///
    /// Any failure poisons the transaction.
    pub fn remove_all_values(&mut self) -> Result<()> {
        let result = self.remove_all();
        if let Err(e) = &result {
            self.poison(e);
        }
        result
    }

    fn remove_all(&mut self) -> Result<()> {
        let name = self.collection.name();
        let removed = self.batch.delete_all(name)?;
        self.local.value_cache.clear();
        self.local.change_set.record_all_values_removed();
        self.local.cache_updates.record_all_values_removed();
        self.modified.insert(name.to_string());
        trace!(target: "turf::txn", collection = name, removed, "Removed all values");

        for extension in self.collection.associated_extensions() {
            let connection = self.extensions.connection_for(extension)?;
            connection
                .write_transaction(&mut *self.batch)
                .handle_removal_of_all(name)?;
        }
        Ok(())
    }

    /// Collection name
    pub fn name(&self) -> &str {
        self.collection.name()
    }

    /// Declared schema version
    pub fn schema_version(&self) -> u64 {
        self.collection.schema_version()
    }

    /// Value stored under `key`, including this transaction's writes
    pub fn value_for_key(&mut self, key: &str) -> Result<Option<Arc<C::Value>>> {
        self.as_read().value_for_key(key)
    }

    /// Values stored under `keys`; absent keys are skipped
    pub fn values_for_keys<K: AsRef<str>>(&mut self, keys: &[K]) -> Result<Vec<Arc<C::Value>>> {
        self.as_read().values_for_keys(keys)
    }

    /// True if a value is stored under `key`
    pub fn contains_key(&mut self, key: &str) -> Result<bool> {
        self.as_read().contains_key(key)
    }

    /// Every value, lazily, in key order
    pub fn all_values(&mut self) -> Result<ValuesSequence<'_, C>> {
        self.as_read().all_values()
    }

    /// Every key, in key order
    pub fn all_keys(&mut self) -> Result<Vec<String>> {
        self.as_read().all_keys()
    }

    /// Number of stored values
    pub fn number_of_keys(&mut self) -> Result<u64> {
        self.as_read().number_of_keys()
    }

    /// See `ReadCollection::register_permanent_change_set_observer`
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

    /// Keys whose indexed `property` satisfies `predicate`, in key order
    pub fn find_keys_where(
        &mut self,
        index: &SecondaryIndex<C::Value>,
        property: &str,
        predicate: &IndexPredicate,
    ) -> Result<Vec<String>> {
        self.as_read().find_keys_where(index, property, predicate)
    }

    /// Values whose indexed `property` satisfies `predicate`, in key order
    pub fn find_values_where(
        &mut self,
        index: &SecondaryIndex<C::Value>,
        property: &str,
        predicate: &IndexPredicate,
    ) -> Result<Vec<Arc<C::Value>>> {
        self.as_read().find_values_where(index, property, predicate)
    }

    /// First value, in key order, whose indexed `property` satisfies
    /// `predicate`
    pub fn find_first_value_where(
        &mut self,
        index: &SecondaryIndex<C::Value>,
        property: &str,
        predicate: &IndexPredicate,
    ) -> Result<Option<Arc<C::Value>>> {
        self.as_read()
            .find_first_value_where(index, property, predicate)
    }

    /// Number of values whose indexed `property` satisfies `predicate`
    pub fn count_values_where(
        &mut self,
        index: &SecondaryIndex<C::Value>,
        property: &str,
        predicate: &IndexPredicate,
    ) -> Result<u64> {
        self.as_read().count_values_where(index, property, predicate)
    }

    /// Keys matching a prepared index query, in key order
    pub fn keys_matching(&mut self, query: &IndexQuery<C::Value>) -> Result<Vec<String>> {
        self.as_read().keys_matching(query)
    }

    /// Values matching a prepared index query, in key order
    pub fn values_matching(&mut self, query: &IndexQuery<C::Value>) -> Result<Vec<Arc<C::Value>>> {
        self.as_read().values_matching(query)
    }

    /// First value, in key order, matching a prepared index query
    pub fn first_value_matching(
        &mut self,
        query: &IndexQuery<C::Value>,
    ) -> Result<Option<Arc<C::Value>>> {
        self.as_read().first_value_matching(query)
    }

    /// Number of values matching a prepared index query
    pub fn count_matching(&mut self, query: &IndexQuery<C::Value>) -> Result<u64> {
        self.as_read().count_matching(query)
    }

    /// Keys of values matching every term of `query`, best match first
    pub fn search(&mut self, fts: &FullTextSearch<C::Value>, query: &str) -> Result<Vec<String>> {
        self.as_read().search(fts, query)
    }

    /// Destination keys `source_key` points to through `relationship`
    pub fn destination_keys(
        &mut self,
        index: &RelationshipIndex<C::Value>,
        relationship: &str,
        source_key: &str,
    ) -> Result<Vec<String>> {
        self.as_read()
            .destination_keys(index, relationship, source_key)
    }

    /// Keys pointing to `destination_key` through `relationship`
    pub fn source_keys(
        &mut self,
        index: &RelationshipIndex<C::Value>,
        relationship: &str,
        destination_key: &str,
    ) -> Result<Vec<String>> {
        self.as_read()
            .source_keys(index, relationship, destination_key)
    }
}
