//! Full-text search extension
//!
//! Two tables per index:
//! - `_fts_<collection>`: one document row per primary key with the term
//!   frequencies of all declared text properties
//! - `_fts_<collection>_terms`: one posting row per term mapping primary
//!   keys to the term's frequency in them
//!
//! An update first retracts the key's previous postings, then adds the new
//! ones, so postings always mirror the current document rows.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use turf_core::codec::{from_msgpack, to_msgpack};
use turf_core::{
    Error, Extension, ExtensionConnection, ExtensionWriteTransaction, Result, RowId, SnapshotView,
    WriteBatch,
};

use super::table_name;
use super::tokenizer::{term_frequencies, tokenize_unique};

type TextProducer<V> = Box<dyn Fn(&V) -> String + Send + Sync>;

/// A text-producing property of `V`
pub struct FtsProperty<V> {
    name: String,
    text: TextProducer<V>,
}

impl<V> FtsProperty<V> {
    /// Declare property `name` whose searchable text is produced by `text`
    pub fn new<F>(name: &str, text: F) -> Self
    where
        F: Fn(&V) -> String + Send + Sync + 'static,
    {
        FtsProperty {
            name: name.to_string(),
            text: Box::new(text),
        }
    }

    /// Property name
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FtsDocument {
    row_id: i64,
    terms: BTreeMap<String, u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Posting {
    keys: BTreeMap<String, u32>,
}

struct FtsInner<V> {
    name: String,
    collection: String,
    documents: String,
    postings: String,
    properties: Vec<FtsProperty<V>>,
}

impl<V> FtsInner<V> {
    fn document_for(&self, value: &V, row_id: RowId) -> FtsDocument {
        let mut terms = BTreeMap::new();
        for property in &self.properties {
            for (term, tf) in term_frequencies(&(property.text)(value)) {
                *terms.entry(term).or_insert(0) += tf;
            }
        }
        FtsDocument {
            row_id: row_id.as_i64(),
            terms,
        }
    }

    fn posting(&self, view: &dyn SnapshotView, term: &str) -> Result<Option<Posting>> {
        match view.get(&self.postings, term)? {
            Some(row) => Ok(Some(from_msgpack(&row.data)?)),
            None => Ok(None),
        }
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

/// Token index over declared text properties of a collection's values
pub struct FullTextSearch<V> {
    inner: Arc<FtsInner<V>>,
}

impl<V: Send + Sync + 'static> FullTextSearch<V> {
    /// Index `properties` of `collection`, named `fts_<collection>`
    pub fn new(collection: &str, properties: Vec<FtsProperty<V>>) -> Self {
        Self::named(&format!("fts_{}", collection), collection, properties)
    }

    /// Index with an explicit extension name
    pub fn named(name: &str, collection: &str, properties: Vec<FtsProperty<V>>) -> Self {
        FullTextSearch {
            inner: Arc::new(FtsInner {
                name: name.to_string(),
                collection: collection.to_string(),
                documents: table_name(name, None),
                postings: table_name(name, Some("terms")),
                properties,
            }),
        }
    }

    /// Collection this index is declared on
    pub fn collection(&self) -> &str {
        &self.inner.collection
    }

    /// Keys whose documents contain every term of `query`
    ///
    /// Ranked by summed term frequency, highest first, then by key. A query
    /// with no searchable terms matches nothing.
    pub fn search(&self, view: &dyn SnapshotView, query: &str) -> Result<Vec<String>> {
        let terms = tokenize_unique(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scores: Option<BTreeMap<String, u64>> = None;
        for term in &terms {
            let posting = match self.inner.posting(view, term)? {
                Some(p) => p,
                None => return Ok(Vec::new()),
            };
            scores = Some(match scores {
                None => posting
                    .keys
                    .into_iter()
                    .map(|(k, tf)| (k, tf as u64))
                    .collect(),
                Some(acc) => acc
                    .into_iter()
                    .filter_map(|(k, score)| posting.keys.get(&k).map(|tf| (k, score + *tf as u64)))
                    .collect(),
            });
        }

        let mut ranked: Vec<(String, u64)> = scores.unwrap_or_default().into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(ranked.into_iter().map(|(k, _)| k).collect())
    }

    /// Number of keys matching `query`
    pub fn count(&self, view: &dyn SnapshotView, query: &str) -> Result<u64> {
        Ok(self.search(view, query)?.len() as u64)
    }
}

impl<V: Send + Sync + 'static> Extension<V> for FullTextSearch<V> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn new_connection(&self) -> Box<dyn ExtensionConnection<V>> {
        Box::new(FtsConnection {
            inner: Arc::clone(&self.inner),
        })
    }
}

struct FtsConnection<V> {
    inner: Arc<FtsInner<V>>,
}

impl<V: Send + Sync + 'static> ExtensionConnection<V> for FtsConnection<V> {
    fn write_transaction<'a>(
        &'a mut self,
        batch: &'a mut dyn WriteBatch,
    ) -> Box<dyn ExtensionWriteTransaction<V> + 'a> {
        Box::new(FtsWriteTransaction {
            inner: &self.inner,
            batch,
        })
    }
}

struct FtsWriteTransaction<'a, V> {
    inner: &'a FtsInner<V>,
    batch: &'a mut dyn WriteBatch,
}

impl<V> FtsWriteTransaction<'_, V> {
    fn retract(&mut self, key: &str) -> Result<()> {
        let previous: FtsDocument = match self.batch.get(&self.inner.documents, key)? {
            Some(row) => from_msgpack(&row.data)?,
            None => return Ok(()),
        };
        for term in previous.terms.keys() {
            if let Some(mut posting) = self.inner.posting(self.batch.as_view(), term)? {
                posting.keys.remove(key);
                if posting.keys.is_empty() {
                    self.batch.delete(&self.inner.postings, term)?;
                } else {
                    self.batch
                        .upsert(&self.inner.postings, term, to_msgpack(&posting)?)?;
                }
            }
        }
        self.batch.delete(&self.inner.documents, key)?;
        Ok(())
    }

    fn index(&mut self, value: &V, key: &str, row_id: RowId, collection: &str) -> Result<()> {
        self.inner.check_collection(collection)?;
        self.retract(key)?;
        let document = self.inner.document_for(value, row_id);
        for (term, tf) in &document.terms {
            let mut posting = self
                .inner
                .posting(self.batch.as_view(), term)?
                .unwrap_or_default();
            posting.keys.insert(key.to_string(), *tf);
            self.batch
                .upsert(&self.inner.postings, term, to_msgpack(&posting)?)?;
        }
        self.batch
            .upsert(&self.inner.documents, key, to_msgpack(&document)?)?;
        Ok(())
    }
}

impl<V> ExtensionWriteTransaction<V> for FtsWriteTransaction<'_, V> {
    fn handle_value_insertion(
        &mut self,
        value: &V,
        key: &str,
        row_id: RowId,
        collection: &str,
    ) -> Result<()> {
        self.index(value, key, row_id, collection)
    }

    fn handle_value_update(
        &mut self,
        value: &V,
        key: &str,
        row_id: RowId,
        collection: &str,
    ) -> Result<()> {
        self.index(value, key, row_id, collection)
    }

    fn handle_removal_of_keys(&mut self, keys: &[String], collection: &str) -> Result<()> {
        self.inner.check_collection(collection)?;
        for key in keys {
            self.retract(key)?;
        }
        Ok(())
    }

    fn handle_removal_of_all(&mut self, collection: &str) -> Result<()> {
        self.inner.check_collection(collection)?;
        self.batch.delete_all(&self.inner.documents)?;
        self.batch.delete_all(&self.inner.postings)?;
        Ok(())
    }
}
