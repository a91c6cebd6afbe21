//! An in-process document store that evaluates aggregation pipelines.

mod filter;
mod stages;

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use bson::oid::ObjectId;
use bson::{Bson, Document};
use sift_query::Catalog;
use tracing::trace;

use crate::error::StoreError;
use crate::store::Store;
use stages::Row;

#[derive(Debug, Default)]
struct MemoryCollection {
    docs: Vec<Document>,
    text_index: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty store with every catalog collection created and its text
    /// index declared.
    pub fn for_catalog(catalog: &Catalog) -> Self {
        let store = Self::new();
        for name in catalog.names() {
            let text_index = catalog
                .get(name)
                .map(|config| config.text_index.clone())
                .unwrap_or_default();
            store.set_text_index(name, text_index);
        }
        store
    }

    /// Declare the text-indexed paths of a collection, creating it if needed.
    pub fn set_text_index(&self, collection: &str, paths: Vec<String>) {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        collections.entry(collection.to_string()).or_default().text_index = paths;
    }

    /// Append documents, assigning an `ObjectId` to any without an `_id`.
    /// Returns the ids in insertion order.
    pub fn insert_many(
        &self,
        collection: &str,
        docs: impl IntoIterator<Item = Document>,
    ) -> Vec<Bson> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let target = collections.entry(collection.to_string()).or_default();
        let mut ids = Vec::new();
        for mut doc in docs {
            if !doc.contains_key("_id") {
                let mut with_id = Document::new();
                with_id.insert("_id", ObjectId::new());
                for (key, value) in doc {
                    with_id.insert(key, value);
                }
                doc = with_id;
            }
            if let Some(id) = doc.get("_id") {
                ids.push(id.clone());
            }
            target.docs.push(doc);
        }
        trace!(collection, inserted = ids.len(), "inserted documents");
        ids
    }

    pub fn len(&self, collection: &str) -> usize {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections.get(collection).map_or(0, |c| c.docs.len())
    }

    fn snapshot(&self, collection: &str) -> Result<(Vec<Row>, Vec<String>), StoreError> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        let target = collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        let rows = target.docs.iter().cloned().map(Row::new).collect();
        Ok((rows, target.text_index.clone()))
    }
}

impl Store for MemoryStore {
    async fn execute_pipeline(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, StoreError> {
        let (rows, text_index) = self.snapshot(collection)?;
        let rows = stages::run(rows, &pipeline, &text_index)?;
        Ok(rows.into_iter().map(|row| row.doc).collect())
    }
}
