use std::future::Future;
use std::sync::Arc;

use bson::{Bson, Document, doc};

use crate::error::StoreError;

/// The document store a compiled query runs against.
///
/// Implementations only ever receive reads.
pub trait Store: Send + Sync {
    /// Run an aggregation pipeline over `collection`.
    fn execute_pipeline(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> impl Future<Output = Result<Vec<Document>, StoreError>> + Send;

    /// Fetch documents by id, optionally narrowed by `filter`.
    ///
    /// `ids: None` queries by `filter` alone. An empty `projection` returns
    /// whole documents.
    fn find_by_ids(
        &self,
        collection: &str,
        ids: Option<&[Bson]>,
        projection: &Document,
        filter: Option<&Document>,
    ) -> impl Future<Output = Result<Vec<Document>, StoreError>> + Send {
        let by_id = ids.map(|ids| doc! { "_id": { "$in": ids.to_vec() } });
        let matcher = match (by_id, filter) {
            (Some(by_id), Some(filter)) => doc! { "$and": [by_id, filter.clone()] },
            (Some(by_id), None) => by_id,
            (None, Some(filter)) => filter.clone(),
            (None, None) => Document::new(),
        };

        let mut pipeline = vec![doc! { "$match": matcher }];
        if !projection.is_empty() {
            pipeline.push(doc! { "$project": projection.clone() });
        }
        self.execute_pipeline(collection, pipeline)
    }
}

impl<S: Store> Store for Arc<S> {
    fn execute_pipeline(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> impl Future<Output = Result<Vec<Document>, StoreError>> + Send {
        (**self).execute_pipeline(collection, pipeline)
    }

    fn find_by_ids(
        &self,
        collection: &str,
        ids: Option<&[Bson]>,
        projection: &Document,
        filter: Option<&Document>,
    ) -> impl Future<Output = Result<Vec<Document>, StoreError>> + Send {
        (**self).find_by_ids(collection, ids, projection, filter)
    }
}
