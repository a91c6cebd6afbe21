use std::sync::Arc;

use bson::{Bson, Document, doc};
use futures::future::try_join_all;
use futures::try_join;
use serde::Serialize;
use sift_query::{
    Catalog, CompiledQuery, Compiler, DATA_FIELD, PaginationStrategy, PipelineMode, Request,
    ResolvedIds, TOTAL_FIELD, to_documents,
};
use tracing::{debug, trace};

use crate::error::{DbError, StoreError};
use crate::lookup;
use crate::store::Store;
use crate::value::as_u64;

/// Extra knobs for one execution.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Stages inserted right after the filter stage.
    pub pre_pipeline: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pagination {
    pub total: u64,
    pub page: u64,
    pub pages: u64,
    pub limit: u64,
}

/// One page of results with its totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub data: Vec<Document>,
    pub pagination: Pagination,
}

impl Page {
    fn new(data: Vec<Document>, total: u64, query: &CompiledQuery) -> Self {
        Self {
            data,
            pagination: Pagination {
                total,
                page: query.page,
                pages: total.div_ceil(query.limit.max(1)),
                limit: query.limit,
            },
        }
    }
}

/// Runs requests against one collection of a store.
pub struct SmartQuery<S> {
    catalog: Arc<Catalog>,
    collection: String,
    store: S,
}

impl<S: Store> SmartQuery<S> {
    pub fn new(catalog: Arc<Catalog>, collection: &str, store: S) -> Result<Self, DbError> {
        catalog.collection(collection)?;
        Ok(Self {
            catalog,
            collection: collection.to_string(),
            store,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn compile(&self, request: &Request) -> Result<CompiledQuery, DbError> {
        Ok(Compiler::new(&self.catalog, &self.collection)?.compile(request)?)
    }

    /// The pipeline `find` would run, with foreign filters already resolved.
    pub async fn pipeline(
        &self,
        request: &Request,
        mode: PipelineMode,
        options: &FindOptions,
    ) -> Result<Vec<Document>, DbError> {
        let query = self.compile(request)?;
        let resolved = self.resolve_foreign(&query).await?;
        Ok(to_documents(&query.pipeline(mode, &resolved, &options.pre_pipeline)))
    }

    /// The requested page of documents, joined and ordered.
    pub async fn find(
        &self,
        request: &Request,
        options: &FindOptions,
    ) -> Result<Vec<Document>, DbError> {
        let query = self.compile(request)?;
        let resolved = self.resolve_foreign(&query).await?;
        let mut docs = self
            .run(&query, PipelineMode::Find, &resolved, options)
            .await?;
        self.finish(&query, &mut docs).await?;
        Ok(docs)
    }

    /// Number of matching documents, counting each unwound element.
    pub async fn count(&self, request: &Request, options: &FindOptions) -> Result<u64, DbError> {
        let query = self.compile(request)?;
        let resolved = self.resolve_foreign(&query).await?;
        let docs = self
            .run(&query, PipelineMode::Count, &resolved, options)
            .await?;
        Ok(read_total(docs.first()))
    }

    /// A page with its totals, using the collection's pagination strategy.
    pub async fn find_page(&self, request: &Request, options: &FindOptions) -> Result<Page, DbError> {
        let query = self.compile(request)?;
        let resolved = self.resolve_foreign(&query).await?;
        let strategy = self.catalog.collection(&self.collection)?.options.pagination;

        let (total, mut data) = match strategy {
            PaginationStrategy::Facet => {
                let mut docs = self
                    .run(&query, PipelineMode::Page, &resolved, options)
                    .await?;
                let facet = docs.pop().unwrap_or_default();
                read_facet(facet)?
            }
            PaginationStrategy::Legacy => {
                let (counted, data) = try_join!(
                    self.run(&query, PipelineMode::Count, &resolved, options),
                    self.run(&query, PipelineMode::Find, &resolved, options),
                )?;
                (read_total(counted.first()), data)
            }
        };

        self.finish(&query, &mut data).await?;
        Ok(Page::new(data, total, &query))
    }

    /// Look up the ids matched by each foreign filter. These rewrite the
    /// main filter, so all of them complete before it runs.
    async fn resolve_foreign(&self, query: &CompiledQuery) -> Result<ResolvedIds, StoreError> {
        let foreign = query.foreign_filters();
        if foreign.is_empty() {
            return Ok(ResolvedIds::new());
        }

        let projection = doc! { "_id": 1 };
        let resolved = try_join_all(foreign.into_iter().map(|filter| {
            let projection = &projection;
            async move {
                let docs = self
                    .store
                    .find_by_ids(&filter.collection, None, projection, Some(&filter.filter))
                    .await?;
                let ids: Vec<Bson> = docs.into_iter().filter_map(|mut d| d.remove("_id")).collect();
                trace!(
                    collection = %filter.collection,
                    field = %filter.field,
                    ids = ids.len(),
                    "resolved foreign filter"
                );
                Ok::<_, StoreError>((filter.slot, ids))
            }
        }))
        .await?;
        Ok(resolved.into_iter().collect())
    }

    async fn run(
        &self,
        query: &CompiledQuery,
        mode: PipelineMode,
        resolved: &ResolvedIds,
        options: &FindOptions,
    ) -> Result<Vec<Document>, StoreError> {
        let pipeline = to_documents(&query.pipeline(mode, resolved, &options.pre_pipeline));
        debug!(collection = %query.collection, ?mode, ?pipeline, "executing pipeline");
        self.store.execute_pipeline(&query.collection, pipeline).await
    }

    /// Join lookups into the batch, then apply any ordering on joined fields.
    async fn finish(&self, query: &CompiledQuery, docs: &mut [Document]) -> Result<(), StoreError> {
        lookup::resolve(&self.store, &query.lookups, docs).await?;
        if !query.sort.foreign.is_empty() {
            lookup::sort_batch(docs, &query.sort.foreign);
        }
        Ok(())
    }
}

fn read_total(doc: Option<&Document>) -> u64 {
    doc.and_then(|d| d.get(TOTAL_FIELD))
        .and_then(as_u64)
        .unwrap_or(0)
}

/// Split a `{ total: [{ total }], data: [...] }` facet result.
fn read_facet(mut facet: Document) -> Result<(u64, Vec<Document>), StoreError> {
    let total = match facet.get(TOTAL_FIELD) {
        Some(Bson::Array(counts)) => match counts.first() {
            Some(Bson::Document(count)) => read_total(Some(count)),
            _ => 0,
        },
        None => 0,
        Some(other) => {
            return Err(StoreError::Backend(format!("unexpected facet total {other}")));
        }
    };
    let data = match facet.remove(DATA_FIELD) {
        Some(Bson::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Bson::Document(doc) => Ok(doc),
                other => Err(StoreError::Backend(format!("unexpected facet row {other}"))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
        Some(other) => {
            return Err(StoreError::Backend(format!("unexpected facet data {other}")));
        }
    };
    Ok((total, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facet_result() {
        let facet = doc! { "total": [{ "total": 4 }], "data": [{ "name": "a" }] };
        let (total, data) = read_facet(facet).unwrap();
        assert_eq!(total, 4);
        assert_eq!(data, vec![doc! { "name": "a" }]);

        let (total, data) = read_facet(doc! { "total": [], "data": [] }).unwrap();
        assert_eq!((total, data.len()), (0, 0));

        assert!(read_facet(doc! { "total": 1 }).is_err());
    }

    #[test]
    fn totals() {
        assert_eq!(read_total(Some(&doc! { "total": 9_i64 })), 9);
        assert_eq!(read_total(None), 0);
    }
}
