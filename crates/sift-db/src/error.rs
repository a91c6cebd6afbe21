use sift_query::QueryError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Backend(String),
    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
