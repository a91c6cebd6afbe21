use thiserror::Error;

use crate::schema::FieldType;

/// Fatal compile errors. Everything else degrades to "field absent".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("malformed projection {input:?}: {reason}")]
    MalformedProjection { input: String, reason: String },

    #[error("malformed sort {input:?}: {reason}")]
    MalformedSort { input: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),
}

impl QueryError {
    pub(crate) fn projection(input: &str, reason: impl Into<String>) -> Self {
        QueryError::MalformedProjection {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn sort(input: &str, reason: impl Into<String>) -> Self {
        QueryError::MalformedSort {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// A value that could not be converted to its field's declared type.
///
/// Never fatal: the filter compiler logs it and keeps the raw string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot coerce {value:?} to {expected}")]
pub struct CoercionError {
    pub value: String,
    pub expected: FieldType,
}
