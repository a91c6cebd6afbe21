use bson::{Bson, Document, doc};
use tracing::debug;

use crate::error::QueryError;
use crate::schema::CollectionConfig;

/// Name of the relevance field added by a full-text search.
pub const SCORE_FIELD: &str = "score";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
    /// Descending full-text relevance.
    TextScore,
}

impl SortDirection {
    pub fn to_bson(self) -> Bson {
        match self {
            SortDirection::Asc => Bson::Int32(1),
            SortDirection::Desc => Bson::Int32(-1),
            SortDirection::TextScore => Bson::Document(doc! { "$meta": "textScore" }),
        }
    }
}

/// Parse `-birthday name +random` into ordered sort keys.
///
/// A later duplicate overwrites the direction of the earlier one but keeps
/// its position.
pub fn parse_sort(input: &str) -> Result<Vec<(String, SortDirection)>, QueryError> {
    let mut keys: Vec<(String, SortDirection)> = Vec::new();
    for token in input.split_whitespace() {
        let (path, direction) = match token.as_bytes()[0] {
            b'-' => (&token[1..], SortDirection::Desc),
            b'+' => (&token[1..], SortDirection::Asc),
            _ => (token, SortDirection::Asc),
        };
        validate_path(input, path)?;
        match keys.iter_mut().find(|(k, _)| k == path) {
            Some((_, existing)) => *existing = direction,
            None => keys.push((path.to_string(), direction)),
        }
    }
    Ok(keys)
}

fn validate_path(input: &str, path: &str) -> Result<(), QueryError> {
    if path.is_empty() {
        return Err(QueryError::sort(input, "missing field after direction"));
    }
    if let Some(c) = path
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, '_' | '.' | '$')))
    {
        return Err(QueryError::sort(input, format!("unexpected character {c:?}")));
    }
    if path.split('.').any(str::is_empty) {
        return Err(QueryError::sort(input, format!("empty segment in {path:?}")));
    }
    Ok(())
}

/// Sort keys split by where they can be applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec {
    /// Ordered by the pipeline.
    pub local: Vec<(String, SortDirection)>,
    /// Paths through a reference, ordered after lookups are merged.
    pub foreign: Vec<(String, SortDirection)>,
}

impl SortSpec {
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.foreign.is_empty()
    }

    /// The `$sort` document for the local keys.
    pub fn to_document(&self) -> Document {
        self.local
            .iter()
            .map(|(path, direction)| (path.clone(), direction.to_bson()))
            .collect()
    }
}

/// Resolve the effective sort for a request.
///
/// An explicit sort wins. Otherwise a text search orders by relevance and
/// everything else falls back to the configured default.
pub fn compile_sort(
    requested: Option<&str>,
    config: &CollectionConfig,
    text_search: bool,
) -> Result<SortSpec, QueryError> {
    let keys = match requested {
        Some(input) => parse_sort(input)?,
        None if text_search => vec![(SCORE_FIELD.to_string(), SortDirection::TextScore)],
        None => match config.options.default_sort.as_deref() {
            Some(default) => parse_sort(default)?,
            None => Vec::new(),
        },
    };

    let mut spec = SortSpec::default();
    for (path, direction) in keys {
        if text_search && path == SCORE_FIELD {
            spec.local.push((path, SortDirection::TextScore));
        } else if config.recognizes(&path) {
            spec.local.push((path, direction));
        } else if config.reference_path(&path).is_some_and(|r| r.rest.is_some()) {
            spec.foreign.push((path, direction));
        } else {
            debug!(field = %path, "ignoring sort on unknown field");
        }
    }
    Ok(spec)
}
