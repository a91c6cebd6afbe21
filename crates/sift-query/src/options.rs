use serde::{Deserialize, Serialize};

/// How `find_page` obtains the total alongside the data batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationStrategy {
    /// One round trip: a `$facet` stage computes the count and the page.
    #[default]
    Facet,
    /// Separate count and skip/limit pipelines.
    Legacy,
}

/// Per-collection compiler configuration.
///
/// Every field has a default, so a config file only names what it changes.
/// `default_fields: null` means "no projection unless the request asks".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Projection DSL naming fields that never leave the store.
    pub protected_fields: Option<String>,
    pub default_fields: Option<String>,
    pub default_sort: Option<String>,
    pub default_limit: u64,
    /// Whitespace-separated paths searched by the regex fallback of `$q`.
    pub fields_for_default_query: Option<String>,
    /// Paths holding pre-normalized text for `$search`.
    pub fields_for_default_search: Vec<String>,
    pub pagination: PaginationStrategy,

    pub page_key: String,
    pub limit_key: String,
    pub fields_key: String,
    pub sort_key: String,
    pub query_key: String,
    pub search_key: String,
    pub unwind_key: String,
    pub all_fields_key: String,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            protected_fields: None,
            default_fields: Some("_id".into()),
            default_sort: Some("-_id".into()),
            default_limit: 20,
            fields_for_default_query: None,
            fields_for_default_search: Vec::new(),
            pagination: PaginationStrategy::Facet,
            page_key: "$page".into(),
            limit_key: "$limit".into(),
            fields_key: "$fields".into(),
            sort_key: "$sort".into(),
            query_key: "$q".into(),
            search_key: "$search".into(),
            unwind_key: "$unwind".into(),
            all_fields_key: "$getAllFields".into(),
        }
    }
}

impl QueryOptions {
    /// Whether `key` is one of the request keys consumed by the compiler
    /// rather than treated as a filter field.
    pub fn is_reserved(&self, key: &str) -> bool {
        [
            &self.page_key,
            &self.limit_key,
            &self.fields_key,
            &self.sort_key,
            &self.query_key,
            &self.search_key,
            &self.unwind_key,
            &self.all_fields_key,
        ]
        .iter()
        .any(|reserved| reserved.as_str() == key)
    }

    pub fn default_query_fields(&self) -> Vec<&str> {
        self.fields_for_default_query
            .as_deref()
            .map(|fields| fields.split_whitespace().collect())
            .unwrap_or_default()
    }
}
