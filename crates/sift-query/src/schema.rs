use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::options::QueryOptions;

/// Declared scalar type of a field, used to coerce request strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    ObjectId,
    Date,
    Number,
    Boolean,
    String,
    Document,
    Mixed,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::ObjectId => "object id",
            FieldType::Date => "date",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::String => "string",
            FieldType::Document => "document",
            FieldType::Mixed => "mixed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMetadata {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Name of the collection this field's ids point into.
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// The field holds an array of `field_type` values.
    #[serde(default)]
    pub array: bool,
}

impl FieldMetadata {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            reference: None,
            array: false,
        }
    }

    pub fn reference(collection: impl Into<String>) -> Self {
        Self {
            field_type: FieldType::ObjectId,
            reference: Some(collection.into()),
            array: false,
        }
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn is_reference(&self) -> bool {
        self.reference.is_some()
    }
}

static ID_FIELD: FieldMetadata = FieldMetadata {
    field_type: FieldType::ObjectId,
    reference: None,
    array: false,
};

/// A dotted path split at a reference field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferencePath<'a> {
    /// Local path of the reference field, e.g. `amigo.bestFriend`.
    pub field: &'a str,
    /// Collection the reference points into.
    pub collection: &'a str,
    /// Remaining path inside the foreign document, if any.
    pub rest: Option<&'a str>,
    pub many: bool,
}

/// Schema and query configuration of one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default)]
    pub fields: HashMap<String, FieldMetadata>,
    /// Text-indexed paths. Non-empty means the collection has a full-text index.
    #[serde(default)]
    pub text_index: Vec<String>,
    #[serde(default)]
    pub options: QueryOptions,
}

impl CollectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, path: impl Into<String>, metadata: FieldMetadata) -> Self {
        self.fields.insert(path.into(), metadata);
        self
    }

    pub fn with_text_index<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.text_index = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// Metadata for an exact path. `_id` is always known.
    pub fn metadata(&self, path: &str) -> Option<&FieldMetadata> {
        match self.fields.get(path) {
            Some(meta) => Some(meta),
            None if path == "_id" => Some(&ID_FIELD),
            None => None,
        }
    }

    pub fn has_text_index(&self) -> bool {
        !self.text_index.is_empty()
    }

    /// Find the shortest prefix of `path` that is a reference field.
    ///
    /// `bestFriend.name` with `bestFriend` referencing `persons` yields
    /// `field = "bestFriend", rest = Some("name")`.
    pub fn reference_path<'a>(&'a self, path: &'a str) -> Option<ReferencePath<'a>> {
        let mut end = 0;
        loop {
            end = match path[end..].find('.') {
                Some(offset) => end + offset,
                None => path.len(),
            };
            let prefix = &path[..end];
            if let Some(meta) = self.fields.get(prefix)
                && let Some(collection) = meta.reference.as_deref()
            {
                let rest = path.get(end + 1..).filter(|r| !r.is_empty());
                return Some(ReferencePath {
                    field: prefix,
                    collection,
                    rest,
                    many: meta.array,
                });
            }
            if end == path.len() {
                return None;
            }
            end += 1;
        }
    }

    /// Whether a path belongs to this collection: declared, or nested under a
    /// declared non-reference field.
    pub fn recognizes(&self, path: &str) -> bool {
        if self.metadata(path).is_some() {
            return true;
        }
        let mut prefix = path;
        while let Some((head, _)) = prefix.rsplit_once('.') {
            if let Some(meta) = self.fields.get(head) {
                return !meta.is_reference();
            }
            prefix = head;
        }
        false
    }
}

/// Every collection the compiler may touch, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    collections: HashMap<String, CollectionConfig>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, QueryError> {
        serde_json::from_str(json).map_err(|e| QueryError::InvalidConfig(e.to_string()))
    }

    pub fn with_collection(mut self, name: impl Into<String>, config: CollectionConfig) -> Self {
        self.insert(name, config);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, config: CollectionConfig) {
        self.collections.insert(name.into(), config);
    }

    pub fn get(&self, name: &str) -> Option<&CollectionConfig> {
        self.collections.get(name)
    }

    pub fn collection(&self, name: &str) -> Result<&CollectionConfig, QueryError> {
        self.get(name)
            .ok_or_else(|| QueryError::UnknownCollection(name.to_string()))
    }

    pub fn has_text_index(&self, name: &str) -> bool {
        self.get(name).is_some_and(CollectionConfig::has_text_index)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persons() -> CollectionConfig {
        CollectionConfig::new()
            .with_field("name", FieldMetadata::new(FieldType::String))
            .with_field("bestFriend", FieldMetadata::reference("persons"))
            .with_field("amigo", FieldMetadata::new(FieldType::Document))
            .with_field("amigo.bestFriend", FieldMetadata::reference("persons"))
            .with_field("friends", FieldMetadata::reference("persons").array())
    }

    #[test]
    fn id_is_always_known() {
        let config = persons();
        let meta = config.metadata("_id").unwrap();
        assert_eq!(meta.field_type, FieldType::ObjectId);
        assert!(!meta.is_reference());
    }

    #[test]
    fn reference_path_top_level() {
        let config = persons();
        let path = config.reference_path("bestFriend.name").unwrap();
        assert_eq!(path.field, "bestFriend");
        assert_eq!(path.collection, "persons");
        assert_eq!(path.rest, Some("name"));
        assert!(!path.many);
    }

    #[test]
    fn reference_path_nested_field() {
        let config = persons();
        let path = config.reference_path("amigo.bestFriend.name").unwrap();
        assert_eq!(path.field, "amigo.bestFriend");
        assert_eq!(path.rest, Some("name"));
    }

    #[test]
    fn reference_path_exact() {
        let config = persons();
        let path = config.reference_path("friends").unwrap();
        assert_eq!(path.rest, None);
        assert!(path.many);
    }

    #[test]
    fn reference_path_none_for_plain_fields() {
        let config = persons();
        assert!(config.reference_path("name").is_none());
        assert!(config.reference_path("name.first").is_none());
        assert!(config.reference_path("unknown").is_none());
    }

    #[test]
    fn recognizes_nested_paths_under_documents() {
        let config = persons();
        assert!(config.recognizes("name"));
        assert!(config.recognizes("amigo.city"));
        assert!(!config.recognizes("bestFriend.name"));
        assert!(!config.recognizes("zzz"));
    }

    #[test]
    fn catalog_from_json() {
        let catalog = Catalog::from_json(
            r#"{
                "persons": {
                    "fields": {
                        "name": { "type": "string" },
                        "bestFriend": { "type": "object_id", "ref": "persons" }
                    },
                    "options": { "protected_fields": "password", "default_limit": 5 }
                }
            }"#,
        )
        .unwrap();
        let persons = catalog.collection("persons").unwrap();
        assert!(persons.metadata("bestFriend").unwrap().is_reference());
        assert_eq!(persons.options.default_limit, 5);
        assert_eq!(persons.options.protected_fields.as_deref(), Some("password"));
        assert_eq!(persons.options.page_key, "$page");
        assert!(!catalog.has_text_index("persons"));
    }

    #[test]
    fn catalog_unknown_collection() {
        let err = Catalog::new().collection("nope").unwrap_err();
        assert_eq!(err, QueryError::UnknownCollection("nope".into()));
    }
}
