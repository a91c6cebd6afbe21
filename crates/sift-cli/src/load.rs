use std::path::Path;

use bson::{Bson, Document};
use serde_json::Value;
use sift_db::MemoryStore;
use sift_query::{Catalog, CollectionConfig, FieldType, coerce};
use tracing::{debug, warn};

use crate::Error;

pub fn read_json(path: &Path) -> Result<Value, Error> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| Error::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Build a store from `{ "<collection>": [ {...}, ... ] }`.
///
/// Documents may use extended JSON (`{"$oid": ...}`). Plain strings in
/// fields the catalog declares as ids or dates are converted as well.
pub fn store(catalog: &Catalog, data: Value) -> Result<MemoryStore, Error> {
    let Value::Object(collections) = data else {
        return Err(Error::Data("data file must be an object of collections".into()));
    };

    let store = MemoryStore::for_catalog(catalog);
    for (name, docs) in collections {
        let Value::Array(docs) = docs else {
            return Err(Error::Data(format!("collection {name:?} must be an array")));
        };
        let config = catalog.get(&name);
        if config.is_none() {
            warn!(collection = %name, "collection missing from catalog, loading as-is");
        }

        let mut loaded = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut doc = match Bson::try_from(doc) {
                Ok(Bson::Document(doc)) => doc,
                Ok(other) => {
                    return Err(Error::Data(format!(
                        "collection {name:?} holds a non-document value {other}"
                    )));
                }
                Err(e) => return Err(Error::Data(format!("collection {name:?}: {e}"))),
            };
            if let Some(config) = config {
                convert_declared(&mut doc, config);
            }
            loaded.push(doc);
        }
        debug!(collection = %name, docs = loaded.len(), "loaded collection");
        store.insert_many(&name, loaded);
    }
    Ok(store)
}

fn convert_declared(doc: &mut Document, config: &CollectionConfig) {
    for (path, metadata) in &config.fields {
        if matches!(metadata.field_type, FieldType::ObjectId | FieldType::Date) {
            convert_at(doc, path, metadata.field_type);
        }
    }
    convert_at(doc, "_id", FieldType::ObjectId);
}

fn convert_at(doc: &mut Document, path: &str, field_type: FieldType) {
    match path.split_once('.') {
        Some((head, rest)) => match doc.get_mut(head) {
            Some(Bson::Document(inner)) => convert_at(inner, rest, field_type),
            Some(Bson::Array(items)) => {
                for item in items {
                    if let Bson::Document(inner) = item {
                        convert_at(inner, rest, field_type);
                    }
                }
            }
            _ => {}
        },
        None => match doc.get_mut(path) {
            Some(Bson::Array(items)) => {
                for item in items {
                    convert_value(item, field_type);
                }
            }
            Some(value) => convert_value(value, field_type),
            None => {}
        },
    }
}

fn convert_value(value: &mut Bson, field_type: FieldType) {
    if let Bson::String(raw) = value
        && let Ok(converted) = coerce(raw, field_type)
    {
        *value = converted;
    }
}
