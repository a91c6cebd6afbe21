#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bson::oid::ObjectId;
use bson::{Bson, DateTime, Document, doc};
use sift_db::{MemoryStore, SmartQuery, Store, StoreError};
use sift_query::{Catalog, CollectionConfig, FieldMetadata, FieldType, QueryOptions, Request};

pub const MICHAEL: &str = "5cef28d32e950227cb5bfaa6";
pub const CARLOS: &str = "5cef28d32e950227cb5bfaa7";
pub const LUIS: &str = "5cef28d32e950227cb5bfaa8";
pub const MARTA: &str = "5d0ceed6d0daeb2019a142f8";

pub fn oid(hex: &str) -> Bson {
    Bson::ObjectId(ObjectId::parse_str(hex).unwrap())
}

fn date(rfc3339: &str) -> Bson {
    Bson::DateTime(DateTime::parse_rfc3339_str(rfc3339).unwrap())
}

pub fn catalog() -> Catalog {
    let persons = CollectionConfig::new()
        .with_field("name", FieldMetadata::new(FieldType::String))
        .with_field("random", FieldMetadata::new(FieldType::Number))
        .with_field("birthday", FieldMetadata::new(FieldType::Date))
        .with_field("colours", FieldMetadata::new(FieldType::String).array())
        .with_field("password", FieldMetadata::new(FieldType::String))
        .with_field("useLinux", FieldMetadata::new(FieldType::Boolean))
        .with_field("bestFriend", FieldMetadata::reference("persons"))
        .with_field("amigo", FieldMetadata::new(FieldType::Document))
        .with_field("amigo.bestFriend", FieldMetadata::reference("persons"))
        .with_field("searchString", FieldMetadata::new(FieldType::String))
        .with_options(QueryOptions {
            default_fields: Some("name".into()),
            protected_fields: Some("password".into()),
            fields_for_default_query: Some("name bestFriend.name".into()),
            fields_for_default_search: vec!["searchString".into()],
            ..QueryOptions::default()
        });

    let users = CollectionConfig::new()
        .with_field("name", FieldMetadata::new(FieldType::String))
        .with_field("email", FieldMetadata::new(FieldType::String))
        .with_options(QueryOptions {
            fields_for_default_query: Some("name email".into()),
            ..QueryOptions::default()
        });

    let posts = CollectionConfig::new()
        .with_field("title", FieldMetadata::new(FieldType::String))
        .with_field("content", FieldMetadata::new(FieldType::String))
        .with_field("tags", FieldMetadata::new(FieldType::String).array())
        .with_text_index(["title", "content"])
        .with_options(QueryOptions {
            fields_for_default_query: Some("title content".into()),
            default_fields: Some("title content score".into()),
            ..QueryOptions::default()
        });

    Catalog::new()
        .with_collection("persons", persons)
        .with_collection("users", users)
        .with_collection("posts", posts)
}

fn persons() -> Vec<Document> {
    vec![
        doc! {
            "_id": oid(MICHAEL),
            "name": "Michael Yugcha",
            "random": 25,
            "birthday": date("1993-09-27T05:00:00.000Z"),
            "colours": ["blue", "red", "black"],
            "password": "12345",
            "useLinux": true,
            "amigo": { "bestFriend": oid(CARLOS) },
            "searchString": "michaelyugcha",
        },
        doc! {
            "_id": oid(CARLOS),
            "name": "Carlos Narvaez",
            "random": 18,
            "birthday": date("1995-01-12T05:00:00.000Z"),
            "colours": ["yellow", "red"],
            "password": "12345",
            "useLinux": false,
            "bestFriend": oid(MICHAEL),
            "searchString": "carlosnarvaez",
        },
        doc! {
            "_id": oid(LUIS),
            "name": "Luis Ñandú",
            "random": 1,
            "birthday": date("1984-04-07T05:00:00.000Z"),
            "colours": ["pink", "white"],
            "password": "12345",
            "searchString": "luisñandú",
        },
        doc! {
            "_id": oid(MARTA),
            "name": "Marta Narvaez",
            "random": 9,
            "birthday": date("1993-04-01T05:00:00.000Z"),
            "colours": ["pink", "black"],
            "password": "12345",
            "searchString": "martanarvaez",
        },
    ]
}

/// A store seeded with every fixture collection.
pub fn seeded(catalog: &Catalog) -> MemoryStore {
    let store = MemoryStore::for_catalog(catalog);
    store.insert_many("persons", persons());
    store.insert_many(
        "users",
        vec![
            doc! { "name": "Michael", "email": "michael@example.com" },
            doc! { "name": "Michelle", "email": "michelle@example.com" },
            doc! { "name": "John", "email": "john@example.com" },
        ],
    );
    store.insert_many(
        "posts",
        vec![
            doc! { "title": "MongoDB Indexing", "content": "Text indexes are great for search." },
            doc! { "title": "Mongoose Plugins", "content": "Plugins extend functionality." },
            doc! { "title": "Search Engines", "content": "Elasticsearch is powerful." },
        ],
    );
    store
}

pub fn smart_query(collection: &str) -> SmartQuery<Arc<MemoryStore>> {
    let catalog = catalog();
    let store = Arc::new(seeded(&catalog));
    SmartQuery::new(Arc::new(catalog), collection, store).unwrap()
}

pub fn request(pairs: &[(&str, &str)]) -> Request {
    pairs.iter().copied().collect()
}

pub fn names(docs: &[Document]) -> Vec<&str> {
    docs.iter().filter_map(|d| d.get_str("name").ok()).collect()
}

pub fn sorted_keys(doc: &Document) -> Vec<&str> {
    let mut keys: Vec<&str> = doc.keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}

/// Counts every pipeline sent to the wrapped store.
pub struct CountingStore {
    pub inner: MemoryStore,
    pub calls: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Store for CountingStore {
    async fn execute_pipeline(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute_pipeline(collection, pipeline).await
    }
}
