mod common;

use bson::{Bson, doc};
use common::*;
use sift_db::FindOptions;
use sift_query::PipelineMode;

#[tokio::test]
async fn free_text_reaches_joined_fields() {
    let persons = smart_query("persons");
    let cases = [
        ("michael", 2),
        ("narvaez", 2),
        ("Yugcha", 2),
        ("ñandú", 1),
        ("carlos narv", 1),
        ("{)(&^%$][{}'.,;`~|/^", 0),
        ("*Yugcha", 0),
    ];
    for (query, expected) in cases {
        let docs = persons
            .find(&request(&[("$q", query)]), &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(docs.len(), expected, "$q={query}");
    }
}

#[tokio::test]
async fn free_text_joins_the_or_fields() {
    let persons = smart_query("persons");
    let docs = persons
        .find(
            &request(&[("$q", "Yugcha"), ("name", "{$or}Luis Ñandú")]),
            &FindOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(docs.len(), 3);
}

#[tokio::test]
async fn free_text_with_lookup() {
    let persons = smart_query("persons");
    let docs = persons
        .find(
            &request(&[("$q", "narvaez"), ("$fields", "name bestFriend { name }")]),
            &FindOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(names(&docs), vec!["Marta Narvaez", "Carlos Narvaez"]);
    let friend = docs[1].get_document("bestFriend").unwrap();
    assert_eq!(friend.get_str("name").unwrap(), "Michael Yugcha");
}

#[tokio::test]
async fn normalized_search() {
    let persons = smart_query("persons");
    let docs = persons
        .find(&request(&[("$search", "NARV aez")]), &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(names(&docs), vec!["Marta Narvaez", "Carlos Narvaez"]);

    let docs = persons
        .find(&request(&[("$search", "Luis, Ñandú")]), &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(names(&docs), vec!["Luis Ñandú"]);
}

#[tokio::test]
async fn regex_fallback_without_text_index() {
    let users = smart_query("users");
    let docs = users
        .find(&request(&[("$q", "Mich")]), &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(docs.len(), 2);
    assert!(!docs[0].contains_key("score"));
}

#[tokio::test]
async fn text_index_search() {
    let posts = smart_query("posts");
    let docs = posts
        .find(&request(&[("$q", "indexing")]), &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].get_str("title").unwrap(), "MongoDB Indexing");
    assert!(docs[0].contains_key("score"));
}

#[tokio::test]
async fn text_search_sorts_by_relevance() {
    let posts = smart_query("posts");
    posts.store().insert_many(
        "posts",
        vec![
            doc! { "title": "MongoDB", "content": "Just MongoDB" },
            doc! { "title": "MongoDB Text", "content": "Text Search in MongoDB is useful" },
        ],
    );
    let docs = posts
        .find(&request(&[("$q", "MongoDB")]), &FindOptions::default())
        .await
        .unwrap();
    assert!(docs.len() > 1);

    let scores: Vec<f64> = docs.iter().filter_map(|d| d.get_f64("score").ok()).collect();
    assert_eq!(scores.len(), docs.len());
    assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));
}

#[tokio::test]
async fn text_search_pages() {
    let posts = smart_query("posts");
    let page = posts
        .find_page(&request(&[("$q", "indexing")]), &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(page.pagination.total, 1);
    assert_eq!(page.data[0].get_str("title").unwrap(), "MongoDB Indexing");
    assert!(page.data[0].contains_key("score"));
}

#[tokio::test]
async fn pipeline_uses_native_text_search() {
    let posts = smart_query("posts");
    let pipeline = posts
        .pipeline(&request(&[("$q", "search")]), PipelineMode::Find, &FindOptions::default())
        .await
        .unwrap();
    let filter = pipeline[0].get_document("$match").unwrap();
    assert!(filter.contains_key("$text"));
}

#[tokio::test]
async fn pipeline_puts_the_filter_before_pre_stages() {
    let users = smart_query("users");
    let options = FindOptions {
        pre_pipeline: vec![doc! { "$addFields": { "testField": 1 } }],
    };
    let pipeline = users
        .pipeline(&request(&[("$q", "Mich")]), PipelineMode::Find, &options)
        .await
        .unwrap();
    let filter = pipeline[0].get_document("$match").unwrap();
    assert!(!filter.contains_key("$text"));
    assert!(filter.contains_key("$or"));
    assert_eq!(
        pipeline[1].get_document("$addFields").unwrap().get("testField"),
        Some(&Bson::Int32(1))
    );
}

#[tokio::test]
async fn pipeline_resolves_foreign_filters() {
    let persons = smart_query("persons");
    let pipeline = persons
        .pipeline(
            &request(&[("bestFriend.name", "Michael Yugcha")]),
            PipelineMode::Count,
            &FindOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        pipeline,
        vec![
            doc! { "$match": { "bestFriend": { "$in": [oid(MICHAEL)] } } },
            doc! { "$count": "total" },
        ]
    );
}
