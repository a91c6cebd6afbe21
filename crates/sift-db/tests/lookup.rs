mod common;

use std::sync::Arc;

use bson::Document;
use common::*;
use sift_db::{FindOptions, SmartQuery};

fn by_name<'a>(docs: &'a [Document], name: &str) -> &'a Document {
    docs.iter()
        .find(|d| d.get_str("name").ok() == Some(name))
        .unwrap()
}

#[tokio::test]
async fn joins_requested_sub_fields() {
    let persons = smart_query("persons");
    for fields in ["name bestFriend { name random }", "name bestFriend{name random}"] {
        let docs = persons
            .find(&request(&[("$fields", fields)]), &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(docs.len(), 4);

        let carlos = &docs[2];
        assert_eq!(carlos.get_str("name").unwrap(), "Carlos Narvaez");
        assert_eq!(sorted_keys(carlos), vec!["_id", "bestFriend", "name"]);
        let friend = carlos.get_document("bestFriend").unwrap();
        assert_eq!(sorted_keys(friend), vec!["_id", "name", "random"]);
        assert_eq!(friend.get_str("name").unwrap(), "Michael Yugcha");

        assert!(!by_name(&docs, "Marta Narvaez").contains_key("bestFriend"));
    }
}

#[tokio::test]
async fn dotted_selection_joins_too() {
    let persons = smart_query("persons");
    let docs = persons
        .find(
            &request(&[("$fields", "name bestFriend.name")]),
            &FindOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(docs.len(), 4);
    let friend = docs[2].get_document("bestFriend").unwrap();
    assert_eq!(friend.get_str("name").unwrap(), "Michael Yugcha");
    assert!(!friend.contains_key("random"));
}

#[tokio::test]
async fn joined_protected_fields_are_stripped() {
    let persons = smart_query("persons");
    let docs = persons
        .find(
            &request(&[("$fields", "name bestFriend { name password }")]),
            &FindOptions::default(),
        )
        .await
        .unwrap();
    let friend = by_name(&docs, "Carlos Narvaez")
        .get_document("bestFriend")
        .unwrap();
    assert_eq!(sorted_keys(friend), vec!["_id", "name"]);
}

#[tokio::test]
async fn nested_reference_fields() {
    let persons = smart_query("persons");
    let docs = persons
        .find(
            &request(&[("$fields", "name amigo.bestFriend { name }")]),
            &FindOptions::default(),
        )
        .await
        .unwrap();
    let friend = by_name(&docs, "Michael Yugcha")
        .get_document("amigo")
        .and_then(|amigo| amigo.get_document("bestFriend"))
        .unwrap();
    assert_eq!(friend.get_str("name").unwrap(), "Carlos Narvaez");
}

#[tokio::test]
async fn filters_on_joined_fields() {
    let persons = smart_query("persons");
    let docs = persons
        .find(
            &request(&[
                ("bestFriend.random", "25"),
                ("$fields", "name random bestFriend { name random }"),
            ]),
            &FindOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    let carlos = &docs[0];
    assert_eq!(sorted_keys(carlos), vec!["_id", "bestFriend", "name", "random"]);
    assert_eq!(carlos.get_i32("random").unwrap(), 18);
    let friend = carlos.get_document("bestFriend").unwrap();
    assert_eq!(friend.get_str("name").unwrap(), "Michael Yugcha");
    assert_eq!(friend.get_i32("random").unwrap(), 25);

    let docs = persons
        .find(
            &request(&[("bestFriend.name", "{$includes}yugcha")]),
            &FindOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(names(&docs), vec!["Carlos Narvaez"]);

    let docs = persons
        .find(&request(&[("bestFriend.name", "Nobody")]), &FindOptions::default())
        .await
        .unwrap();
    assert!(docs.is_empty());
}

#[tokio::test]
async fn sorts_on_joined_fields_after_merging() {
    let persons = smart_query("persons");
    let docs = persons
        .find(
            &request(&[
                ("$fields", "name bestFriend { name }"),
                ("$sort", "-bestFriend.name"),
            ]),
            &FindOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(docs.len(), 4);
    assert_eq!(docs[0].get_str("name").unwrap(), "Carlos Narvaez");
}

#[tokio::test]
async fn unwinding_a_joined_path_is_ignored() {
    let persons = smart_query("persons");
    let docs = persons
        .find(
            &request(&[
                ("$fields", "bestFriend { name colours }"),
                ("$unwind", "bestFriend.colours"),
            ]),
            &FindOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(docs.len(), 4);
}

#[tokio::test]
async fn empty_id_sets_issue_no_query() {
    let catalog = catalog();
    let store = Arc::new(CountingStore::new(seeded(&catalog)));
    let persons = SmartQuery::new(Arc::new(catalog), "persons", store.clone()).unwrap();
    let fields = ("$fields", "name bestFriend { name }");

    let docs = persons
        .find(&request(&[("name", "Luis Ñandú"), fields]), &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(store.calls(), 1);

    let docs = persons
        .find(&request(&[("name", "Carlos Narvaez"), fields]), &FindOptions::default())
        .await
        .unwrap();
    assert!(docs[0].contains_key("bestFriend"));
    assert_eq!(store.calls(), 3);
}

#[tokio::test]
async fn protected_sub_fields_join_only_the_id() {
    let persons = smart_query("persons");
    let docs = persons
        .find(
            &request(&[("$fields", "name bestFriend { password }"), ("_id", CARLOS)]),
            &FindOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    let friend = docs[0].get_document("bestFriend").unwrap();
    assert_eq!(sorted_keys(friend), vec!["_id"]);
    assert_eq!(friend.get("_id"), Some(&oid(MICHAEL)));
}
