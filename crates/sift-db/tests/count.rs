mod common;

use common::*;
use sift_db::FindOptions;

#[tokio::test]
async fn counts() {
    let persons = smart_query("persons");
    let cases = [
        (vec![], 4),
        (vec![("egg", "easter")], 4),
        (vec![("name", "Geovanny")], 0),
        (vec![("$unwind", "colours")], 9),
        (vec![("$limit", "1"), ("$page", "3")], 4),
        (vec![("bestFriend.name", "Michael Yugcha")], 1),
    ];
    for (pairs, expected) in cases {
        let total = persons
            .count(&request(&pairs), &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(total, expected, "{pairs:?}");
    }
}

#[tokio::test]
async fn count_sees_the_pre_pipeline() {
    let persons = smart_query("persons");
    let options = FindOptions {
        pre_pipeline: vec![bson::doc! { "$unwind": "$colours" }],
    };
    let total = persons
        .count(&request(&[("colours", "pink")]), &options)
        .await
        .unwrap();
    assert_eq!(total, 4);
}
