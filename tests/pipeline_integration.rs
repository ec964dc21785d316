//! Integration tests for filter, update and pipeline builders.
//!
//! The builder tests check the documents the builders produce; the
//! aggregation tests run pipelines against the in-process store.

use docwrap::mongodb::bson::{self, Bson, doc};
use docwrap::prelude::*;
use docwrap::query::expression::{array, logic, math, string};
use docwrap::query::expression::{field, literal};
use pretty_assertions::assert_eq;
use serde_json::json;

async fn run(query: &CollectionQuery) -> Vec<bson::Document> {
    let mut docs = query.document_iterator().await.unwrap();
    let mut out = Vec::new();
    while docs.advance().await.unwrap() {
        out.push(docs.data().unwrap());
    }
    docs.close().await.unwrap();
    out
}

async fn seeded_people() -> Collection {
    let db = Client::in_memory().database("app");
    let people = db.collection("people");
    for (name, age, team) in [("ada", 36, "core"), ("bob", 25, "web"), ("cy", 52, "core")] {
        people
            .add(&json!({ "name": name, "age": age, "team": team, "tags": ["a", "b"] }))
            .await
            .unwrap();
    }
    let teams = db.collection("teams");
    teams
        .add(&json!({ "key": "core", "floor": 3 }))
        .await
        .unwrap();
    people
}

#[test]
fn test_logical_operands_keep_order() {
    let built = filter::or([
        filter::equal("b", 2),
        filter::equal("a", 1),
        filter::not(filter::exists("c", true)),
    ]);
    let operands = built.as_document().get("$or").and_then(Value::as_array).unwrap();
    let first_keys: Vec<&str> = operands
        .iter()
        .map(|op| op.as_document().unwrap().keys().next().unwrap().as_str())
        .collect();
    assert_eq!(first_keys, vec!["b", "a", "$nor"]);
}

#[test]
fn test_pipeline_branching() {
    let base = Pipeline::matching(filter::equal("team", "core"));
    let sorted = base.sort([("age", SortDirection::Descending)]);
    let paged = sorted.skip(10).limit(5);

    assert_eq!(base.len(), 1);
    assert_eq!(sorted.len(), 2);
    assert_eq!(paged.len(), 4);
    assert_eq!(
        paged.to_documents().iter().map(|d| d.keys().next().unwrap().clone()).collect::<Vec<_>>(),
        vec!["$match", "$sort", "$skip", "$limit"]
    );
}

#[test]
fn test_update_merge_combines_operators() {
    let merged = Update::merge([
        update::set("name", "ada"),
        update::increment("visits", 1),
        update::set("team", "core"),
    ])
    .unwrap();
    let set = merged.as_document().get("$set").and_then(Value::as_document).unwrap();
    assert_eq!(set.len(), 2);
    assert!(merged.as_document().contains_key("$inc"));
}

#[tokio::test]
async fn test_match_sort_skip_limit() {
    let people = seeded_people().await;
    let query = people
        .all()
        .sort([("age", SortDirection::Ascending)])
        .skip(1)
        .limit(1);
    let out = run(&query).await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].get_str("name").unwrap(), "ada");
}

#[tokio::test]
async fn test_and_where_narrows() {
    let people = seeded_people().await;
    let core = people.where_(filter::equal("team", "core"));
    let older = core.and_where(filter::greater_than("age", 40));
    assert_eq!(run(&core).await.len(), 2);
    let out = run(&older).await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].get_str("name").unwrap(), "cy");
}

#[tokio::test]
async fn test_modify_with_computed_fields() {
    let people = seeded_people().await;
    let query = people
        .where_(filter::equal("name", "bob"))
        .modify(document! {
            "_id" => expression::EXCLUDE,
            "shout" => string::to_upper(field("name")),
            "label" => string::concat([Value::from(field("name")), Value::from("@"), Value::from(field("team"))]),
            "senior" => logic::cond(logic::gte(field("age"), 50), "yes", "no"),
            "tagCount" => array::size(field("tags")),
        });
    let out = run(&query).await;
    assert_eq!(
        out,
        vec![doc! {
            "shout": "BOB",
            "label": "bob@web",
            "senior": "no",
            "tagCount": 2,
        }]
    );
}

#[tokio::test]
async fn test_add_fields_keeps_existing() {
    let people = seeded_people().await;
    let query = people
        .where_(filter::equal("name", "ada"))
        .add_fields(document! {
            "nextAge" => math::add([Value::from(field("age")), Value::from(1)]),
            "constant" => literal("$not-a-path"),
        });
    let out = run(&query).await;
    assert_eq!(out[0].get_str("name").unwrap(), "ada");
    assert!(matches!(
        out[0].get("nextAge"),
        Some(Bson::Int32(37)) | Some(Bson::Int64(37))
    ));
    assert_eq!(out[0].get_str("constant").unwrap(), "$not-a-path");
}

#[tokio::test]
async fn test_join_is_left_outer() {
    let people = seeded_people().await;
    let query = people
        .all()
        .join("teams", "team", "key", "teamInfo")
        .sort([("name", SortDirection::Ascending)]);
    let out = run(&query).await;
    assert_eq!(out.len(), 3);

    let joined: Vec<usize> = out
        .iter()
        .map(|d| d.get_array("teamInfo").unwrap().len())
        .collect();
    assert_eq!(joined, vec![1, 0, 1]);
}

#[tokio::test]
async fn test_count_and_sample() {
    let people = seeded_people().await;
    let counted = run(&people.where_(filter::equal("team", "core")).count("members")).await;
    assert_eq!(counted, vec![doc! { "members": 2 }]);

    let empty = run(&people.where_(filter::equal("team", "nobody")).count("members")).await;
    assert!(empty.is_empty());

    let sampled = run(&people.all().sample(2)).await;
    assert_eq!(sampled.len(), 2);
}

#[tokio::test]
async fn test_invalid_stage_fails_at_run() {
    let people = seeded_people().await;
    let err = people.all().limit(0).document_iterator().await.unwrap_err();
    assert!(!err.is_usage());
}
