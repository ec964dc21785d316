//! Aggregation stages over in-memory documents.

use std::cmp::Ordering;

use bson::{Bson, Document};
use rand::seq::SliceRandom;

use super::compare::{as_i64, compare, get_path, remove_path, set_path, values_at, values_equal};
use super::expr::evaluate;
use super::matcher::Matcher;
use crate::error::{MongoError, MongoResult};

/// Inputs a pipeline needs besides the documents it transforms.
pub struct StageContext<'a> {
    /// Text-indexed fields of the source collection.
    pub text_fields: Option<&'a [String]>,
    /// Documents of another collection in the same database, for `$lookup`.
    pub foreign: &'a dyn Fn(&str) -> Vec<Document>,
}

/// Run `pipeline` over `documents`.
pub fn run(
    mut documents: Vec<Document>,
    pipeline: &[Document],
    ctx: &StageContext<'_>,
) -> MongoResult<Vec<Document>> {
    for stage in pipeline {
        let (name, spec) = match stage.iter().next() {
            Some(entry) if stage.len() == 1 => entry,
            _ => {
                return Err(MongoError::operation(
                    "a pipeline stage specification object must contain exactly one field",
                ));
            }
        };
        documents = match name.as_str() {
            "$match" => match_stage(documents, spec, ctx)?,
            "$sort" => sort_stage(documents, spec)?,
            "$skip" => {
                let n = count_arg("$skip", spec)?;
                documents.into_iter().skip(n).collect()
            }
            "$limit" => {
                let n = count_arg("$limit", spec)?;
                if n == 0 {
                    return Err(MongoError::operation("the limit must be positive"));
                }
                documents.truncate(n);
                documents
            }
            "$project" => project_stage(documents, spec)?,
            "$addFields" | "$set" => add_fields_stage(documents, spec)?,
            "$unset" => unset_stage(documents, spec)?,
            "$lookup" => lookup_stage(documents, spec, ctx)?,
            "$count" => count_stage(documents, spec)?,
            "$sample" => sample_stage(documents, spec)?,
            other => {
                return Err(MongoError::operation(format!(
                    "unrecognized pipeline stage name: '{}'",
                    other
                )));
            }
        };
    }
    Ok(documents)
}

fn stage_document<'b>(name: &str, spec: &'b Bson) -> MongoResult<&'b Document> {
    spec.as_document().ok_or_else(|| {
        MongoError::operation(format!("the {} stage specification must be an object", name))
    })
}

fn count_arg(name: &str, spec: &Bson) -> MongoResult<usize> {
    as_i64(spec)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| {
            MongoError::operation(format!("{} requires a non-negative integer", name))
        })
}

fn match_stage(
    documents: Vec<Document>,
    spec: &Bson,
    ctx: &StageContext<'_>,
) -> MongoResult<Vec<Document>> {
    let filter = stage_document("$match", spec)?;
    let matcher = Matcher::new(ctx.text_fields);
    let mut out = Vec::with_capacity(documents.len());
    for doc in documents {
        if matcher.matches(&doc, filter)? {
            out.push(doc);
        }
    }
    Ok(out)
}

fn sort_stage(mut documents: Vec<Document>, spec: &Bson) -> MongoResult<Vec<Document>> {
    let spec = stage_document("$sort", spec)?;
    if spec.is_empty() {
        return Err(MongoError::operation("$sort stage must have at least one sort key"));
    }
    let mut keys = Vec::with_capacity(spec.len());
    for (field, direction) in spec {
        let descending = match as_i64(direction) {
            Some(1) => false,
            Some(-1) => true,
            _ => {
                return Err(MongoError::operation(format!(
                    "$sort key ordering for '{}' must be 1 or -1",
                    field
                )));
            }
        };
        keys.push((field.as_str(), descending));
    }

    documents.sort_by(|a, b| {
        for (field, descending) in &keys {
            let ord = compare(&sort_key(a, field, *descending), &sort_key(b, field, *descending));
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(documents)
}

/// An array sorts by its smallest element ascending and its largest descending.
fn sort_key(doc: &Document, field: &str, descending: bool) -> Bson {
    let values = values_at(doc, field);
    let mut candidates: Vec<&Bson> = Vec::new();
    for value in values {
        match value {
            Bson::Array(items) if !items.is_empty() => candidates.extend(items.iter()),
            other => candidates.push(other),
        }
    }
    let pick = if descending {
        candidates.into_iter().max_by(|a, b| compare(a, b))
    } else {
        candidates.into_iter().min_by(|a, b| compare(a, b))
    };
    pick.cloned().unwrap_or(Bson::Null)
}

fn is_flag(value: &Bson) -> Option<bool> {
    match value {
        Bson::Boolean(b) => Some(*b),
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => as_i64(value).map(|n| n != 0),
        _ => None,
    }
}

/// Flatten nested projection objects into dotted paths.
fn flatten_projection(prefix: &str, spec: &Document, out: &mut Vec<(String, Bson)>) {
    for (key, value) in spec {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Bson::Document(inner)
                if !inner.is_empty() && !inner.keys().any(|k| k.starts_with('$')) =>
            {
                flatten_projection(&path, inner, out)
            }
            other => out.push((path, other.clone())),
        }
    }
}

fn project_stage(documents: Vec<Document>, spec: &Bson) -> MongoResult<Vec<Document>> {
    let spec = stage_document("$project", spec)?;
    if spec.is_empty() {
        return Err(MongoError::operation("$project requires at least one output field"));
    }
    let mut fields = Vec::new();
    flatten_projection("", spec, &mut fields);

    let mut include_id = true;
    let mut excluded = Vec::new();
    let mut included = Vec::new();
    for (path, value) in fields {
        match is_flag(&value) {
            Some(flag) if path == "_id" => include_id = flag,
            Some(false) => excluded.push(path),
            Some(true) => included.push((path, None)),
            None => included.push((path, Some(value))),
        }
    }
    if !excluded.is_empty() && !included.is_empty() {
        return Err(MongoError::operation(
            "cannot mix inclusion and exclusion in a $project stage",
        ));
    }

    let exclusion = included.is_empty();
    documents
        .into_iter()
        .map(|doc| {
            if exclusion {
                let mut out = doc;
                for path in &excluded {
                    remove_path(&mut out, path);
                }
                if !include_id {
                    out.remove("_id");
                }
                return Ok(out);
            }

            let mut out = Document::new();
            if include_id {
                if let Some(id) = doc.get("_id") {
                    out.insert("_id", id.clone());
                }
            }
            for (path, computed) in &included {
                let value = match computed {
                    Some(expr) => evaluate(expr, &doc)?,
                    None => get_path(&doc, path).cloned().unwrap_or(Bson::Undefined),
                };
                if !matches!(value, Bson::Undefined) {
                    set_path(&mut out, path, value).map_err(MongoError::operation)?;
                }
            }
            Ok(out)
        })
        .collect()
}

fn add_fields_stage(documents: Vec<Document>, spec: &Bson) -> MongoResult<Vec<Document>> {
    let spec = stage_document("$addFields", spec)?;
    documents
        .into_iter()
        .map(|doc| {
            let mut computed = Vec::with_capacity(spec.len());
            for (path, expr) in spec {
                computed.push((path, evaluate(expr, &doc)?));
            }
            let mut out = doc;
            for (path, value) in computed {
                if matches!(value, Bson::Undefined) {
                    remove_path(&mut out, path);
                } else {
                    set_path(&mut out, path, value).map_err(MongoError::operation)?;
                }
            }
            Ok(out)
        })
        .collect()
}

fn unset_stage(documents: Vec<Document>, spec: &Bson) -> MongoResult<Vec<Document>> {
    let paths: Vec<&str> = match spec {
        Bson::String(path) => vec![path.as_str()],
        Bson::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().ok_or_else(|| {
                    MongoError::operation("$unset specification must be a string or array of strings")
                })
            })
            .collect::<MongoResult<_>>()?,
        _ => {
            return Err(MongoError::operation(
                "$unset specification must be a string or array of strings",
            ));
        }
    };
    Ok(documents
        .into_iter()
        .map(|mut doc| {
            for path in &paths {
                remove_path(&mut doc, path);
            }
            doc
        })
        .collect())
}

fn lookup_stage(
    documents: Vec<Document>,
    spec: &Bson,
    ctx: &StageContext<'_>,
) -> MongoResult<Vec<Document>> {
    let spec = stage_document("$lookup", spec)?;
    let field = |key: &str| {
        spec.get_str(key).map_err(|_| {
            MongoError::operation(format!("$lookup requires a string '{}' field", key))
        })
    };
    let (from, local_field, foreign_field, as_field) = (
        field("from")?,
        field("localField")?,
        field("foreignField")?,
        field("as")?,
    );
    let foreign = (ctx.foreign)(from);

    documents
        .into_iter()
        .map(|mut doc| {
            let keys = lookup_keys(&doc, local_field);
            let joined: Vec<Bson> = foreign
                .iter()
                .filter(|candidate| {
                    let candidate_keys = lookup_keys(candidate, foreign_field);
                    keys.iter()
                        .any(|k| candidate_keys.iter().any(|c| values_equal(k, c)))
                })
                .cloned()
                .map(Bson::Document)
                .collect();
            set_path(&mut doc, as_field, Bson::Array(joined)).map_err(MongoError::operation)?;
            Ok(doc)
        })
        .collect()
}

/// Values a document joins on; a missing field joins as null.
fn lookup_keys(doc: &Document, path: &str) -> Vec<Bson> {
    let values = values_at(doc, path);
    if values.is_empty() {
        return vec![Bson::Null];
    }
    let mut keys = Vec::new();
    for value in values {
        match value {
            Bson::Array(items) => keys.extend(items.iter().cloned()),
            other => keys.push(other.clone()),
        }
    }
    keys
}

fn count_stage(documents: Vec<Document>, spec: &Bson) -> MongoResult<Vec<Document>> {
    let name = spec
        .as_str()
        .ok_or_else(|| MongoError::operation("the count field must be a non-empty string"))?;
    if name.is_empty() || name.starts_with('$') || name.contains('.') {
        return Err(MongoError::operation(
            "the count field must be a non-empty string without '$' or '.'",
        ));
    }
    if documents.is_empty() {
        return Ok(Vec::new());
    }
    let count = documents.len() as i64;
    let value = i32::try_from(count).map(Bson::Int32).unwrap_or(Bson::Int64(count));
    let mut out = Document::new();
    out.insert(name, value);
    Ok(vec![out])
}

fn sample_stage(mut documents: Vec<Document>, spec: &Bson) -> MongoResult<Vec<Document>> {
    let spec = stage_document("$sample", spec)?;
    let size = spec
        .get("size")
        .ok_or_else(|| MongoError::operation("$sample stage must specify a size"))
        .and_then(|size| count_arg("$sample", size))?;
    documents.shuffle(&mut rand::thread_rng());
    documents.truncate(size);
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    fn no_foreign(_: &str) -> Vec<Document> {
        Vec::new()
    }

    fn people() -> Vec<Document> {
        vec![
            doc! { "_id": 1, "name": "ann", "age": 31, "team": "a" },
            doc! { "_id": 2, "name": "bob", "age": 25, "team": "b" },
            doc! { "_id": 3, "name": "cat", "age": 40, "team": "a" },
        ]
    }

    fn run_plain(pipeline: Vec<Document>) -> MongoResult<Vec<Document>> {
        let ctx = StageContext {
            text_fields: None,
            foreign: &no_foreign,
        };
        run(people(), &pipeline, &ctx)
    }

    #[test]
    fn test_match_sort_skip_limit() {
        let out = run_plain(vec![
            doc! { "$match": { "team": "a" } },
            doc! { "$sort": { "age": -1 } },
            doc! { "$limit": 1 },
        ])
        .unwrap();
        assert_eq!(out, vec![doc! { "_id": 3, "name": "cat", "age": 40, "team": "a" }]);

        let out = run_plain(vec![doc! { "$sort": { "age": 1 } }, doc! { "$skip": 2 }]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get_str("name").unwrap(), "cat");
    }

    #[test]
    fn test_project_inclusion_and_exclusion() {
        let out = run_plain(vec![
            doc! { "$match": { "_id": 2 } },
            doc! { "$project": { "name": 1, "_id": 0, "older": { "$add": ["$age", 1] } } },
        ])
        .unwrap();
        assert_eq!(out, vec![doc! { "name": "bob", "older": 26 }]);

        let out = run_plain(vec![
            doc! { "$match": { "_id": 2 } },
            doc! { "$project": { "age": 0, "team": 0 } },
        ])
        .unwrap();
        assert_eq!(out, vec![doc! { "_id": 2, "name": "bob" }]);

        assert!(run_plain(vec![doc! { "$project": { "age": 0, "name": 1 } }]).is_err());
    }

    #[test]
    fn test_add_fields_and_count() {
        let out = run_plain(vec![
            doc! { "$addFields": { "senior": { "$gte": ["$age", 30] } } },
            doc! { "$match": { "senior": true } },
            doc! { "$count": "seniors" },
        ])
        .unwrap();
        assert_eq!(out, vec![doc! { "seniors": 2 }]);

        let none = run_plain(vec![
            doc! { "$match": { "age": { "$gt": 100 } } },
            doc! { "$count": "n" },
        ])
        .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_lookup_left_outer() {
        let teams = |name: &str| {
            if name == "teams" {
                vec![doc! { "_id": "a", "title": "Alpha" }]
            } else {
                Vec::new()
            }
        };
        let ctx = StageContext {
            text_fields: None,
            foreign: &teams,
        };
        let out = run(
            people(),
            &[doc! { "$lookup": { "from": "teams", "localField": "team", "foreignField": "_id", "as": "joined" } }],
            &ctx,
        )
        .unwrap();
        assert_eq!(
            out[0].get_array("joined").unwrap(),
            &vec![Bson::Document(doc! { "_id": "a", "title": "Alpha" })]
        );
        assert_eq!(out[1].get_array("joined").unwrap(), &Vec::<Bson>::new());
    }

    #[test]
    fn test_sample_size() {
        let out = run_plain(vec![doc! { "$sample": { "size": 2 } }]).unwrap();
        assert_eq!(out.len(), 2);
        let out = run_plain(vec![doc! { "$sample": { "size": 10 } }]).unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_unknown_stage_and_zero_limit() {
        assert!(run_plain(vec![doc! { "$bucket": {} }]).is_err());
        assert!(run_plain(vec![doc! { "$limit": 0 }]).is_err());
    }
}
