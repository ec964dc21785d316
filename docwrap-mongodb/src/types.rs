//! Type conversions between builder values and BSON.

use bson::oid::ObjectId;
use bson::spec::BinarySubtype;
use bson::{Binary, Bson};
use chrono::{TimeZone, Utc};
use docwrap_query::{Document, DocumentId, Filter, Pipeline, Update, Value};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::MongoResult;

/// Convert a builder value to BSON.
///
/// Integers that fit in 32 bits are written as `int`, larger ones as `long`.
pub fn value_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Int(i) => match i32::try_from(*i) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(*i),
        },
        Value::Float(f) => Bson::Double(*f),
        Value::String(s) => Bson::String(s.clone()),
        Value::Bytes(bytes) => Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: bytes.clone(),
        }),
        Value::Timestamp(dt) => Bson::DateTime(bson::DateTime::from_chrono(*dt)),
        Value::ObjectId(id) => Bson::ObjectId(object_id(*id)),
        Value::Document(doc) => Bson::Document(document_to_bson(doc)),
        Value::Array(items) => Bson::Array(items.iter().map(value_to_bson).collect()),
        Value::Expression(expr) => value_to_bson(expr.as_value()),
    }
}

/// Convert BSON to a builder value.
///
/// Types without a builder counterpart keep their textual form.
pub fn bson_to_value(value: &Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::Int(i64::from(*i)),
        Bson::Int64(i) => Value::Int(*i),
        Bson::Double(f) => Value::Float(*f),
        Bson::String(s) | Bson::Symbol(s) | Bson::JavaScriptCode(s) => Value::String(s.clone()),
        Bson::Binary(binary) => Value::Bytes(binary.bytes.clone()),
        Bson::DateTime(dt) => Value::Timestamp(dt.to_chrono()),
        Bson::Timestamp(ts) => Utc
            .timestamp_opt(i64::from(ts.time), 0)
            .single()
            .map(Value::Timestamp)
            .unwrap_or(Value::Null),
        Bson::ObjectId(oid) => Value::ObjectId(document_id(*oid)),
        Bson::Document(doc) => Value::Document(bson_to_document(doc)),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_value).collect()),
        other => Value::String(other.to_string()),
    }
}

/// Convert a builder document to a BSON document.
pub fn document_to_bson(doc: &Document) -> bson::Document {
    doc.iter()
        .map(|(key, value)| (key.clone(), value_to_bson(value)))
        .collect()
}

/// Convert a BSON document to a builder document.
pub fn bson_to_document(doc: &bson::Document) -> Document {
    doc.iter()
        .map(|(key, value)| (key.clone(), bson_to_value(value)))
        .collect()
}

/// Convert a filter to its BSON query document.
pub fn filter_to_bson(filter: &Filter) -> bson::Document {
    document_to_bson(filter.as_document())
}

/// Convert an update to its BSON update document.
pub fn update_to_bson(update: &Update) -> bson::Document {
    document_to_bson(update.as_document())
}

/// Convert a pipeline to the stage documents sent with `aggregate`.
pub fn pipeline_to_bson(pipeline: &Pipeline) -> Vec<bson::Document> {
    pipeline
        .to_documents()
        .iter()
        .map(document_to_bson)
        .collect()
}

/// Serialize caller data into a BSON document.
pub fn to_bson_document<T: Serialize + ?Sized>(data: &T) -> MongoResult<bson::Document> {
    Ok(bson::to_document(data)?)
}

/// Deserialize a BSON document into caller data.
pub fn from_bson_document<T: DeserializeOwned>(doc: bson::Document) -> MongoResult<T> {
    Ok(bson::from_document(doc)?)
}

/// Convert an identifier to the driver's type.
pub fn object_id(id: DocumentId) -> ObjectId {
    ObjectId::from_bytes(id.bytes())
}

/// Convert a driver identifier to the builder type.
pub fn document_id(oid: ObjectId) -> DocumentId {
    DocumentId::from_bytes(oid.bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docwrap_query::{document, filter};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_integer_width() {
        assert_eq!(value_to_bson(&Value::Int(5)), Bson::Int32(5));
        assert_eq!(
            value_to_bson(&Value::Int(i64::from(i32::MAX) + 1)),
            Bson::Int64(i64::from(i32::MAX) + 1)
        );
    }

    #[test]
    fn test_filter_to_bson_keeps_order() {
        let f = filter::and([filter::equal("b", 1), filter::equal("a", "x")]);
        assert_eq!(
            filter_to_bson(&f),
            doc! { "$and": [ { "b": { "$eq": 1 } }, { "a": { "$eq": "x" } } ] }
        );
    }

    #[test]
    fn test_object_id_conversion() {
        let oid = ObjectId::new();
        let id = document_id(oid);
        assert_eq!(object_id(id), oid);
        assert_eq!(id.to_hex(), oid.to_hex());
    }

    #[test]
    fn test_expressions_are_flattened() {
        let doc = document! {
            "total" => docwrap_query::expression::math::add([
                docwrap_query::expression::field("a"),
                docwrap_query::expression::field("b"),
            ])
        };
        assert_eq!(
            document_to_bson(&doc),
            doc! { "total": { "$add": ["$a", "$b"] } }
        );
    }

    #[test]
    fn test_bson_to_value() {
        let value = bson_to_value(&Bson::Document(doc! { "n": 3_i64, "tags": ["x"] }));
        let doc = value.as_document().unwrap();
        assert_eq!(doc.get("n"), Some(&Value::Int(3)));
        assert_eq!(
            doc.get("tags"),
            Some(&Value::Array(vec![Value::from("x")]))
        );
    }
}
