//! Filter constructors.
//!
//! Each leaf constructor binds one field to one operator and one operand;
//! the combinators wrap whole filters under a logical operator.
//!
//! ```rust
//! use docwrap_query::filter;
//!
//! let adults = filter::and([
//!     filter::greater_than_or_equal("age", 18),
//!     filter::exists("email", true),
//! ]);
//!
//! // { "$and": [ { "age": { "$gte": 18 } }, { "email": { "$exists": true } } ] }
//! assert_eq!(adults.as_document().len(), 1);
//! assert!(adults.as_document().contains_key("$and"));
//! ```

use crate::error::QueryResult;
use crate::id::DocumentId;
use crate::types::BsonType;
use crate::value::{Document, Value};

/// A structured predicate selecting documents.
///
/// The empty filter matches every document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter(Document);

impl Filter {
    /// Create an empty filter (matches all documents).
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing filter document.
    pub fn from_document(doc: Document) -> Self {
        Self(doc)
    }

    /// Get the filter document.
    pub fn as_document(&self) -> &Document {
        &self.0
    }

    /// Consume the filter, returning its document.
    pub fn into_document(self) -> Document {
        self.0
    }

    /// Check if the filter is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Filter> for Value {
    fn from(filter: Filter) -> Self {
        Value::Document(filter.0)
    }
}

fn field_op(field: &str, operator: &str, operand: Value) -> Filter {
    let mut doc = Document::with_capacity(1);
    doc.insert(field.to_string(), Value::single(operator, operand));
    Filter(doc)
}

fn logical(operator: &str, filters: impl IntoIterator<Item = Filter>) -> Filter {
    let operands = filters.into_iter().map(Value::from).collect::<Vec<_>>();
    let mut doc = Document::with_capacity(1);
    doc.insert(operator.to_string(), Value::Array(operands));
    Filter(doc)
}

fn values<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Value {
    Value::Array(items.into_iter().map(Into::into).collect())
}

/// Matches if the field value equals `value`.
pub fn equal(field: &str, value: impl Into<Value>) -> Filter {
    field_op(field, "$eq", value.into())
}

/// Matches if the field value does not equal `value`.
pub fn not_equal(field: &str, value: impl Into<Value>) -> Filter {
    field_op(field, "$ne", value.into())
}

/// Matches if the field value is greater than `value`.
pub fn greater_than(field: &str, value: impl Into<Value>) -> Filter {
    field_op(field, "$gt", value.into())
}

/// Matches if the field value is greater than or equal to `value`.
pub fn greater_than_or_equal(field: &str, value: impl Into<Value>) -> Filter {
    field_op(field, "$gte", value.into())
}

/// Matches if the field value is less than `value`.
pub fn less_than(field: &str, value: impl Into<Value>) -> Filter {
    field_op(field, "$lt", value.into())
}

/// Matches if the field value is less than or equal to `value`.
pub fn less_than_or_equal(field: &str, value: impl Into<Value>) -> Filter {
    field_op(field, "$lte", value.into())
}

/// Matches if the field (or any element of an array field) equals one of `candidates`.
pub fn array_contains<V: Into<Value>>(
    field: &str,
    candidates: impl IntoIterator<Item = V>,
) -> Filter {
    field_op(field, "$in", values(candidates))
}

/// Matches if the field (and every element of an array field) equals none of `candidates`.
pub fn array_not_contains<V: Into<Value>>(
    field: &str,
    candidates: impl IntoIterator<Item = V>,
) -> Filter {
    field_op(field, "$nin", values(candidates))
}

/// Matches if the field exists (or does not).
pub fn exists(field: &str, exists: bool) -> Filter {
    field_op(field, "$exists", Value::Bool(exists))
}

/// Matches if the field value has the given type.
pub fn is_type(field: &str, ty: BsonType) -> Filter {
    field_op(field, "$type", ty.into())
}

/// Matches if the field value matches the regular expression.
pub fn regex(field: &str, pattern: &str) -> Filter {
    field_op(field, "$regex", Value::from(pattern))
}

/// Matches documents whose text-indexed fields contain the search terms.
///
/// Requires a text index on the collection.
pub fn text_search(text: &str) -> Filter {
    let mut doc = Document::with_capacity(1);
    doc.insert("$text".to_string(), Value::single("$search", text));
    Filter(doc)
}

/// Matches if `field % divisor == remainder`.
pub fn modulo(field: &str, divisor: i64, remainder: i64) -> Filter {
    field_op(
        field,
        "$mod",
        Value::Array(vec![Value::Int(divisor), Value::Int(remainder)]),
    )
}

/// Matches if the JavaScript expression evaluates to true for the document.
///
/// Server-side JavaScript is slow and often disabled; prefer the operators above.
pub fn javascript_expression(expression: &str) -> Filter {
    let mut doc = Document::with_capacity(1);
    doc.insert("$where".to_string(), Value::from(expression));
    Filter(doc)
}

/// Matches if the array field contains all of `items`.
pub fn array_all<V: Into<Value>>(field: &str, items: impl IntoIterator<Item = V>) -> Filter {
    field_op(field, "$all", values(items))
}

/// Matches if at least one element of the array field satisfies all `filters`.
///
/// Several filters are joined with `$and` inside the element match.
pub fn array_single_match(field: &str, filters: impl IntoIterator<Item = Filter>) -> Filter {
    let mut filters: Vec<Filter> = filters.into_iter().collect();
    let condition = if filters.len() == 1 {
        filters.remove(0)
    } else {
        and(filters)
    };
    field_op(field, "$elemMatch", condition.into())
}

/// Matches if the array field has exactly `size` elements.
pub fn array_size(field: &str, size: i64) -> Filter {
    field_op(field, "$size", Value::Int(size))
}

/// Matches if all bits selected by `mask` are 0.
pub fn bits_all_clear(field: &str, mask: i64) -> Filter {
    field_op(field, "$bitsAllClear", Value::Int(mask))
}

/// Matches if all bits selected by `mask` are 1.
pub fn bits_all_set(field: &str, mask: i64) -> Filter {
    field_op(field, "$bitsAllSet", Value::Int(mask))
}

/// Matches if any bit selected by `mask` is 0.
pub fn bits_any_clear(field: &str, mask: i64) -> Filter {
    field_op(field, "$bitsAnyClear", Value::Int(mask))
}

/// Matches if any bit selected by `mask` is 1.
pub fn bits_any_set(field: &str, mask: i64) -> Filter {
    field_op(field, "$bitsAnySet", Value::Int(mask))
}

/// Matches the document with the given identifier.
pub fn id_equals(id: DocumentId) -> Filter {
    let mut doc = Document::with_capacity(1);
    doc.insert("_id".to_string(), Value::ObjectId(id));
    Filter(doc)
}

/// Matches the document with the given hexadecimal identifier.
///
/// Fails if `id` is not a well-formed identifier.
pub fn by_id(id: &str) -> QueryResult<Filter> {
    Ok(id_equals(DocumentId::parse_str(id)?))
}

/// Matches if all filters match. Operand order is kept as given.
pub fn and(filters: impl IntoIterator<Item = Filter>) -> Filter {
    logical("$and", filters)
}

/// Matches if any filter matches. Operand order is kept as given.
pub fn or(filters: impl IntoIterator<Item = Filter>) -> Filter {
    logical("$or", filters)
}

/// Matches if no filter matches.
pub fn nor(filters: impl IntoIterator<Item = Filter>) -> Filter {
    logical("$nor", filters)
}

/// Matches if `filter` does not match.
///
/// The store only accepts `$not` below a field, so a whole-filter negation is
/// written as a `$nor` with a single operand.
pub fn not(filter: Filter) -> Filter {
    logical("$nor", [filter])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_leaf_constructors() {
        assert_eq!(
            equal("email", "a@b.com").into_document(),
            document! { "email" => Value::single("$eq", "a@b.com") }
        );
        assert_eq!(
            greater_than("age", 18).into_document(),
            document! { "age" => Value::single("$gt", 18) }
        );
        assert_eq!(
            is_type("age", BsonType::Int).into_document(),
            document! { "age" => Value::single("$type", "int") }
        );
    }

    #[test]
    fn test_array_contains_takes_list() {
        let filter = array_contains("tags", ["red", "blue"]);
        assert_eq!(
            filter.into_document(),
            document! { "tags" => Value::single("$in", vec!["red", "blue"]) }
        );
    }

    #[test]
    fn test_modulo_operands() {
        let filter = modulo("n", 4, 1);
        let n = filter.as_document().get("n").unwrap().as_document().unwrap();
        assert_eq!(
            n.get("$mod"),
            Some(&Value::Array(vec![Value::Int(4), Value::Int(1)]))
        );
    }

    #[test]
    fn test_and_keeps_operand_order() {
        let a = equal("name", "red fish");
        let b = less_than("size", 3);

        let ab = and([a.clone(), b.clone()]);
        let ba = and([b.clone(), a.clone()]);
        assert_ne!(ab, ba);

        let operands = ab.as_document().get("$and").unwrap().as_array().unwrap();
        assert_eq!(operands[0], Value::from(a));
        assert_eq!(operands[1], Value::from(b));
    }

    #[test]
    fn test_not_is_single_nor() {
        let inner = equal("name", "x");
        let filter = not(inner.clone());
        assert_eq!(
            filter.into_document(),
            document! { "$nor" => vec![Value::from(inner)] }
        );
    }

    #[test]
    fn test_single_match_joins_with_and() {
        let one = array_single_match("scores", [greater_than("value", 5)]);
        let scores = one.as_document().get("scores").unwrap().as_document().unwrap();
        let cond = scores.get("$elemMatch").unwrap().as_document().unwrap();
        assert!(cond.contains_key("value"));

        let two = array_single_match(
            "scores",
            [greater_than("value", 5), less_than("value", 9)],
        );
        let scores = two.as_document().get("scores").unwrap().as_document().unwrap();
        let cond = scores.get("$elemMatch").unwrap().as_document().unwrap();
        assert!(cond.contains_key("$and"));
    }

    #[test]
    fn test_by_id() {
        let filter = by_id("0123456789abcdef01234567").unwrap();
        assert!(matches!(
            filter.as_document().get("_id"),
            Some(Value::ObjectId(_))
        ));

        assert!(by_id("not an id").unwrap_err().is_invalid_object_id());
    }

    #[test]
    fn test_text_search() {
        let filter = text_search("luca");
        let text = filter.as_document().get("$text").unwrap().as_document().unwrap();
        assert_eq!(text.get("$search"), Some(&Value::from("luca")));
    }

    #[test]
    fn test_empty_filter() {
        assert!(Filter::new().is_empty());
    }
}
