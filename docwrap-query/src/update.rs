//! Update constructors.
//!
//! Every constructor returns a one-operator, one-field [`Update`]. Fragments
//! are combined with [`Update::merge`], which groups them by operator and
//! refuses to target the same operator and field twice.
//!
//! ```rust
//! use docwrap_query::{update, Update};
//!
//! let update = Update::merge([
//!     update::set("email", "luca@antipy.com"),
//!     update::set("name", "Luca"),
//!     update::increment("logins", 1.0),
//! ])
//! .unwrap();
//!
//! // { "$set": { "email": ..., "name": ... }, "$inc": { "logins": 1.0 } }
//! assert_eq!(update.as_document().len(), 2);
//! ```

use indexmap::IndexMap;

use crate::error::{QueryError, QueryResult};
use crate::value::{Document, Value};

/// A structured mutation: update operator → { field: operand }.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Update(Document);

impl Update {
    /// Wrap an existing update document.
    pub fn from_document(doc: Document) -> Self {
        Self(doc)
    }

    /// Get the update document.
    pub fn as_document(&self) -> &Document {
        &self.0
    }

    /// Consume the update, returning its document.
    pub fn into_document(self) -> Document {
        self.0
    }

    /// Check if the update has no operators.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge fragments into one update document.
    ///
    /// Fragments sharing an operator are combined under that operator. The
    /// merge is only defined over disjoint operator+field pairs: a pair seen
    /// twice fails with [`QueryError::ConflictingUpdate`] instead of letting
    /// one fragment silently overwrite the other.
    pub fn merge(updates: impl IntoIterator<Item = Update>) -> QueryResult<Update> {
        let mut merged: IndexMap<String, Document> = IndexMap::new();

        for update in updates {
            for (operator, operand) in update.0 {
                let Value::Document(fields) = operand else {
                    return Err(QueryError::invalid_value(format!(
                        "operand of '{}' must be a document",
                        operator
                    )));
                };

                let target = merged.entry(operator.clone()).or_default();
                for (field, value) in fields {
                    if target.contains_key(&field) {
                        return Err(QueryError::conflicting_update(operator, field));
                    }
                    target.insert(field, value);
                }
            }
        }

        Ok(Update(
            merged
                .into_iter()
                .map(|(operator, fields)| (operator, Value::Document(fields)))
                .collect(),
        ))
    }
}

impl From<Update> for Value {
    fn from(update: Update) -> Self {
        Value::Document(update.0)
    }
}

fn op(operator: &str, field: &str, operand: Value) -> Update {
    let mut doc = Document::with_capacity(1);
    doc.insert(operator.to_string(), Value::single(field, operand));
    Update(doc)
}

/// Representation written by [`current_date`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CurrentDateType {
    /// A UTC datetime.
    #[default]
    Date,
    /// An internal timestamp.
    Timestamp,
}

impl CurrentDateType {
    /// The type name the store expects.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Timestamp => "timestamp",
        }
    }
}

/// Set the field to the current date or timestamp.
pub fn current_date(field: &str, ty: CurrentDateType) -> Update {
    op("$currentDate", field, Value::single("$type", ty.as_str()))
}

/// Increment the field by `amount`.
pub fn increment(field: &str, amount: impl Into<Value>) -> Update {
    op("$inc", field, amount.into())
}

/// Set the field to `value` only if `value` is less than the stored value.
pub fn set_if_less(field: &str, value: impl Into<Value>) -> Update {
    op("$min", field, value.into())
}

/// Set the field to `value` only if `value` is greater than the stored value.
pub fn set_if_greater(field: &str, value: impl Into<Value>) -> Update {
    op("$max", field, value.into())
}

/// Multiply the field by `amount`.
pub fn multiply(field: &str, amount: impl Into<Value>) -> Update {
    op("$mul", field, amount.into())
}

/// Rename the field.
pub fn rename(field: &str, new_name: &str) -> Update {
    op("$rename", field, Value::from(new_name))
}

/// Set the field to `value`.
pub fn set(field: &str, value: impl Into<Value>) -> Update {
    op("$set", field, value.into())
}

/// Set the field to `value` only when the update inserts a new document.
pub fn set_if_new(field: &str, value: impl Into<Value>) -> Update {
    op("$setOnInsert", field, value.into())
}

/// Remove the field.
pub fn unset(field: &str) -> Update {
    op("$unset", field, Value::from(""))
}

/// Append `value` to the array unless it is already present.
pub fn add_to_set(field: &str, value: impl Into<Value>) -> Update {
    op("$addToSet", field, value.into())
}

/// Remove the first element of the array.
pub fn pop_first(field: &str) -> Update {
    op("$pop", field, Value::Int(-1))
}

/// Remove the last element of the array.
pub fn pop_last(field: &str) -> Update {
    op("$pop", field, Value::Int(1))
}

/// Remove every element equal to one of `items` from the array.
pub fn remove_all<V: Into<Value>>(field: &str, items: impl IntoIterator<Item = V>) -> Update {
    let items = items.into_iter().map(Into::into).collect::<Vec<_>>();
    op("$pullAll", field, Value::Array(items))
}

/// Append all `items` to the array.
pub fn push<V: Into<Value>>(field: &str, items: impl IntoIterator<Item = V>) -> Update {
    let items = items.into_iter().map(Into::into).collect::<Vec<_>>();
    op("$push", field, Value::single("$each", Value::Array(items)))
}

/// Bitwise AND the integer field with `value`.
pub fn bit_and(field: &str, value: i64) -> Update {
    op("$bit", field, Value::single("and", value))
}

/// Bitwise OR the integer field with `value`.
pub fn bit_or(field: &str, value: i64) -> Update {
    op("$bit", field, Value::single("or", value))
}

/// Bitwise XOR the integer field with `value`.
pub fn bit_xor(field: &str, value: i64) -> Update {
    op("$bit", field, Value::single("xor", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_set_shape() {
        assert_eq!(
            set("name", "x").into_document(),
            document! { "$set" => Value::single("name", "x") }
        );
    }

    #[test]
    fn test_push_uses_each() {
        let update = push("numbers", [1, 2]);
        assert_eq!(
            update.into_document(),
            document! {
                "$push" => Value::single("numbers", Value::single("$each", vec![1, 2]))
            }
        );
    }

    #[test]
    fn test_merge_groups_by_operator() {
        let merged = Update::merge([
            set("a", 1),
            increment("n", 2),
            set("b", 2),
            unset("c"),
        ])
        .unwrap();

        let doc = merged.as_document();
        let keys: Vec<&str> = doc.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["$set", "$inc", "$unset"]);

        let set_fields = doc.get("$set").unwrap().as_document().unwrap();
        assert_eq!(set_fields.get("a"), Some(&Value::Int(1)));
        assert_eq!(set_fields.get("b"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_merge_same_field_different_operators_is_allowed() {
        let merged = Update::merge([set_if_less("low", 1), set_if_greater("low", 9)]).unwrap();
        assert_eq!(merged.as_document().len(), 2);
    }

    #[test]
    fn test_merge_rejects_collisions() {
        let err = Update::merge([set("name", "a"), set("name", "b")]).unwrap_err();
        assert_eq!(err, QueryError::conflicting_update("$set", "name"));

        let err = Update::merge([bit_and("flags", 1), bit_or("flags", 2)]).unwrap_err();
        assert!(err.is_conflicting_update());
    }

    #[test]
    fn test_merge_rejects_malformed_operand() {
        let bad = Update::from_document(document! { "$set" => 5 });
        let err = Update::merge([bad]).unwrap_err();
        assert!(matches!(err, QueryError::InvalidValue(_)));
    }

    #[test]
    fn test_merge_of_nothing_is_empty() {
        assert!(Update::merge(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_current_date() {
        let update = current_date("lastEdited", CurrentDateType::Timestamp);
        let fields = update.as_document().get("$currentDate").unwrap().as_document().unwrap();
        assert_eq!(
            fields.get("lastEdited"),
            Some(&Value::single("$type", "timestamp"))
        );
    }
}
