//! Operand values accepted by every builder.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::expression::Expression;
use crate::id::DocumentId;

/// An insertion-ordered document.
///
/// Field order is significant for some operators (a sort document uses it for
/// tie-break precedence), so documents never reorder their keys.
pub type Document = IndexMap<String, Value>;

/// A value that can appear inside a filter, update, expression or stage.
///
/// This is a closed set: anything a builder accepts is converted into one of
/// these variants at construction time.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// String value.
    String(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// Point in time (UTC, millisecond precision in the store).
    Timestamp(DateTime<Utc>),
    /// Document identifier.
    ObjectId(DocumentId),
    /// Nested document.
    Document(Document),
    /// Array of values.
    Array(Vec<Value>),
    /// Aggregation expression node.
    Expression(Box<Expression>),
}

impl Value {
    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the nested document, if this is one.
    ///
    /// Expressions are looked through, so an operator node reads as the
    /// document it wraps.
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Document(doc) => Some(doc),
            Self::Expression(expr) => expr.as_value().as_document(),
            _ => None,
        }
    }

    /// Get the array items, if this is an array.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            Self::Expression(expr) => expr.as_value().as_array(),
            _ => None,
        }
    }

    /// Get the string, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Expression(expr) => expr.as_value().as_str(),
            _ => None,
        }
    }

    /// Get the integer, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Strip expression wrappers, leaving the plain value tree.
    pub fn into_plain(self) -> Value {
        match self {
            Self::Expression(expr) => expr.into_value().into_plain(),
            Self::Document(doc) => {
                Self::Document(doc.into_iter().map(|(k, v)| (k, v.into_plain())).collect())
            }
            Self::Array(items) => Self::Array(items.into_iter().map(Value::into_plain).collect()),
            other => other,
        }
    }

    /// Build a single-entry document value.
    pub fn single(key: impl Into<String>, value: impl Into<Value>) -> Value {
        let mut doc = Document::with_capacity(1);
        doc.insert(key.into(), value.into());
        Value::Document(doc)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Self::String(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<DocumentId> for Value {
    fn from(v: DocumentId) -> Self {
        Self::ObjectId(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Self::Document(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Self::Array(v.into_iter().map(Value::from).collect())
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Self::Array(v.into_iter().map(Value::from).collect())
    }
}

impl From<Vec<i32>> for Value {
    fn from(v: Vec<i32>) -> Self {
        Self::Array(v.into_iter().map(Value::from).collect())
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Self::Array(v.into_iter().map(Value::from).collect())
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Self::Array(v.into_iter().map(Value::from).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

impl From<Expression> for Value {
    fn from(v: Expression) -> Self {
        Self::Expression(Box::new(v))
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Document(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Build a [`Document`] from `key => value` pairs, keeping their order.
///
/// ```rust
/// use docwrap_query::{document, Value};
///
/// let doc = document! { "name" => "red fish", "fins" => 2 };
/// assert_eq!(doc.get("fins"), Some(&Value::Int(2)));
/// assert_eq!(doc.keys().next().map(String::as_str), Some("name"));
/// ```
#[macro_export]
macro_rules! document {
    () => {
        $crate::Document::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut doc = $crate::Document::new();
        $(
            doc.insert(::std::string::String::from($key), $crate::Value::from($value));
        )+
        doc
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(Value::from(42), Value::Int(42));
        assert_eq!(Value::from(2.5f64), Value::Float(2.5));
        assert_eq!(Value::from("fish"), Value::String("fish".into()));
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }

    #[test]
    fn test_json_conversion_keeps_order() {
        let json = serde_json::json!({ "b": 1, "a": [true, null], "c": { "d": "x" } });
        let value = Value::from(json);
        let doc = value.as_document().unwrap();
        assert_eq!(doc.get("b"), Some(&Value::Int(1)));
        assert_eq!(
            doc.get("a"),
            Some(&Value::Array(vec![Value::Bool(true), Value::Null]))
        );
        assert!(doc.get("c").unwrap().as_document().is_some());
    }

    #[test]
    fn test_document_macro_preserves_insertion_order() {
        let doc = document! { "z" => 1, "a" => 2, "m" => 3 };
        let keys: Vec<&str> = doc.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_into_plain_strips_expressions() {
        let expr = crate::expression::field("price");
        let value = Value::Array(vec![Value::from(expr)]);
        assert_eq!(
            value.into_plain(),
            Value::Array(vec![Value::String("$price".into())])
        );
    }
}
