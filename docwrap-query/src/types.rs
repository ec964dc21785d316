//! Store type names used by `$type` and `$convert`.

use crate::value::Value;

/// A value type as the store names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BsonType {
    /// Matches doubles, ints, longs and decimals.
    Number,
    /// 64-bit floating point.
    Double,
    /// UTF-8 string.
    String,
    /// Embedded document.
    Object,
    /// Array.
    Array,
    /// Binary data.
    BinaryData,
    /// Document identifier.
    ObjectId,
    /// Boolean.
    Boolean,
    /// UTC datetime.
    Date,
    /// Null.
    Null,
    /// Regular expression.
    RegularExpression,
    /// JavaScript code.
    JavaScript,
    /// JavaScript code with scope.
    JavaScriptWithScope,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    /// 128-bit decimal.
    Decimal,
    /// Internal timestamp.
    Timestamp,
}

impl BsonType {
    /// The alias the store uses for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Double => "double",
            Self::String => "string",
            Self::Object => "object",
            Self::Array => "array",
            Self::BinaryData => "binData",
            Self::ObjectId => "objectId",
            Self::Boolean => "bool",
            Self::Date => "date",
            Self::Null => "null",
            Self::RegularExpression => "regex",
            Self::JavaScript => "javascript",
            Self::JavaScriptWithScope => "javascriptWithScope",
            Self::Int => "int",
            Self::Long => "long",
            Self::Decimal => "decimal",
            Self::Timestamp => "timestamp",
        }
    }

    /// Look up a type by its alias.
    pub fn from_alias(alias: &str) -> Option<Self> {
        let ty = match alias {
            "number" => Self::Number,
            "double" => Self::Double,
            "string" => Self::String,
            "object" => Self::Object,
            "array" => Self::Array,
            "binData" => Self::BinaryData,
            "objectId" => Self::ObjectId,
            "bool" => Self::Boolean,
            "date" => Self::Date,
            "null" => Self::Null,
            "regex" => Self::RegularExpression,
            "javascript" => Self::JavaScript,
            "javascriptWithScope" => Self::JavaScriptWithScope,
            "int" => Self::Int,
            "long" => Self::Long,
            "decimal" => Self::Decimal,
            "timestamp" => Self::Timestamp,
            _ => return None,
        };
        Some(ty)
    }
}

impl From<BsonType> for Value {
    fn from(ty: BsonType) -> Self {
        Value::String(ty.as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_roundtrip() {
        for ty in [
            BsonType::Number,
            BsonType::BinaryData,
            BsonType::ObjectId,
            BsonType::Boolean,
            BsonType::JavaScriptWithScope,
        ] {
            assert_eq!(BsonType::from_alias(ty.as_str()), Some(ty));
        }
        assert_eq!(BsonType::from_alias("nope"), None);
    }
}
