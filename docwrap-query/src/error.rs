//! Errors raised while constructing query fragments.
//!
//! Building a filter, expression or pipeline never fails. Only the two
//! operations that validate caller input do:
//!
//! - parsing a document identifier ([`DocumentId::parse_str`](crate::DocumentId::parse_str))
//! - merging update fragments ([`Update::merge`](crate::Update::merge))
//!
//! ```rust
//! use docwrap_query::{update, Update, QueryError};
//!
//! let err = Update::merge([update::set("name", "a"), update::set("name", "b")]).unwrap_err();
//! assert!(matches!(err, QueryError::ConflictingUpdate { .. }));
//! ```

use thiserror::Error;

/// Result type for construction operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised before anything is sent to the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The string is not a well-formed document identifier.
    #[error("invalid object id '{0}': expected 24 hexadecimal characters")]
    InvalidObjectId(String),

    /// Two update fragments target the same operator and field.
    #[error("conflicting update: operator '{operator}' targets field '{field}' more than once")]
    ConflictingUpdate {
        /// Update operator, e.g. `$set`.
        operator: String,
        /// Field targeted twice.
        field: String,
    },

    /// A fragment does not have the shape its operator requires.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl QueryError {
    /// Create an invalid object id error.
    pub fn invalid_object_id(id: impl Into<String>) -> Self {
        Self::InvalidObjectId(id.into())
    }

    /// Create a conflicting update error.
    pub fn conflicting_update(operator: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ConflictingUpdate {
            operator: operator.into(),
            field: field.into(),
        }
    }

    /// Create an invalid value error.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue(message.into())
    }

    /// Check if this is an invalid object id error.
    pub fn is_invalid_object_id(&self) -> bool {
        matches!(self, Self::InvalidObjectId(_))
    }

    /// Check if this is a conflicting update error.
    pub fn is_conflicting_update(&self) -> bool {
        matches!(self, Self::ConflictingUpdate { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueryError::invalid_object_id("abc");
        assert_eq!(
            err.to_string(),
            "invalid object id 'abc': expected 24 hexadecimal characters"
        );

        let err = QueryError::conflicting_update("$set", "name");
        assert_eq!(
            err.to_string(),
            "conflicting update: operator '$set' targets field 'name' more than once"
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(QueryError::invalid_object_id("x").is_invalid_object_id());
        assert!(QueryError::conflicting_update("$inc", "n").is_conflicting_update());
        assert!(!QueryError::invalid_value("x").is_conflicting_update());
    }
}
