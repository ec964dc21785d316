//! Error types for store operations.

use docwrap_query::QueryError;
use mongodb::error::ErrorKind;
use thiserror::Error;

use crate::store::BulkWriteFailure;

/// Result type for store operations.
pub type MongoResult<T> = Result<T, MongoError>;

/// Broad failure classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request could not be built; nothing was sent.
    Construction,
    /// The store could not be reached, or did not answer in time.
    Transport,
    /// The store received the request and refused it.
    Operation,
    /// The API was used out of order.
    Usage,
}

/// Errors that can occur during store operations.
#[derive(Error, Debug)]
pub enum MongoError {
    /// A filter, update or identifier could not be built.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// MongoDB driver error.
    #[error("mongodb error: {0}")]
    Driver(#[from] mongodb::error::Error),

    /// BSON serialization error.
    #[error("bson error: {0}")]
    Bson(#[from] bson::ser::Error),

    /// BSON deserialization error.
    #[error("bson deserialization error: {0}")]
    BsonDe(#[from] bson::de::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Timeout error.
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    /// The store refused the operation.
    #[error("operation failed: {0}")]
    Operation(String),

    /// Document not found.
    #[error("document not found: {0}")]
    NotFound(String),

    /// One or more intents of a bulk write failed.
    #[error("bulk write failed: {0}")]
    BulkWrite(BulkWriteFailure),

    /// The API was used out of order.
    #[error("usage error: {0}")]
    Usage(String),

    /// Document serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl MongoError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create an operation error.
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation(message.into())
    }

    /// Create a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// The failure class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Query(_) | Self::Bson(_) | Self::Serialization(_) | Self::Config(_) => {
                ErrorClass::Construction
            }
            Self::Connection(_) | Self::Timeout(_) => ErrorClass::Transport,
            Self::Driver(e) => {
                if matches!(
                    *e.kind,
                    ErrorKind::Io(_)
                        | ErrorKind::ServerSelection { .. }
                        | ErrorKind::DnsResolve { .. }
                        | ErrorKind::ConnectionPoolCleared { .. }
                ) {
                    ErrorClass::Transport
                } else {
                    ErrorClass::Operation
                }
            }
            Self::BsonDe(_) | Self::Operation(_) | Self::NotFound(_) | Self::BulkWrite(_) => {
                ErrorClass::Operation
            }
            Self::Usage(_) => ErrorClass::Usage,
        }
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a usage error.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    /// The partial result and per-intent errors of a failed bulk write.
    pub fn bulk_failure(&self) -> Option<&BulkWriteFailure> {
        match self {
            Self::BulkWrite(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<bson::oid::Error> for MongoError {
    fn from(err: bson::oid::Error) -> Self {
        MongoError::Query(QueryError::invalid_object_id(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BulkWriteResult, WriteFailure};

    #[test]
    fn test_error_creation() {
        let err = MongoError::config("invalid URI");
        assert!(matches!(err, MongoError::Config(_)));

        let err = MongoError::connection("connection refused");
        assert!(err.is_connection_error());

        let err = MongoError::Timeout(5000);
        assert!(err.is_timeout());

        let err = MongoError::not_found("user");
        assert!(err.is_not_found());

        let err = MongoError::usage("closed");
        assert!(err.is_usage());
    }

    #[test]
    fn test_error_display() {
        let err = MongoError::config("test error");
        assert_eq!(err.to_string(), "configuration error: test error");

        let err = MongoError::Timeout(250);
        assert_eq!(err.to_string(), "operation timed out after 250ms");
    }

    #[test]
    fn test_error_classes() {
        let err: MongoError = QueryError::invalid_object_id("nope").into();
        assert_eq!(err.class(), ErrorClass::Construction);

        assert_eq!(MongoError::Timeout(1).class(), ErrorClass::Transport);
        assert_eq!(MongoError::operation("denied").class(), ErrorClass::Operation);
        assert_eq!(MongoError::usage("twice").class(), ErrorClass::Usage);

        let err = MongoError::BulkWrite(BulkWriteFailure {
            result: BulkWriteResult::default(),
            failures: vec![WriteFailure {
                index: 0,
                code: None,
                message: "x".into(),
            }],
        });
        assert_eq!(err.class(), ErrorClass::Operation);
        assert_eq!(err.bulk_failure().map(|f| f.failures.len()), Some(1));
    }
}
