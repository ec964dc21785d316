//! # docwrap-query
//!
//! Store-agnostic builders for document queries.
//!
//! This crate provides:
//! - [`Filter`] constructors for every query operator
//! - [`Update`] constructors and fragment merging
//! - Aggregation [`Expression`] constructors grouped by operator family
//! - An immutable, append-only aggregation [`Pipeline`]
//!
//! Nothing here performs I/O. Builders produce plain values that the store
//! layer translates into driver documents.
//!
//! ## Example
//!
//! ```rust
//! use docwrap_query::prelude::*;
//!
//! let recent_fish = Pipeline::matching(filter::and([
//!     filter::equal("kind", "fish"),
//!     filter::greater_than("fins", 1),
//! ]))
//! .sort([("createdAt", SortDirection::Descending)])
//! .limit(10);
//!
//! let bump = Update::merge([
//!     update::increment("views", 1),
//!     update::current_date("seenAt", update::CurrentDateType::Date),
//! ])
//! .unwrap();
//!
//! assert_eq!(recent_fish.len(), 3);
//! assert_eq!(bump.as_document().len(), 2);
//! ```

pub mod error;
pub mod expression;
pub mod filter;
pub mod id;
pub mod pipeline;
pub mod types;
pub mod update;
pub mod value;

pub use error::{QueryError, QueryResult};
pub use expression::Expression;
pub use filter::Filter;
pub use id::DocumentId;
pub use pipeline::{Pipeline, SortDirection, Stage};
pub use types::BsonType;
pub use update::Update;
pub use value::{Document, Value};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::document;
    pub use crate::error::{QueryError, QueryResult};
    pub use crate::expression::{self, Expression, EXCLUDE, INCLUDE};
    pub use crate::filter::{self, Filter};
    pub use crate::id::DocumentId;
    pub use crate::pipeline::{Pipeline, SortDirection};
    pub use crate::types::BsonType;
    pub use crate::update::{self, Update};
    pub use crate::value::{Document, Value};
}
