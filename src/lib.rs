//! # docwrap
//!
//! Fluent filter, update and aggregation builders with handles, cursors,
//! bulk writes and transactions over a document database.
//!
//! docwrap provides:
//! - Store-agnostic builders for filters, updates, expressions and pipelines
//! - A handle chain from client down to single documents
//! - Explicitly closed document iterators
//! - Ordered and unordered bulk writes
//! - Transactions started from any handle
//! - A MongoDB backend and an in-process backend for tests
//!
//! ## Quick Start
//!
//! ```rust
//! use docwrap::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> MongoResult<()> {
//! let client = Client::in_memory();
//! let people = client.database("app").collection("people");
//!
//! people
//!     .add(&serde_json::json!({ "email": "ada@example.com", "visits": 1 }))
//!     .await?;
//!
//! people
//!     .update_documents_where(
//!         filter::equal("email", "ada@example.com"),
//!         false,
//!         [update::increment("visits", 1)],
//!     )
//!     .await?;
//!
//! let mut docs = people
//!     .where_(filter::equal("email", "ada@example.com"))
//!     .limit(1)
//!     .document_iterator()
//!     .await?;
//! while docs.advance().await? {
//!     println!("{}", docs.data()?);
//! }
//! docs.close().await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]

/// Query, update and pipeline builders.
pub mod query {
    pub use docwrap_query::*;
}

/// Handles and store backends.
pub mod mongodb {
    pub use docwrap_mongodb::*;
}

pub use docwrap_query::document;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use docwrap_mongodb::prelude::*;
    pub use docwrap_query::prelude::*;
}

// Re-export key types at the crate root
pub use docwrap_mongodb::{
    Client, Collection, CollectionQuery, Database, DocumentIterator, DocumentRef, MongoError,
    MongoResult, Transactional, connect,
};
pub use docwrap_query::{Filter, Pipeline, QueryError, Update};
