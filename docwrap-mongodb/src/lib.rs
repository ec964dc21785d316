//! # docwrap-mongodb
//!
//! Handles, cursors, bulk writes and transactions over a document store.
//!
//! This crate provides:
//! - A handle chain: [`Client`] → [`Database`] → [`Collection`] →
//!   [`CollectionQuery`] / [`DocumentRef`]
//! - Forward-only [`DocumentIterator`]s with explicit close
//! - Ordered and unordered bulk writes through [`BulkCollection`]
//! - Transactions from any handle via [`Transactional`]
//! - Two [`DocumentStore`] backends: [`MongoStore`] on the official driver
//!   and the in-process [`MemoryStore`]
//!
//! ## Example
//!
//! ```rust
//! use docwrap_mongodb::prelude::*;
//! use docwrap_query::{filter, update};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> MongoResult<()> {
//! let client = Client::in_memory();
//! let fish = client.database("aquarium").collection("fish");
//!
//! let red = fish.add(&serde_json::json!({ "name": "red fish", "fins": 2 })).await?;
//! red.update(false, [update::set("name", "blue fish")]).await?;
//!
//! let mut docs = fish.where_(filter::equal("name", "blue fish")).document_iterator().await?;
//! while docs.advance().await? {
//!     assert_eq!(docs.id()?.as_deref(), Some(red.id()));
//! }
//! docs.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Connecting
//!
//! ```rust,ignore
//! use std::time::Duration;
//!
//! let client = docwrap_mongodb::connect("mongodb://localhost:27017", Duration::from_secs(5)).await?;
//! ```

pub mod bulk;
pub mod client;
pub mod collection;
pub mod config;
pub mod context;
pub mod cursor;
pub mod database;
pub mod document;
pub mod error;
pub mod index;
pub mod memory;
pub mod mongo;
pub mod query;
pub mod store;
pub mod transaction;
pub mod types;

pub use bson;
pub use bson::oid::ObjectId;
pub use bulk::{BulkCollection, BulkDocument};
pub use client::{Client, connect};
pub use collection::Collection;
pub use config::{ConnectConfig, ConnectConfigBuilder, ReadPreference, WriteConcern};
pub use context::Context;
pub use cursor::DocumentIterator;
pub use database::Database;
pub use document::DocumentRef;
pub use error::{ErrorClass, MongoError, MongoResult};
pub use index::IndexKind;
pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use query::CollectionQuery;
pub use store::{
    BulkWriteFailure, BulkWriteResult, CursorSource, DocumentStore, Namespace, SessionId,
    UpdateOutcome, WriteFailure, WriteIntent, WriteKind,
};
pub use transaction::Transactional;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::bulk::{BulkCollection, BulkDocument};
    pub use crate::client::{Client, connect};
    pub use crate::collection::Collection;
    pub use crate::config::{ConnectConfig, ConnectConfigBuilder};
    pub use crate::cursor::DocumentIterator;
    pub use crate::database::Database;
    pub use crate::document::DocumentRef;
    pub use crate::error::{MongoError, MongoResult};
    pub use crate::index::IndexKind;
    pub use crate::query::CollectionQuery;
    pub use crate::store::{BulkWriteResult, UpdateOutcome};
    pub use crate::transaction::Transactional;
    pub use bson::oid::ObjectId;
    pub use bson::{Bson, doc};
}
