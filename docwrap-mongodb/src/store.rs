//! The boundary between the handle layer and a document store.
//!
//! Handles never talk to a driver directly: every round trip goes through a
//! [`DocumentStore`], so the same handle code runs against the official
//! driver ([`MongoStore`](crate::mongo::MongoStore)) or the in-process
//! [`MemoryStore`](crate::memory::MemoryStore).

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use smol_str::SmolStr;

use crate::error::MongoResult;

/// Opaque identifier of a store-side session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw session number.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw session number.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// A database and collection pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// Database name.
    pub database: SmolStr,
    /// Collection name.
    pub collection: SmolStr,
}

impl Namespace {
    /// Create a namespace.
    pub fn new(database: impl Into<SmolStr>, collection: impl Into<SmolStr>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// One write of a bulk batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteIntent {
    /// Insert a new document.
    Insert {
        /// Document to insert.
        document: Document,
    },
    /// Replace the document with the given id, inserting it when missing.
    ReplaceById {
        /// Target identifier.
        id: ObjectId,
        /// New contents.
        replacement: Document,
        /// Insert when no document has the id.
        upsert: bool,
    },
    /// Apply update operators to the document with the given id.
    UpdateById {
        /// Target identifier.
        id: ObjectId,
        /// Update document.
        update: Document,
        /// Insert when no document has the id.
        upsert: bool,
    },
    /// Apply update operators to every matching document.
    UpdateMany {
        /// Selection filter.
        filter: Document,
        /// Update document.
        update: Document,
        /// Insert when nothing matches.
        upsert: bool,
    },
    /// Delete every matching document.
    DeleteMany {
        /// Selection filter.
        filter: Document,
    },
    /// Delete the document with the given id.
    DeleteById {
        /// Target identifier.
        id: ObjectId,
    },
}

/// The write command family an intent belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// `insert`
    Insert,
    /// `update`
    Update,
    /// `delete`
    Delete,
}

impl WriteIntent {
    /// The command family this intent is sent with.
    pub fn kind(&self) -> WriteKind {
        match self {
            Self::Insert { .. } => WriteKind::Insert,
            Self::ReplaceById { .. } | Self::UpdateById { .. } | Self::UpdateMany { .. } => {
                WriteKind::Update
            }
            Self::DeleteMany { .. } | Self::DeleteById { .. } => WriteKind::Delete,
        }
    }
}

/// Outcome of an update or replace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Documents matched by the filter.
    pub matched_count: u64,
    /// Documents actually changed.
    pub modified_count: u64,
    /// Identifier of the inserted document, if the write upserted.
    pub upserted_id: Option<Bson>,
}

impl UpdateOutcome {
    /// Whether the write modified or inserted anything.
    pub fn changed(&self) -> bool {
        self.modified_count > 0 || self.upserted_id.is_some()
    }
}

/// Aggregate outcome of a bulk write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteResult {
    /// Documents inserted.
    pub inserted_count: u64,
    /// Documents matched by update and replace intents.
    pub matched_count: u64,
    /// Documents changed by update and replace intents.
    pub modified_count: u64,
    /// Documents deleted.
    pub deleted_count: u64,
    /// Documents inserted by upserting intents.
    pub upserted_count: u64,
    /// Upserted identifiers keyed by intent index.
    pub upserted_ids: BTreeMap<usize, Bson>,
}

/// A single intent that the store refused.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteFailure {
    /// Position of the intent in the batch.
    pub index: usize,
    /// Store error code, when the store reports one.
    pub code: Option<i32>,
    /// Store error message.
    pub message: String,
}

/// A bulk write where at least one intent failed.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWriteFailure {
    /// What was applied before (ordered) or besides (unordered) the failures.
    pub result: BulkWriteResult,
    /// The failed intents.
    pub failures: Vec<WriteFailure>,
}

impl fmt::Display for BulkWriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} write(s) failed", self.failures.len())?;
        if let Some(first) = self.failures.first() {
            write!(f, ", first at index {}: {}", first.index, first.message)?;
        }
        Ok(())
    }
}

/// A server-side result stream.
#[async_trait]
pub trait CursorSource: Send {
    /// Move to the next item. Returns `false` once the stream is exhausted.
    async fn advance(&mut self) -> MongoResult<bool>;

    /// The item the stream is positioned on.
    fn current(&self) -> MongoResult<Document>;

    /// Release the stream.
    async fn close(&mut self) -> MongoResult<()>;
}

/// Operations a document store must provide.
///
/// Every data operation takes the session it runs in; `None` runs it outside
/// any transaction.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Check that the store is reachable.
    async fn ping(&self) -> MongoResult<()>;

    /// Open a session.
    async fn start_session(&self) -> MongoResult<SessionId>;

    /// Begin a transaction on the session.
    async fn start_transaction(&self, session: SessionId) -> MongoResult<()>;

    /// Commit the session's transaction.
    async fn commit_transaction(&self, session: SessionId) -> MongoResult<()>;

    /// Abort the session's transaction, discarding its writes.
    async fn abort_transaction(&self, session: SessionId) -> MongoResult<()>;

    /// Close the session. An open transaction is aborted.
    async fn end_session(&self, session: SessionId) -> MongoResult<()>;

    /// Stream the documents matching `filter`.
    async fn find(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
    ) -> MongoResult<Box<dyn CursorSource>>;

    /// The first document matching `filter`.
    async fn find_one(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
    ) -> MongoResult<Option<Document>>;

    /// Stream the output of an aggregation pipeline.
    async fn aggregate(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        pipeline: Vec<Document>,
    ) -> MongoResult<Box<dyn CursorSource>>;

    /// Insert a document, returning its identifier.
    async fn insert_one(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        document: Document,
    ) -> MongoResult<Bson>;

    /// Replace the first document matching `filter`.
    async fn replace_one(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> MongoResult<UpdateOutcome>;

    /// Update the first document matching `filter`.
    async fn update_one(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> MongoResult<UpdateOutcome>;

    /// Update every document matching `filter`.
    async fn update_many(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> MongoResult<UpdateOutcome>;

    /// Delete the first document matching `filter`, returning the count.
    async fn delete_one(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
    ) -> MongoResult<u64>;

    /// Delete every document matching `filter`, returning the count.
    async fn delete_many(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
    ) -> MongoResult<u64>;

    /// Apply a batch of writes as one request.
    ///
    /// Ordered batches stop at the first failure; unordered batches apply
    /// every intent they can. Any failure is reported as
    /// [`MongoError::BulkWrite`](crate::MongoError::BulkWrite).
    async fn bulk_write(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        intents: Vec<WriteIntent>,
        ordered: bool,
    ) -> MongoResult<BulkWriteResult>;

    /// Create an index, returning its name.
    async fn create_index(&self, namespace: &Namespace, keys: Document) -> MongoResult<String>;

    /// Drop a collection.
    async fn drop_collection(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
    ) -> MongoResult<()>;

    /// Drop a database.
    async fn drop_database(&self, session: Option<SessionId>, database: &str) -> MongoResult<()>;
}
