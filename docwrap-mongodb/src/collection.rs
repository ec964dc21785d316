//! Collection handles.

use std::sync::Arc;

use bson::Bson;
use docwrap_query::{Filter, Pipeline, Update};
use serde::Serialize;
use smol_str::SmolStr;
use tracing::debug;

use crate::bulk::BulkCollection;
use crate::context::Context;
use crate::cursor::DocumentIterator;
use crate::database::Database;
use crate::document::DocumentRef;
use crate::error::{MongoError, MongoResult};
use crate::index::{IndexKind, key_pattern};
use crate::query::CollectionQuery;
use crate::store::{BulkWriteResult, DocumentStore, Namespace, UpdateOutcome};
use crate::types::{filter_to_bson, to_bson_document, update_to_bson};

/// A handle to one collection.
#[derive(Debug, Clone)]
pub struct Collection {
    database: Database,
    name: SmolStr,
}

impl Collection {
    pub(crate) fn new(database: Database, name: impl Into<SmolStr>) -> Self {
        Self {
            database,
            name: name.into(),
        }
    }

    /// The collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The database this collection belongs to.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// The `database.collection` pair.
    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.database.name(), self.name.clone())
    }

    pub(crate) fn context(&self) -> &Context {
        self.database.context()
    }

    pub(crate) fn store(&self) -> &Arc<dyn DocumentStore> {
        self.database.client().store()
    }

    pub(crate) fn rebind(&self, database: Database) -> Self {
        Self {
            database,
            name: self.name.clone(),
        }
    }

    /// Start a query from the documents matching `filter`.
    pub fn where_(&self, filter: Filter) -> CollectionQuery {
        CollectionQuery::new(self.clone(), Pipeline::matching(filter))
    }

    /// Start a query from every document.
    pub fn all(&self) -> CollectionQuery {
        CollectionQuery::new(self.clone(), Pipeline::all())
    }

    /// Get a handle to the document with the given hexadecimal id.
    ///
    /// The id is checked when the handle is used, not here.
    pub fn document(&self, id: &str) -> DocumentRef {
        DocumentRef::new(self.clone(), id)
    }

    /// Insert `data` as a new document and return a handle to it.
    ///
    /// The store assigns an identifier when `data` has no `_id`. Handles
    /// address documents by identifier, so an `_id` that is not an object id
    /// is rejected after the insert with a usage error.
    pub async fn add<T: Serialize + ?Sized>(&self, data: &T) -> MongoResult<DocumentRef> {
        let document = to_bson_document(data)?;
        let namespace = self.namespace();
        let ctx = self.context();
        debug!(namespace = %namespace, "insert one");
        let id = ctx
            .run(self.store().insert_one(ctx.session(), &namespace, document))
            .await?;
        match id {
            Bson::ObjectId(oid) => Ok(self.document(&oid.to_hex())),
            other => Err(MongoError::usage(format!(
                "inserted document has an _id that is not an object id: {}",
                other
            ))),
        }
    }

    /// Iterate over every document of the collection.
    pub async fn document_iterator(&self) -> MongoResult<DocumentIterator> {
        let namespace = self.namespace();
        let ctx = self.context();
        debug!(namespace = %namespace, "find all");
        let source = ctx
            .run(self.store().find(ctx.session(), &namespace, bson::Document::new()))
            .await?;
        Ok(DocumentIterator::new(source, ctx.clone(), namespace))
    }

    /// Apply the merged `updates` to every document matching `filter`.
    ///
    /// With `upsert`, a document is inserted when nothing matches.
    pub async fn update_documents_where(
        &self,
        filter: Filter,
        upsert: bool,
        updates: impl IntoIterator<Item = Update>,
    ) -> MongoResult<UpdateOutcome> {
        let update = Update::merge(updates)?;
        let namespace = self.namespace();
        let ctx = self.context();
        debug!(namespace = %namespace, upsert, "update many");
        ctx.run(self.store().update_many(
            ctx.session(),
            &namespace,
            filter_to_bson(&filter),
            update_to_bson(&update),
            upsert,
        ))
        .await
    }

    /// Delete every document matching `filter`, returning how many were removed.
    pub async fn delete_documents_where(&self, filter: Filter) -> MongoResult<u64> {
        let namespace = self.namespace();
        let ctx = self.context();
        debug!(namespace = %namespace, "delete many");
        ctx.run(
            self.store()
                .delete_many(ctx.session(), &namespace, filter_to_bson(&filter)),
        )
        .await
    }

    /// Drop the collection.
    pub async fn delete(&self) -> MongoResult<()> {
        let namespace = self.namespace();
        let ctx = self.context();
        debug!(namespace = %namespace, "drop collection");
        ctx.run(self.store().drop_collection(ctx.session(), &namespace))
            .await
    }

    /// Create an index over `fields`, returning its name.
    ///
    /// Index builds run outside any transaction.
    pub async fn create_index<'a>(
        &self,
        fields: impl IntoIterator<Item = (&'a str, IndexKind)>,
    ) -> MongoResult<String> {
        let keys = key_pattern(fields);
        let namespace = self.namespace();
        debug!(namespace = %namespace, keys = %keys, "create index");
        self.context()
            .run(self.store().create_index(&namespace, keys))
            .await
    }

    /// Collect writes with `build` and send them as one batch.
    ///
    /// Nothing is sent if `build` fails or adds nothing. An `ordered` batch
    /// stops at the first failed write; otherwise every write is attempted.
    ///
    /// ```rust
    /// # async fn demo(fish: docwrap_mongodb::Collection) -> docwrap_mongodb::MongoResult<()> {
    /// use docwrap_query::{filter, update};
    ///
    /// fish.bulk(true, |batch| {
    ///     batch.add(&serde_json::json!({ "name": "red fish" }))?;
    ///     batch.update_documents_where(filter::equal("name", "blue fish"), false, [update::set("fins", 3)])?;
    ///     Ok(())
    /// })
    /// .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn bulk<F>(&self, ordered: bool, build: F) -> MongoResult<BulkWriteResult>
    where
        F: FnOnce(&mut BulkCollection) -> MongoResult<()>,
    {
        let mut batch = BulkCollection::new(self.clone());
        build(&mut batch)?;
        batch.dispatch(ordered).await
    }
}
