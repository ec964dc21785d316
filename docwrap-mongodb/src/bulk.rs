//! Batched writes.

use docwrap_query::{DocumentId, Filter, Update};
use serde::Serialize;
use tracing::debug;

use crate::collection::Collection;
use crate::error::MongoResult;
use crate::store::{BulkWriteResult, WriteIntent};
use crate::types::{filter_to_bson, object_id, to_bson_document, update_to_bson};

/// Writes collected for one [`Collection::bulk`] call.
///
/// Every method validates its input before the write is queued, so a batch
/// that builds without error only fails at the store.
#[derive(Debug)]
pub struct BulkCollection {
    collection: Collection,
    intents: Vec<WriteIntent>,
}

impl BulkCollection {
    pub(crate) fn new(collection: Collection) -> Self {
        Self {
            collection,
            intents: Vec::new(),
        }
    }

    /// The collection the batch writes to.
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Number of queued writes.
    pub fn len(&self) -> usize {
        self.intents.len()
    }

    /// Check if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    /// The queued writes, in submission order.
    pub fn intents(&self) -> &[WriteIntent] {
        &self.intents
    }

    /// Queue an insert of `data`.
    pub fn add<T: Serialize + ?Sized>(&mut self, data: &T) -> MongoResult<()> {
        let document = to_bson_document(data)?;
        self.intents.push(WriteIntent::Insert { document });
        Ok(())
    }

    /// Address the document with the given hexadecimal id.
    pub fn document(&mut self, id: &str) -> BulkDocument<'_> {
        BulkDocument {
            batch: self,
            id: id.to_string(),
        }
    }

    /// Queue the merged `updates` for every document matching `filter`.
    pub fn update_documents_where(
        &mut self,
        filter: Filter,
        upsert: bool,
        updates: impl IntoIterator<Item = Update>,
    ) -> MongoResult<()> {
        let update = Update::merge(updates)?;
        self.intents.push(WriteIntent::UpdateMany {
            filter: filter_to_bson(&filter),
            update: update_to_bson(&update),
            upsert,
        });
        Ok(())
    }

    /// Queue a delete of every document matching `filter`.
    pub fn delete_documents_where(&mut self, filter: Filter) {
        self.intents.push(WriteIntent::DeleteMany {
            filter: filter_to_bson(&filter),
        });
    }

    pub(crate) async fn dispatch(self, ordered: bool) -> MongoResult<BulkWriteResult> {
        let namespace = self.collection.namespace();
        if self.intents.is_empty() {
            debug!(namespace = %namespace, "empty bulk batch, nothing sent");
            return Ok(BulkWriteResult::default());
        }

        let ctx = self.collection.context();
        debug!(
            namespace = %namespace,
            writes = self.intents.len(),
            ordered,
            "bulk write"
        );
        ctx.run(
            self.collection
                .store()
                .bulk_write(ctx.session(), &namespace, self.intents, ordered),
        )
        .await
    }
}

/// A document of a [`BulkCollection`], addressed by id.
///
/// The id is parsed before anything is queued; a malformed id fails the
/// call with [`QueryError::InvalidObjectId`](docwrap_query::QueryError::InvalidObjectId).
#[derive(Debug)]
pub struct BulkDocument<'a> {
    batch: &'a mut BulkCollection,
    id: String,
}

impl BulkDocument<'_> {
    fn parsed_id(&self) -> MongoResult<bson::oid::ObjectId> {
        Ok(object_id(DocumentId::parse_str(&self.id)?))
    }

    /// Queue a replacement of the document, creating it when missing.
    pub fn set<T: Serialize + ?Sized>(self, data: &T) -> MongoResult<()> {
        let id = self.parsed_id()?;
        let replacement = to_bson_document(data)?;
        self.batch.intents.push(WriteIntent::ReplaceById {
            id,
            replacement,
            upsert: true,
        });
        Ok(())
    }

    /// Queue the merged `updates` for the document.
    pub fn update(self, upsert: bool, updates: impl IntoIterator<Item = Update>) -> MongoResult<()> {
        let id = self.parsed_id()?;
        let update = Update::merge(updates)?;
        self.batch.intents.push(WriteIntent::UpdateById {
            id,
            update: update_to_bson(&update),
            upsert,
        });
        Ok(())
    }

    /// Queue a delete of the document.
    pub fn delete(self) -> MongoResult<()> {
        let id = self.parsed_id()?;
        self.batch.intents.push(WriteIntent::DeleteById { id });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::error::MongoError;
    use bson::oid::ObjectId;
    use docwrap_query::{filter, update};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fish() -> Collection {
        Client::in_memory().database("aquarium").collection("fish")
    }

    #[test]
    fn test_intents_keep_submission_order() {
        let mut batch = BulkCollection::new(fish());
        let id = ObjectId::new();
        batch.add(&json!({ "name": "red fish" })).unwrap();
        batch
            .document(&id.to_hex())
            .update(false, [update::increment("fins", 1)])
            .unwrap();
        batch.delete_documents_where(filter::equal("name", "old fish"));
        batch.document(&id.to_hex()).delete().unwrap();

        let kinds: Vec<&str> = batch
            .intents()
            .iter()
            .map(|intent| match intent {
                WriteIntent::Insert { .. } => "insert",
                WriteIntent::UpdateById { .. } => "update_by_id",
                WriteIntent::DeleteMany { .. } => "delete_many",
                WriteIntent::DeleteById { .. } => "delete_by_id",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["insert", "update_by_id", "delete_many", "delete_by_id"]);
    }

    #[test]
    fn test_bad_id_queues_nothing() {
        let mut batch = BulkCollection::new(fish());
        let err = batch.document("zzz").set(&json!({ "a": 1 })).unwrap_err();
        assert!(matches!(err, MongoError::Query(ref e) if e.is_invalid_object_id()));
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let result = fish().bulk(true, |_| Ok(())).await.unwrap();
        assert_eq!(result, BulkWriteResult::default());
    }

    #[tokio::test]
    async fn test_dispatch_counts() {
        let fish = fish();
        let id = ObjectId::new();
        let result = fish
            .bulk(false, |batch| {
                batch.add(&json!({ "name": "a" }))?;
                batch.add(&json!({ "name": "b" }))?;
                batch.document(&id.to_hex()).set(&json!({ "name": "c" }))?;
                batch.delete_documents_where(filter::equal("name", "a"));
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(result.inserted_count, 2);
        assert_eq!(result.upserted_count, 1);
        assert_eq!(result.deleted_count, 1);
        assert_eq!(result.upserted_ids.get(&2), Some(&bson::Bson::ObjectId(id)));
    }
}
