//! Handles to single documents.

use bson::doc;
use bson::oid::ObjectId;
use docwrap_query::{DocumentId, Update};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::collection::Collection;
use crate::error::{MongoError, MongoResult};
use crate::store::UpdateOutcome;
use crate::types::{from_bson_document, object_id, to_bson_document, update_to_bson};

/// A handle to the document with a given identifier.
///
/// Creating the handle never fails; a malformed identifier is reported by the
/// first operation as [`QueryError::InvalidObjectId`](docwrap_query::QueryError::InvalidObjectId).
#[derive(Debug, Clone)]
pub struct DocumentRef {
    collection: Collection,
    id: String,
}

impl DocumentRef {
    pub(crate) fn new(collection: Collection, id: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
        }
    }

    /// The identifier as given.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The collection the document lives in.
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// The parsed identifier.
    pub fn object_id(&self) -> MongoResult<ObjectId> {
        Ok(object_id(DocumentId::parse_str(&self.id)?))
    }

    pub(crate) fn rebind(&self, collection: Collection) -> Self {
        Self::new(collection, self.id.clone())
    }

    /// Read the document.
    ///
    /// Fails with [`MongoError::NotFound`] when no document has the id.
    pub async fn data(&self) -> MongoResult<bson::Document> {
        let oid = self.object_id()?;
        let namespace = self.collection.namespace();
        let ctx = self.collection.context();
        debug!(namespace = %namespace, id = %self.id, "find one");
        ctx.run(
            self.collection
                .store()
                .find_one(ctx.session(), &namespace, doc! { "_id": oid }),
        )
        .await?
        .ok_or_else(|| MongoError::not_found(format!("{} in {}", self.id, namespace)))
    }

    /// Read and deserialize the document.
    pub async fn get<T: DeserializeOwned>(&self) -> MongoResult<T> {
        from_bson_document(self.data().await?)
    }

    /// Replace the document's contents with `data`, creating it when missing.
    pub async fn set<T: Serialize + ?Sized>(&self, data: &T) -> MongoResult<UpdateOutcome> {
        let oid = self.object_id()?;
        let replacement = to_bson_document(data)?;
        let namespace = self.collection.namespace();
        let ctx = self.collection.context();
        debug!(namespace = %namespace, id = %self.id, "replace one");
        ctx.run(self.collection.store().replace_one(
            ctx.session(),
            &namespace,
            doc! { "_id": oid },
            replacement,
            true,
        ))
        .await
    }

    /// Apply the merged `updates` to the document.
    pub async fn update(
        &self,
        upsert: bool,
        updates: impl IntoIterator<Item = Update>,
    ) -> MongoResult<UpdateOutcome> {
        let oid = self.object_id()?;
        let update = Update::merge(updates)?;
        let namespace = self.collection.namespace();
        let ctx = self.collection.context();
        debug!(namespace = %namespace, id = %self.id, upsert, "update one");
        ctx.run(self.collection.store().update_one(
            ctx.session(),
            &namespace,
            doc! { "_id": oid },
            update_to_bson(&update),
            upsert,
        ))
        .await
    }

    /// Delete the document. Returns whether a document was removed.
    pub async fn delete(&self) -> MongoResult<bool> {
        let oid = self.object_id()?;
        let namespace = self.collection.namespace();
        let ctx = self.collection.context();
        debug!(namespace = %namespace, id = %self.id, "delete one");
        let deleted = ctx
            .run(
                self.collection
                    .store()
                    .delete_one(ctx.session(), &namespace, doc! { "_id": oid }),
            )
            .await?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use docwrap_query::update;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Fish {
        name: String,
        #[serde(default)]
        fins: i32,
    }

    fn fish() -> Collection {
        Client::in_memory().database("aquarium").collection("fish")
    }

    #[tokio::test]
    async fn test_malformed_id_fails_on_use() {
        let doc = fish().document("not-an-id");
        let err = doc.data().await.unwrap_err();
        assert!(matches!(err, MongoError::Query(ref e) if e.is_invalid_object_id()));
    }

    #[tokio::test]
    async fn test_missing_document_is_not_found() {
        let doc = fish().document(&ObjectId::new().to_hex());
        assert!(doc.get::<Fish>().await.unwrap_err().is_not_found());
        assert!(!doc.delete().await.unwrap());
    }

    #[tokio::test]
    async fn test_set_update_delete() {
        let doc = fish().document(&ObjectId::new().to_hex());
        let outcome = doc
            .set(&Fish {
                name: "red fish".into(),
                fins: 2,
            })
            .await
            .unwrap();
        assert!(outcome.upserted_id.is_some());

        doc.update(false, [update::increment("fins", 1), update::set("name", "blue fish")])
            .await
            .unwrap();
        assert_eq!(
            doc.get::<Fish>().await.unwrap(),
            Fish {
                name: "blue fish".into(),
                fins: 3
            }
        );

        assert!(doc.delete().await.unwrap());
        assert!(doc.data().await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_conflicting_updates_fail_before_sending() {
        let doc = fish().document(&ObjectId::new().to_hex());
        let err = doc
            .update(true, [update::set("a", 1), update::set("a", 2)])
            .await
            .unwrap_err();
        assert!(matches!(err, MongoError::Query(ref e) if e.is_conflicting_update()));
        assert!(doc.data().await.unwrap_err().is_not_found());
    }
}
