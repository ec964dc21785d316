//! Transactions over any handle.
//!
//! Every handle implements [`Transactional`]. A transaction started from a
//! handle runs its callback with a copy of the handle bound to the
//! transaction's session, so everything the callback does through that copy
//! (and through handles derived from it) belongs to the transaction.
//!
//! ```rust
//! # async fn demo(fish: docwrap_mongodb::Collection) -> docwrap_mongodb::MongoResult<()> {
//! use docwrap_mongodb::Transactional;
//! use docwrap_query::{filter, update};
//!
//! fish.transaction(|fish| async move {
//!     fish.update_documents_where(filter::equal("name", "red fish"), false, [update::increment("fins", 1)])
//!         .await?;
//!     fish.delete_documents_where(filter::equal("name", "old fish")).await?;
//!     Ok(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;

use tracing::{debug, warn};

use crate::bulk::BulkCollection;
use crate::client::Client;
use crate::collection::Collection;
use crate::database::Database;
use crate::document::DocumentRef;
use crate::error::MongoResult;
use crate::query::CollectionQuery;

/// Handles that can run a transaction.
pub trait Transactional: Clone + Send + Sync + Sized {
    /// The client at the root of this handle.
    fn client(&self) -> &Client;

    /// This handle rebuilt on top of `client`.
    fn bind(&self, client: Client) -> Self;

    /// Run `run` inside a transaction.
    ///
    /// The callback gets a copy of the handle bound to the transaction. The
    /// transaction commits when the callback succeeds; when the callback or
    /// the commit fails it is aborted and the original error returned. If
    /// the handle is already inside a transaction, the callback joins it and
    /// the outermost call decides the outcome.
    fn transaction<T, F, Fut>(&self, run: F) -> impl Future<Output = MongoResult<T>> + Send
    where
        T: Send,
        F: FnOnce(Self) -> Fut + Send,
        Fut: Future<Output = MongoResult<T>> + Send,
    {
        let handle = self.clone();
        async move {
            let client = handle.client().clone();
            client
                .run_transaction(move |bound| run(handle.bind(bound)))
                .await
        }
    }
}

impl Client {
    /// Run `run` with a copy of this client bound to a transaction.
    pub async fn run_transaction<T, F, Fut>(&self, run: F) -> MongoResult<T>
    where
        F: FnOnce(Client) -> Fut,
        Fut: Future<Output = MongoResult<T>>,
    {
        if let Some(session) = self.context().session() {
            debug!(session = %session, "joining active transaction");
            return run(self.clone()).await;
        }

        let store = self.store();
        let ctx = self.context();
        let session = ctx.run(store.start_session()).await?;
        debug!(session = %session, "transaction started");

        let outcome = match ctx.run(store.start_transaction(session)).await {
            Err(err) => Err(err),
            Ok(()) => {
                let bound = self.with_context(ctx.with_session(session));
                match run(bound).await {
                    Ok(value) => match ctx.run(store.commit_transaction(session)).await {
                        Ok(()) => {
                            debug!(session = %session, "transaction committed");
                            Ok(value)
                        }
                        Err(err) => {
                            warn!(session = %session, error = %err, "commit failed, aborting transaction");
                            abort(self, session).await;
                            Err(err)
                        }
                    },
                    Err(err) => {
                        warn!(session = %session, error = %err, "transaction callback failed, aborting");
                        abort(self, session).await;
                        Err(err)
                    }
                }
            }
        };

        if let Err(err) = ctx.run(store.end_session(session)).await {
            warn!(session = %session, error = %err, "failed to end session");
        }
        outcome
    }
}

/// Abort, logging rather than replacing the error that caused it.
async fn abort(client: &Client, session: crate::store::SessionId) {
    let ctx = client.context();
    if let Err(err) = ctx.run(client.store().abort_transaction(session)).await {
        // A failed commit may already have ended the transaction.
        debug!(session = %session, error = %err, "abort after failure did not apply");
    }
}

impl Transactional for Client {
    fn client(&self) -> &Client {
        self
    }

    fn bind(&self, client: Client) -> Self {
        client
    }
}

impl Transactional for Database {
    fn client(&self) -> &Client {
        Database::client(self)
    }

    fn bind(&self, client: Client) -> Self {
        self.rebind(client)
    }
}

impl Transactional for Collection {
    fn client(&self) -> &Client {
        self.database().client()
    }

    fn bind(&self, client: Client) -> Self {
        self.rebind(self.database().bind(client))
    }
}

impl Transactional for CollectionQuery {
    fn client(&self) -> &Client {
        self.collection().database().client()
    }

    fn bind(&self, client: Client) -> Self {
        self.rebind(self.collection().bind(client))
    }
}

impl Transactional for DocumentRef {
    fn client(&self) -> &Client {
        self.collection().database().client()
    }

    fn bind(&self, client: Client) -> Self {
        self.rebind(self.collection().bind(client))
    }
}

impl BulkCollection {
    /// Check if the batch will be sent inside a transaction.
    pub fn in_transaction(&self) -> bool {
        self.collection().context().in_transaction()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MongoError;
    use docwrap_query::filter;
    use serde_json::json;

    fn fish() -> Collection {
        Client::in_memory().database("aquarium").collection("fish")
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let fish = fish();
        fish.transaction(|fish| async move {
            assert!(fish.context().in_transaction());
            fish.add(&json!({ "name": "red fish" })).await?;
            Ok(())
        })
        .await
        .unwrap();

        let mut docs = fish.document_iterator().await.unwrap();
        assert!(docs.advance().await.unwrap());
        assert!(!docs.advance().await.unwrap());
        docs.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_callback_rolls_back() {
        let fish = fish();
        let err = fish
            .transaction(|fish| async move {
                fish.add(&json!({ "name": "red fish" })).await?;
                Err::<(), _>(MongoError::operation("changed my mind"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "operation failed: changed my mind");

        let removed = fish
            .delete_documents_where(filter::equal("name", "red fish"))
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn test_nested_transaction_joins_outer() {
        let fish = fish();
        let err = fish
            .transaction(|outer| async move {
                outer
                    .transaction(|inner| async move {
                        assert!(inner.context().in_transaction());
                        inner.add(&json!({ "name": "inner" })).await?;
                        Ok(())
                    })
                    .await?;
                Err::<(), _>(MongoError::operation("outer fails"))
            })
            .await;
        assert!(err.is_err());

        let mut docs = fish.document_iterator().await.unwrap();
        assert!(!docs.advance().await.unwrap());
        docs.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_database_transaction_binds_children() {
        let db = Client::in_memory().database("aquarium");
        db.transaction(|db| async move {
            let fish = db.collection("fish");
            assert!(fish.context().in_transaction());
            let mut batch_in_tx = false;
            fish.bulk(true, |batch| {
                batch_in_tx = batch.in_transaction();
                Ok(())
            })
            .await?;
            assert!(batch_in_tx);
            Ok(())
        })
        .await
        .unwrap();
    }
}
