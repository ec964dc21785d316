//! Database handles.

use smol_str::SmolStr;
use tracing::debug;

use crate::client::Client;
use crate::collection::Collection;
use crate::context::Context;
use crate::error::MongoResult;

/// A handle to one database of a [`Client`].
#[derive(Debug, Clone)]
pub struct Database {
    client: Client,
    name: SmolStr,
}

impl Database {
    pub(crate) fn new(client: Client, name: impl Into<SmolStr>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    /// The database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The client this handle belongs to.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn context(&self) -> &Context {
        self.client.context()
    }

    /// Get a collection handle.
    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(self.clone(), name)
    }

    /// Drop the database and everything in it.
    pub async fn delete(&self) -> MongoResult<()> {
        let ctx = self.context();
        debug!(database = %self.name, "drop database");
        ctx.run(
            self.client
                .store()
                .drop_database(ctx.session(), &self.name),
        )
        .await
    }

    pub(crate) fn rebind(&self, client: Client) -> Self {
        Self {
            client,
            name: self.name.clone(),
        }
    }
}
