//! The root handle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::ConnectConfig;
use crate::context::Context;
use crate::database::Database;
use crate::error::{ErrorClass, MongoError, MongoResult};
use crate::memory::MemoryStore;
use crate::mongo::MongoStore;
use crate::store::DocumentStore;

/// A handle to a document store.
///
/// Cloning is cheap: clones share the store. Every handle derived from a
/// client ([`Database`], [`Collection`](crate::Collection), ...) carries the
/// client's [`Context`].
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn DocumentStore>,
    ctx: Context,
}

impl Client {
    /// Create a client over any store.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            ctx: Context::new(),
        }
    }

    /// Create a client over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Create a client over a MongoDB deployment.
    ///
    /// `operation_timeout` from the configuration becomes the client's
    /// per-call time limit.
    pub async fn connect_with(config: ConnectConfig) -> MongoResult<Self> {
        let store = MongoStore::connect(&config).await?;
        let client = Self::new(Arc::new(store));
        info!(
            uri = %config.uri,
            operation_timeout_ms = config.operation_timeout.map(|t| t.as_millis() as u64),
            "client created"
        );
        Ok(match config.operation_timeout {
            Some(timeout) => client.with_timeout(timeout),
            None => client,
        })
    }

    /// A copy whose store calls fail with [`MongoError::Timeout`] after
    /// `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_context(self.ctx.with_timeout(timeout))
    }

    /// The context store calls run under.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Get a database handle.
    pub fn database(&self, name: &str) -> Database {
        Database::new(self.clone(), name)
    }

    /// Check that the store is reachable.
    pub async fn ping(&self) -> MongoResult<()> {
        debug!("ping");
        self.ctx.run(self.store.ping()).await
    }

    pub(crate) fn with_context(&self, ctx: Context) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ctx,
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("ctx", &self.ctx).finish()
    }
}

/// Connect to a MongoDB deployment and check it answers within `timeout`.
///
/// ```rust,no_run
/// # async fn demo() -> docwrap_mongodb::MongoResult<()> {
/// use std::time::Duration;
///
/// let client = docwrap_mongodb::connect("mongodb://localhost:27017", Duration::from_secs(5)).await?;
/// let fish = client.database("aquarium").collection("fish");
/// # Ok(())
/// # }
/// ```
pub async fn connect(uri: &str, timeout: Duration) -> MongoResult<Client> {
    let config = ConnectConfig::builder()
        .uri(uri)
        .connect_timeout(timeout)
        .server_selection_timeout(timeout)
        .build()?;
    let client = Client::connect_with(config).await?;

    match tokio::time::timeout(timeout, client.ping()).await {
        Err(_) => Err(MongoError::Timeout(timeout.as_millis() as u64)),
        Ok(Err(err)) if err.class() == ErrorClass::Transport && !err.is_timeout() => Err(
            MongoError::connection(format!("failed to reach {}: {}", uri, err)),
        ),
        Ok(Err(err)) => Err(err),
        Ok(Ok(())) => Ok(client),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_ping() {
        let client = Client::in_memory();
        client.ping().await.unwrap();
        assert!(!client.context().in_transaction());
    }

    #[test]
    fn test_with_timeout_shares_store() {
        let client = Client::in_memory();
        let limited = client.with_timeout(Duration::from_millis(50));
        assert_eq!(limited.context().timeout(), Some(Duration::from_millis(50)));
        assert!(Arc::ptr_eq(client.store(), limited.store()));
        assert_eq!(client.context().timeout(), None);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_uri() {
        let err = connect("http://localhost", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, MongoError::Config(_)));
    }
}
