//! Iteration over query results.

use bson::{Bson, Document};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{MongoError, MongoResult};
use crate::store::{CursorSource, Namespace};
use crate::types::from_bson_document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fresh,
    Positioned,
    Exhausted,
    Closed,
}

/// A forward-only iterator over a server-side result stream.
///
/// Call [`advance`](Self::advance) before reading each document and
/// [`close`](Self::close) when done. Reading before the first advance, after
/// the stream is exhausted, or after closing is a usage error.
///
/// ```rust
/// # async fn demo(fish: docwrap_mongodb::Collection) -> docwrap_mongodb::MongoResult<()> {
/// let mut docs = fish.document_iterator().await?;
/// while docs.advance().await? {
///     println!("{:?}", docs.id()?);
/// }
/// docs.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct DocumentIterator {
    source: Option<Box<dyn CursorSource>>,
    ctx: Context,
    namespace: Namespace,
    state: State,
}

impl DocumentIterator {
    pub(crate) fn new(source: Box<dyn CursorSource>, ctx: Context, namespace: Namespace) -> Self {
        Self {
            source: Some(source),
            ctx,
            namespace,
            state: State::Fresh,
        }
    }

    /// The collection the results come from.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Check if the iterator has been closed.
    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Move to the next document.
    ///
    /// Returns `false` once the stream is exhausted; the iterator must still
    /// be closed.
    pub async fn advance(&mut self) -> MongoResult<bool> {
        let source = match (self.state, self.source.as_mut()) {
            (State::Closed, _) | (_, None) => {
                return Err(MongoError::usage("advance called on a closed iterator"));
            }
            (State::Exhausted, Some(_)) => return Ok(false),
            (_, Some(source)) => source,
        };

        let more = self.ctx.run(source.advance()).await?;
        self.state = if more {
            State::Positioned
        } else {
            State::Exhausted
        };
        Ok(more)
    }

    fn positioned(&self) -> MongoResult<&dyn CursorSource> {
        match (self.state, self.source.as_deref()) {
            (State::Positioned, Some(source)) => Ok(source),
            (State::Fresh, _) => Err(MongoError::usage(
                "no current document: advance has not been called",
            )),
            (State::Exhausted, _) => Err(MongoError::usage(
                "no current document: the iterator is exhausted",
            )),
            _ => Err(MongoError::usage("the iterator has been closed")),
        }
    }

    /// The current document.
    pub fn data(&self) -> MongoResult<Document> {
        self.positioned()?.current()
    }

    /// Deserialize the current document.
    pub fn decode_into<T: DeserializeOwned>(&self) -> MongoResult<T> {
        from_bson_document(self.data()?)
    }

    /// The identifier of the current document as a hexadecimal string.
    ///
    /// `None` when the document has no `_id` (for example after a projection
    /// that excludes it).
    pub fn id(&self) -> MongoResult<Option<String>> {
        Ok(match self.data()?.get("_id") {
            None => None,
            Some(Bson::ObjectId(oid)) => Some(oid.to_hex()),
            Some(Bson::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        })
    }

    /// Release the stream. Closing twice is a usage error.
    pub async fn close(&mut self) -> MongoResult<()> {
        let mut source = self
            .source
            .take()
            .ok_or_else(|| MongoError::usage("the iterator is already closed"))?;
        self.state = State::Closed;
        debug!(namespace = %self.namespace, "close iterator");
        self.ctx.run(source.close()).await
    }
}

impl std::fmt::Debug for DocumentIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentIterator")
            .field("namespace", &self.namespace)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for DocumentIterator {
    fn drop(&mut self) {
        if self.source.is_some() {
            warn!(
                namespace = %self.namespace,
                "document iterator dropped without close; releasing its stream"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::VecCursor;
    use bson::doc;
    use bson::oid::ObjectId;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    fn iterator(docs: Vec<Document>) -> DocumentIterator {
        DocumentIterator::new(
            Box::new(VecCursor::new(docs)),
            Context::new(),
            Namespace::new("app", "fish"),
        )
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Fish {
        name: String,
    }

    #[tokio::test]
    async fn test_read_before_advance_is_usage_error() {
        let mut docs = iterator(vec![doc! { "name": "red" }]);
        assert!(docs.data().unwrap_err().is_usage());
        assert!(docs.id().unwrap_err().is_usage());
        docs.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_iterate_then_exhaust() {
        let oid = ObjectId::new();
        let mut docs = iterator(vec![doc! { "_id": oid, "name": "red" }]);

        assert!(docs.advance().await.unwrap());
        assert_eq!(docs.decode_into::<Fish>().unwrap(), Fish { name: "red".into() });
        assert_eq!(docs.id().unwrap(), Some(oid.to_hex()));

        assert!(!docs.advance().await.unwrap());
        assert!(docs.data().unwrap_err().is_usage());
        assert!(!docs.advance().await.unwrap());
        docs.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_use_after_close() {
        let mut docs = iterator(vec![doc! { "name": "red" }]);
        docs.close().await.unwrap();
        assert!(docs.is_closed());
        assert!(docs.advance().await.unwrap_err().is_usage());
        assert!(docs.data().unwrap_err().is_usage());
        assert!(docs.close().await.unwrap_err().is_usage());
    }

    #[tokio::test]
    async fn test_missing_id() {
        let mut docs = iterator(vec![doc! { "name": "red" }]);
        assert!(docs.advance().await.unwrap());
        assert_eq!(docs.id().unwrap(), None);
        docs.close().await.unwrap();
    }
}
