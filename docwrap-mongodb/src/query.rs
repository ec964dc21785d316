//! Queries over a collection.

use docwrap_query::{Document, Filter, Pipeline, SortDirection};
use tracing::debug;

use crate::collection::Collection;
use crate::cursor::DocumentIterator;
use crate::error::MongoResult;
use crate::types::pipeline_to_bson;

/// A pipeline bound to the collection it runs against.
///
/// Stage methods return a new query and leave the receiver untouched, so a
/// query can be branched:
///
/// ```rust
/// # fn demo(fish: docwrap_mongodb::Collection) {
/// use docwrap_query::filter;
///
/// let red = fish.where_(filter::equal("color", "red"));
/// let first_red = red.limit(1);
/// let red_count = red.count("n");
/// assert_eq!(red.pipeline().len(), 1);
/// assert_eq!(first_red.pipeline().len(), 2);
/// assert_eq!(red_count.pipeline().len(), 2);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CollectionQuery {
    collection: Collection,
    pipeline: Pipeline,
}

impl CollectionQuery {
    pub(crate) fn new(collection: Collection, pipeline: Pipeline) -> Self {
        Self {
            collection,
            pipeline,
        }
    }

    /// The collection the query runs against.
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// The stages accumulated so far.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn with(&self, pipeline: Pipeline) -> Self {
        Self::new(self.collection.clone(), pipeline)
    }

    pub(crate) fn rebind(&self, collection: Collection) -> Self {
        Self::new(collection, self.pipeline.clone())
    }

    /// Keep only documents that also match `filter`.
    pub fn and_where(&self, filter: Filter) -> Self {
        self.with(self.pipeline.and_where(filter))
    }

    /// Skip the first `n` documents.
    pub fn skip(&self, n: u64) -> Self {
        self.with(self.pipeline.skip(n))
    }

    /// Keep at most `n` documents.
    pub fn limit(&self, n: u64) -> Self {
        self.with(self.pipeline.limit(n))
    }

    /// Sort by the given keys; earlier keys take precedence.
    pub fn sort<S: Into<String>>(&self, keys: impl IntoIterator<Item = (S, SortDirection)>) -> Self {
        self.with(self.pipeline.sort(keys))
    }

    /// Replace the documents with their count, stored under `field`.
    pub fn count(&self, field: &str) -> Self {
        self.with(self.pipeline.count(field))
    }

    /// Pick `size` documents at random.
    pub fn sample(&self, size: u64) -> Self {
        self.with(self.pipeline.sample(size))
    }

    /// Left-outer join against another collection of the same database.
    pub fn join(&self, from: &str, local_field: &str, foreign_field: &str, as_field: &str) -> Self {
        self.with(self.pipeline.join(from, local_field, foreign_field, as_field))
    }

    /// Reshape documents.
    pub fn modify(&self, projection: Document) -> Self {
        self.with(self.pipeline.modify(projection))
    }

    /// Add or overwrite computed fields.
    pub fn add_fields(&self, fields: Document) -> Self {
        self.with(self.pipeline.add_fields(fields))
    }

    /// Run the pipeline and iterate over its output.
    pub async fn document_iterator(&self) -> MongoResult<DocumentIterator> {
        let namespace = self.collection.namespace();
        let ctx = self.collection.context();
        debug!(
            namespace = %namespace,
            stages = self.pipeline.len(),
            "aggregate"
        );
        let source = ctx
            .run(self.collection.store().aggregate(
                ctx.session(),
                &namespace,
                pipeline_to_bson(&self.pipeline),
            ))
            .await?;
        Ok(DocumentIterator::new(source, ctx.clone(), namespace))
    }
}
