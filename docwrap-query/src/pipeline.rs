//! Aggregation pipeline accumulator.
//!
//! A [`Pipeline`] is an ordered list of stages. Every stage-adding method takes
//! `&self` and returns a new pipeline, so a common prefix can be branched into
//! several continuations without either branch seeing the other's stages.
//! Stages are kept in a persistent linked list: branches share their prefix
//! nodes instead of copying them.
//!
//! ```rust
//! use docwrap_query::filter;
//! use docwrap_query::pipeline::{Pipeline, SortDirection};
//!
//! let adults = Pipeline::matching(filter::greater_than_or_equal("age", 18));
//! let youngest = adults.sort([("age", SortDirection::Ascending)]).limit(10);
//! let counted = adults.count("adults");
//!
//! assert_eq!(adults.len(), 1);
//! assert_eq!(youngest.len(), 3);
//! assert_eq!(counted.len(), 2);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::filter::Filter;
use crate::value::{Document, Value};

/// Direction of a sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

impl SortDirection {
    /// The store's numeric encoding of the direction.
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }
}

/// Parameters of a left-outer join (`$lookup`).
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    /// Collection joined against.
    pub from: String,
    /// Field of the input document.
    pub local_field: String,
    /// Field of the joined collection's documents.
    pub foreign_field: String,
    /// Output array field.
    pub as_field: String,
}

/// A single pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Keep documents matching the filter.
    Match(Filter),
    /// Drop the first `n` documents.
    Skip(u64),
    /// Keep at most `n` documents.
    Limit(u64),
    /// Order by the keys, the first key taking precedence.
    Sort(Vec<(String, SortDirection)>),
    /// Replace the stream with one document holding its size under the field.
    Count(String),
    /// Pick `n` documents at random.
    Sample(u64),
    /// Attach matching documents of another collection as an array.
    Lookup(Lookup),
    /// Reshape documents (`$project`).
    Project(Document),
    /// Add or overwrite computed fields.
    AddFields(Document),
}

impl Stage {
    /// The stage operator, e.g. `$match`.
    pub fn operator(&self) -> &'static str {
        match self {
            Self::Match(_) => "$match",
            Self::Skip(_) => "$skip",
            Self::Limit(_) => "$limit",
            Self::Sort(_) => "$sort",
            Self::Count(_) => "$count",
            Self::Sample(_) => "$sample",
            Self::Lookup(_) => "$lookup",
            Self::Project(_) => "$project",
            Self::AddFields(_) => "$addFields",
        }
    }

    /// Build the stage document sent to the store.
    pub fn to_document(&self) -> Document {
        let operand = match self {
            Self::Match(filter) => Value::from(filter.clone()),
            Self::Skip(n) | Self::Limit(n) => Value::Int(saturating_i64(*n)),
            Self::Sort(keys) => Value::Document(
                keys.iter()
                    .map(|(field, dir)| (field.clone(), Value::Int(dir.as_i64())))
                    .collect(),
            ),
            Self::Count(field) => Value::String(field.clone()),
            Self::Sample(n) => Value::single("size", saturating_i64(*n)),
            Self::Lookup(lookup) => {
                let mut doc = Document::with_capacity(4);
                doc.insert("from".into(), Value::from(&lookup.from));
                doc.insert("localField".into(), Value::from(&lookup.local_field));
                doc.insert("foreignField".into(), Value::from(&lookup.foreign_field));
                doc.insert("as".into(), Value::from(&lookup.as_field));
                Value::Document(doc)
            }
            Self::Project(doc) | Self::AddFields(doc) => Value::Document(doc.clone()),
        };

        let mut doc = Document::with_capacity(1);
        doc.insert(self.operator().to_string(), operand);
        doc
    }
}

fn saturating_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

struct Node {
    stage: Stage,
    prev: Option<Arc<Node>>,
}

/// An immutable, append-only sequence of stages.
#[derive(Clone, Default)]
pub struct Pipeline {
    tail: Option<Arc<Node>>,
    len: usize,
}

impl Pipeline {
    /// A pipeline with no stages: every document passes through.
    pub fn all() -> Self {
        Self::default()
    }

    /// A pipeline seeded with a single `$match` stage.
    pub fn matching(filter: Filter) -> Self {
        Self::all().push(Stage::Match(filter))
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Return a new pipeline with `stage` appended.
    pub fn push(&self, stage: Stage) -> Self {
        Self {
            tail: Some(Arc::new(Node {
                stage,
                prev: self.tail.clone(),
            })),
            len: self.len + 1,
        }
    }

    /// Stages in call order.
    pub fn stages(&self) -> Vec<&Stage> {
        let mut stages = Vec::with_capacity(self.len);
        let mut cursor = self.tail.as_deref();
        while let Some(node) = cursor {
            stages.push(&node.stage);
            cursor = node.prev.as_deref();
        }
        stages.reverse();
        stages
    }

    /// Stage documents in call order, ready to send to the store.
    pub fn to_documents(&self) -> Vec<Document> {
        self.stages().into_iter().map(Stage::to_document).collect()
    }

    /// Add another `$match` stage.
    pub fn and_where(&self, filter: Filter) -> Self {
        self.push(Stage::Match(filter))
    }

    /// Skip the first `n` documents.
    pub fn skip(&self, n: u64) -> Self {
        self.push(Stage::Skip(n))
    }

    /// Keep at most `n` documents.
    pub fn limit(&self, n: u64) -> Self {
        self.push(Stage::Limit(n))
    }

    /// Sort by the given keys; earlier keys take precedence.
    pub fn sort<S: Into<String>>(
        &self,
        keys: impl IntoIterator<Item = (S, SortDirection)>,
    ) -> Self {
        let keys = keys
            .into_iter()
            .map(|(field, dir)| (field.into(), dir))
            .collect();
        self.push(Stage::Sort(keys))
    }

    /// Replace the documents with their count, stored under `field`.
    pub fn count(&self, field: &str) -> Self {
        self.push(Stage::Count(field.to_string()))
    }

    /// Pick `size` documents at random.
    pub fn sample(&self, size: u64) -> Self {
        self.push(Stage::Sample(size))
    }

    /// Left-outer join against `from`.
    ///
    /// Every document gets an array under `as_field` holding the documents of
    /// `from` whose `foreign_field` equals its `local_field`; the array is
    /// empty when nothing matches.
    pub fn join(&self, from: &str, local_field: &str, foreign_field: &str, as_field: &str) -> Self {
        self.push(Stage::Lookup(Lookup {
            from: from.to_string(),
            local_field: local_field.to_string(),
            foreign_field: foreign_field.to_string(),
            as_field: as_field.to_string(),
        }))
    }

    /// Reshape documents. Values are [`INCLUDE`](crate::expression::INCLUDE),
    /// [`EXCLUDE`](crate::expression::EXCLUDE) or expressions.
    pub fn modify(&self, projection: Document) -> Self {
        self.push(Stage::Project(projection))
    }

    /// Add or overwrite computed fields.
    pub fn add_fields(&self, fields: Document) -> Self {
        self.push(Stage::AddFields(fields))
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stages()).finish()
    }
}

impl PartialEq for Pipeline {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.stages() == other.stages()
    }
}
