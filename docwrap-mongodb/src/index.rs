//! Index key kinds.

use bson::Bson;

/// How a field participates in an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Ascending order (`1`).
    Ascending,
    /// Descending order (`-1`).
    Descending,
    /// Full-text (`"text"`), required by [`filter::text_search`](docwrap_query::filter::text_search).
    Text,
}

impl IndexKind {
    /// The key pattern value.
    pub fn to_bson(self) -> Bson {
        match self {
            Self::Ascending => Bson::Int32(1),
            Self::Descending => Bson::Int32(-1),
            Self::Text => Bson::String("text".to_string()),
        }
    }
}

/// Build an index key pattern, keeping field order.
pub(crate) fn key_pattern<'a>(fields: impl IntoIterator<Item = (&'a str, IndexKind)>) -> bson::Document {
    fields
        .into_iter()
        .map(|(field, kind)| (field.to_string(), kind.to_bson()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_key_pattern_order() {
        let keys = key_pattern([("name", IndexKind::Text), ("age", IndexKind::Descending)]);
        assert_eq!(keys, doc! { "name": "text", "age": -1 });
        assert_eq!(keys.keys().next().map(String::as_str), Some("name"));
    }
}
