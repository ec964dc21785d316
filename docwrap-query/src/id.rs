//! Document identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{QueryError, QueryResult};

/// A 12-byte document identifier, written as 24 hexadecimal characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId([u8; 12]);

impl DocumentId {
    /// Create an identifier from raw bytes.
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Parse an identifier from its hexadecimal form.
    ///
    /// ```rust
    /// use docwrap_query::DocumentId;
    ///
    /// let id = DocumentId::parse_str("0123456789abcdef01234567").unwrap();
    /// assert_eq!(id.to_hex(), "0123456789abcdef01234567");
    ///
    /// assert!(DocumentId::parse_str("not-an-id").is_err());
    /// ```
    pub fn parse_str(s: &str) -> QueryResult<Self> {
        if s.len() != 24 {
            return Err(QueryError::invalid_object_id(s));
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| QueryError::invalid_object_id(s))?;
        Ok(Self(bytes))
    }

    /// Get the raw bytes.
    pub const fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Lowercase hexadecimal form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for DocumentId {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.to_hex())
    }
}

impl Serialize for DocumentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip_uppercase() {
        let id: DocumentId = "0123456789ABCDEF01234567".parse().unwrap();
        assert_eq!(id.to_string(), "0123456789abcdef01234567");
    }

    #[test]
    fn test_rejects_wrong_length_and_non_hex() {
        assert!(DocumentId::parse_str("").is_err());
        assert!(DocumentId::parse_str("0123456789abcdef0123456").is_err());
        assert!(DocumentId::parse_str("0123456789abcdef012345678").is_err());

        let err = DocumentId::parse_str("zz23456789abcdef01234567").unwrap_err();
        assert!(err.is_invalid_object_id());
    }
}
