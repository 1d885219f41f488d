//! Identifiers and records shared across the index, retrieval and pipeline layers

use crate::error::{RagError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_OWNER_ID_LEN: usize = 64;

fn is_valid_owner_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_OWNER_ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Owner of a collection.
///
/// The id names a directory on disk, so it is restricted to ASCII
/// alphanumerics, `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if is_valid_owner_id(&value) {
            Ok(Self(value))
        } else {
            Err(RagError::InvalidId {
                kind: "owner",
                value,
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the collection backing this owner
    pub fn collection_name(&self) -> String {
        format!("user_{}_docs", self.0)
    }

    /// Directory name of this owner's persisted collection
    pub fn storage_dir_name(&self) -> String {
        format!("user_{}", self.0)
    }
}

impl From<u64> for OwnerId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl TryFrom<String> for OwnerId {
    type Error = RagError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<OwnerId> for String {
    fn from(value: OwnerId) -> Self {
        value.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque document correlation key supplied by the record store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(RagError::InvalidId {
                kind: "document",
                value,
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for DocumentId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl TryFrom<String> for DocumentId {
    type Error = RagError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DocumentId> for String {
    fn from(value: DocumentId) -> Self {
        value.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chunk text paired with its embedding, ready for `VectorIndex::add`
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub text: String,
    pub vector: Vec<f32>,
}

impl EmbeddedChunk {
    pub fn new(text: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            text: text.into(),
            vector,
        }
    }
}

/// A chunk as persisted in an owner's collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    /// Row id; increases with insertion order
    pub id: i64,
    pub document_id: DocumentId,
    /// Dense position of this chunk within its document
    pub sequence: u32,
    /// Source label (usually the uploaded file path)
    pub source: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A stored chunk with its cosine similarity to the query vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    /// Cosine similarity in [-1.0, 1.0], higher is closer
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_id_validation() {
        assert!(OwnerId::new("42").is_ok());
        assert!(OwnerId::new("team-a_7").is_ok());
        assert!(OwnerId::new("").is_err());
        assert!(OwnerId::new("../etc").is_err());
        assert!(OwnerId::new("a/b").is_err());
        assert!(OwnerId::new("x".repeat(65)).is_err());
    }

    #[test]
    fn test_owner_paths() {
        let owner = OwnerId::from(7);
        assert_eq!(owner.storage_dir_name(), "user_7");
        assert_eq!(owner.collection_name(), "user_7_docs");
    }

    #[test]
    fn test_document_id_rejects_blank() {
        assert!(DocumentId::new("  ").is_err());
        assert_eq!(DocumentId::from(12).as_str(), "12");
    }

    #[test]
    fn test_owner_id_serde_validates() {
        let parsed: std::result::Result<OwnerId, _> = serde_json::from_str("\"../x\"");
        assert!(parsed.is_err());
        let parsed: OwnerId = serde_json::from_str("\"u1\"").unwrap();
        assert_eq!(parsed.as_str(), "u1");
    }
}
