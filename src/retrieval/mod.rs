//! Fixed top-k retrieval over an owner's collection

use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::types::{OwnerId, ScoredChunk};
use std::sync::Arc;

/// Number of chunks retrieved per question unless configured otherwise
pub const DEFAULT_TOP_K: usize = 5;

/// Outcome of a retrieval; an empty collection is not an error
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    Empty,
    /// Chunks in descending similarity order
    Hits(Vec<ScoredChunk>),
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        matches!(self, Retrieval::Empty)
    }

    pub fn len(&self) -> usize {
        match self {
            Retrieval::Empty => 0,
            Retrieval::Hits(hits) => hits.len(),
        }
    }

    pub fn chunks(&self) -> &[ScoredChunk] {
        match self {
            Retrieval::Empty => &[],
            Retrieval::Hits(hits) => hits,
        }
    }

    pub fn into_chunks(self) -> Vec<ScoredChunk> {
        match self {
            Retrieval::Empty => Vec::new(),
            Retrieval::Hits(hits) => hits,
        }
    }
}

impl From<Vec<ScoredChunk>> for Retrieval {
    fn from(hits: Vec<ScoredChunk>) -> Self {
        if hits.is_empty() {
            Retrieval::Empty
        } else {
            Retrieval::Hits(hits)
        }
    }
}

/// Applies a fixed `k` to [`VectorIndex::query`]
#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    top_k: usize,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, top_k: usize) -> Result<Self> {
        if top_k == 0 {
            return Err(RagError::InvalidConfiguration(
                "top_k must be greater than zero".to_string(),
            ));
        }
        Ok(Self { index, top_k })
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Chunks nearest to `query_vector` in `owner`'s collection
    pub async fn retrieve(&self, owner: &OwnerId, query_vector: &[f32]) -> Result<Retrieval> {
        let hits = self.index.query(owner, query_vector, self.top_k).await?;
        tracing::debug!(owner = %owner, hits = hits.len(), "retrieved chunks");
        Ok(Retrieval::from(hits))
    }
}
