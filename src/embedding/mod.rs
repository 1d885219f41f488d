//! Embedding gateway
//!
//! Converts text into fixed-length vectors. The model itself is an external
//! collaborator; this module defines the seam and two implementations:
//! - FastEmbedGateway for local ONNX models (all-MiniLM-L6-v2, 384-dim)
//! - HashingEmbedder, a deterministic offline embedder

mod hashing;
mod local_model;

pub use hashing::HashingEmbedder;
pub use local_model::FastEmbedGateway;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Converts text to fixed-length vectors
///
/// The default [`embed_batch`](EmbeddingGateway::embed_batch) calls
/// [`embed`](EmbeddingGateway::embed) sequentially; backends with native
/// batching override it.
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Length of every vector this gateway produces
    fn dimension(&self) -> usize;

    /// Provider name used in logs and errors
    fn name(&self) -> &str;
}

/// Build the embedding gateway selected by configuration
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingGateway>> {
    match config.provider.as_str() {
        "fastembed" => Ok(Arc::new(FastEmbedGateway::new(&config.model)?)),
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dimension)?)),
        other => Err(RagError::InvalidConfigValue {
            path: "embedding.provider".to_string(),
            message: format!("unknown embedding provider '{}'", other),
        }),
    }
}

pub(crate) fn check_dimension(provider: &str, expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(RagError::Embedding {
            provider: provider.to_string(),
            message: format!(
                "dimension mismatch: expected {}, got {}",
                expected,
                vector.len()
            ),
        });
    }
    Ok(())
}
