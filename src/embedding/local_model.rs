//! FastEmbed-backed embedding gateway

use super::{check_dimension, EmbeddingGateway};
use crate::error::{RagError, Result};
use async_trait::async_trait;
use ::fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;

const PROVIDER: &str = "fastembed";

/// FastEmbed gateway for local embedding generation
///
/// Uses all-MiniLM-L6-v2 (384 dimensions) by default. Inference is CPU-bound,
/// so each call runs on the blocking thread pool.
pub struct FastEmbedGateway {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedGateway {
    /// Create a gateway for the named model
    ///
    /// **Important**: Models are downloaded on-demand to `~/.cache/huggingface/`
    /// on first use. Supported:
    /// - all-MiniLM-L6-v2: 90MB (384 dims)
    /// - bge-small-en-v1.5: 130MB (384 dims)
    /// - bge-base-en-v1.5: 440MB (768 dims)
    pub fn new(model_name: &str) -> Result<Self> {
        let (embedding_model, dimension) = match model_name {
            "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
            "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
            "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
            _ => {
                return Err(RagError::InvalidConfigValue {
                    path: "embedding.model".to_string(),
                    message: format!(
                        "Unsupported model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                        model_name
                    ),
                });
            }
        };

        tracing::info!(model = model_name, dimension, "initializing embedding model");

        let init_options = InitOptions::new(embedding_model).with_show_download_progress(true);
        let model = TextEmbedding::try_new(init_options).map_err(|e| RagError::Embedding {
            provider: PROVIDER.to_string(),
            message: format!("model initialization failed: {}", e),
        })?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
            dimension,
        })
    }

    /// Create gateway with default model (all-MiniLM-L6-v2)
    pub fn with_default_model() -> Result<Self> {
        Self::new("all-MiniLM-L6-v2")
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[async_trait]
impl EmbeddingGateway for FastEmbedGateway {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| RagError::Embedding {
            provider: PROVIDER.to_string(),
            message: "no embedding generated".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.is_empty()) {
            return Err(RagError::Embedding {
                provider: PROVIDER.to_string(),
                message: "empty text in batch".to_string(),
            });
        }

        let model = Arc::clone(&self.model);
        let inputs = texts.to_vec();
        let embeddings = tokio::task::spawn_blocking(move || model.embed(inputs, None))
            .await
            .map_err(|e| RagError::Embedding {
                provider: PROVIDER.to_string(),
                message: format!("embedding task failed: {}", e),
            })?
            .map_err(|e| RagError::Embedding {
                provider: PROVIDER.to_string(),
                message: e.to_string(),
            })?;

        if embeddings.len() != texts.len() {
            return Err(RagError::Embedding {
                provider: PROVIDER.to_string(),
                message: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    embeddings.len()
                ),
            });
        }
        for embedding in &embeddings {
            check_dimension(PROVIDER, self.dimension, embedding)?;
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_rejected() {
        assert!(matches!(
            FastEmbedGateway::new("word2vec"),
            Err(RagError::InvalidConfigValue { .. })
        ));
    }

    #[tokio::test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    async fn test_single_embedding() {
        let gateway = FastEmbedGateway::with_default_model().unwrap();
        let embedding = gateway
            .embed("This is a test sentence for embedding.")
            .await
            .unwrap();
        assert_eq!(embedding.len(), 384);

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 0.1);
    }

    #[tokio::test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    async fn test_batch_embedding() {
        let gateway = FastEmbedGateway::with_default_model().unwrap();
        let texts = vec![
            "First test sentence.".to_string(),
            "Second test sentence.".to_string(),
            "Third test sentence.".to_string(),
        ];
        let embeddings = gateway.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 3);
        assert!(embeddings.iter().all(|e| e.len() == 384));
    }

    #[tokio::test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    async fn test_empty_text() {
        let gateway = FastEmbedGateway::with_default_model().unwrap();
        assert!(gateway.embed("").await.is_err());
    }
}
