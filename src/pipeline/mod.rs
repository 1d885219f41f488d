//! Ingestion and query orchestration
//!
//! Ingestion runs load → normalize → chunk → embed → index; a query runs
//! embed → retrieve → synthesize. Ingestion either commits every chunk of a
//! document or none of them. Queries never fail outright: recoverable
//! failures come back as a sentinel [`QueryResponse`].

use crate::chunking::Chunker;
use crate::config::Config;
use crate::embedding::{self, EmbeddingGateway};
use crate::error::{RagError, Result};
use crate::gateway;
use crate::generation::GenerationGateway;
use crate::index::VectorIndex;
use crate::loader::{normalize_text, DocumentFormat, DocumentLoader, PlainTextLoader};
use crate::retrieval::{Retrieval, Retriever, DEFAULT_TOP_K};
use crate::synthesis::{AnswerSynthesizer, QueryResponse};
use crate::types::{DocumentId, EmbeddedChunk, OwnerId};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_EMBEDDING_BATCH: usize = 32;

/// Summary of a committed ingestion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub owner: OwnerId,
    pub document_id: DocumentId,
    pub source: String,
    pub format: DocumentFormat,
    pub chunk_count: usize,
}

/// Per-owner retrieval-augmented question answering over uploaded documents
pub struct RagPipeline {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingGateway>,
    loader: Arc<dyn DocumentLoader>,
    chunker: Chunker,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
    embedding_timeout: Duration,
    embedding_batch: usize,
}

impl RagPipeline {
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Build a pipeline from configuration around the given gateways
    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn EmbeddingGateway>,
        generator: Arc<dyn GenerationGateway>,
    ) -> Result<Self> {
        Self::builder()
            .index(Arc::new(VectorIndex::with_max_open(
                config.collections_dir(),
                config.storage.max_open_collections,
            )))
            .embedder(embedder)
            .generator(generator)
            .chunker(Chunker::new(
                config.chunking.chunk_size,
                config.chunking.chunk_overlap,
            )?)
            .top_k(config.retrieval.top_k)
            .embedding_timeout(config.embedding.timeout())
            .embedding_batch_size(config.embedding.batch_size)
            .generation_timeout(config.generation.timeout())
            .build()
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Ingest the file at `path`, returning the number of chunks stored or
    /// 0 on any failure
    pub async fn ingest(&self, owner: &OwnerId, path: &Path, document_id: &DocumentId) -> usize {
        match self.try_ingest(owner, path, document_id).await {
            Ok(report) => report.chunk_count,
            Err(e) => {
                error!(
                    owner = %owner,
                    document_id = %document_id,
                    path = %path.display(),
                    error = %e,
                    "ingestion failed"
                );
                0
            }
        }
    }

    /// Ingest the file at `path`, resolving its format from the extension
    pub async fn try_ingest(
        &self,
        owner: &OwnerId,
        path: &Path,
        document_id: &DocumentId,
    ) -> Result<IngestReport> {
        self.try_ingest_with_cancel(owner, path, document_id, &CancellationToken::new())
            .await
    }

    pub async fn try_ingest_with_cancel(
        &self,
        owner: &OwnerId,
        path: &Path,
        document_id: &DocumentId,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let format = DocumentFormat::from_path(path)?;
        let bytes = tokio::fs::read(path).await.map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to read document: {}", path.display()),
        })?;
        let source = path.display().to_string();

        self.ingest_bytes_with_cancel(owner, document_id, &bytes, format, &source, cancel)
            .await
    }

    /// Ingest an in-memory document with a declared format and source label
    pub async fn ingest_bytes(
        &self,
        owner: &OwnerId,
        document_id: &DocumentId,
        bytes: &[u8],
        format: DocumentFormat,
        source: &str,
    ) -> Result<IngestReport> {
        self.ingest_bytes_with_cancel(
            owner,
            document_id,
            bytes,
            format,
            source,
            &CancellationToken::new(),
        )
        .await
    }

    /// Ingest an in-memory document.
    ///
    /// `cancel` is honoured up to the index commit; a commit that has
    /// started always completes.
    pub async fn ingest_bytes_with_cancel(
        &self,
        owner: &OwnerId,
        document_id: &DocumentId,
        bytes: &[u8],
        format: DocumentFormat,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let raw = self.loader.load(bytes, format).await?;
        let text = normalize_text(&raw);
        if text.is_empty() {
            return Err(RagError::EmptyDocument {
                document_id: document_id.to_string(),
            });
        }

        let texts: Vec<String> = self
            .chunker
            .split(&text)
            .into_iter()
            .map(|chunk| chunk.text)
            .collect();
        debug!(
            owner = %owner,
            document_id = %document_id,
            chunk_count = texts.len(),
            "document chunked"
        );

        let vectors = self.embed_chunks(&texts, cancel).await?;
        let chunks: Vec<EmbeddedChunk> = texts
            .into_iter()
            .zip(vectors)
            .map(|(text, vector)| EmbeddedChunk::new(text, vector))
            .collect();

        if cancel.is_cancelled() {
            return Err(RagError::Cancelled("ingestion"));
        }
        let chunk_count = self.index.add(owner, document_id, source, chunks).await?;

        info!(
            owner = %owner,
            document_id = %document_id,
            format = %format,
            chunk_count,
            "document ingested"
        );
        Ok(IngestReport {
            owner: owner.clone(),
            document_id: document_id.clone(),
            source: source.to_string(),
            format,
            chunk_count,
        })
    }

    async fn embed_chunks(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>> {
        let expected = self.embedder.dimension();
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.embedding_batch) {
            let embedded = gateway::bounded(
                "embedding",
                self.embedding_timeout,
                cancel,
                self.embedder.embed_batch(batch),
            )
            .await?;

            if embedded.len() != batch.len() {
                return Err(RagError::Embedding {
                    provider: self.embedder.name().to_string(),
                    message: format!(
                        "expected {} vectors, got {}",
                        batch.len(),
                        embedded.len()
                    ),
                });
            }
            for vector in &embedded {
                embedding::check_dimension(self.embedder.name(), expected, vector)?;
            }
            vectors.extend(embedded);
        }

        Ok(vectors)
    }

    /// Answer `question` from `owner`'s documents
    pub async fn query(&self, owner: &OwnerId, question: &str) -> QueryResponse {
        self.query_with_cancel(owner, question, &CancellationToken::new())
            .await
    }

    pub async fn query_with_cancel(
        &self,
        owner: &OwnerId,
        question: &str,
        cancel: &CancellationToken,
    ) -> QueryResponse {
        let retrieval = match self.search_with_cancel(owner, question, cancel).await {
            Ok(retrieval) => retrieval,
            Err(e) => {
                warn!(owner = %owner, error = %e, "query failed before generation");
                return QueryResponse::failed();
            }
        };

        let response = self.synthesizer.synthesize(question, &retrieval, cancel).await;
        info!(
            owner = %owner,
            status = ?response.status,
            citations = response.citations.len(),
            "query answered"
        );
        response
    }

    /// Retrieve the chunks nearest to `question` without generating an answer
    pub async fn search(&self, owner: &OwnerId, question: &str) -> Result<Retrieval> {
        self.search_with_cancel(owner, question, &CancellationToken::new())
            .await
    }

    async fn search_with_cancel(
        &self,
        owner: &OwnerId,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<Retrieval> {
        let vector = gateway::bounded(
            "embedding",
            self.embedding_timeout,
            cancel,
            self.embedder.embed(question),
        )
        .await?;
        self.retriever.retrieve(owner, &vector).await
    }

    /// Remove all chunks of a document; `false` if storage failed
    pub async fn delete_document(&self, owner: &OwnerId, document_id: &DocumentId) -> bool {
        match self.index.delete_by_document(owner, document_id).await {
            Ok(_) => true,
            Err(e) => {
                error!(owner = %owner, document_id = %document_id, error = %e, "delete failed");
                false
            }
        }
    }

    /// Destroy the owner's whole collection; `false` if storage failed
    pub async fn clear_all(&self, owner: &OwnerId) -> bool {
        match self.index.clear(owner).await {
            Ok(()) => true,
            Err(e) => {
                error!(owner = %owner, error = %e, "clear failed");
                false
            }
        }
    }

    /// Chunks stored for the owner; 0 if the count could not be read
    pub async fn get_count(&self, owner: &OwnerId) -> usize {
        match self.index.count(owner).await {
            Ok(count) => count,
            Err(e) => {
                error!(owner = %owner, error = %e, "count failed");
                0
            }
        }
    }
}

/// Builder for [`RagPipeline`]
pub struct RagPipelineBuilder {
    index: Option<Arc<VectorIndex>>,
    embedder: Option<Arc<dyn EmbeddingGateway>>,
    generator: Option<Arc<dyn GenerationGateway>>,
    loader: Arc<dyn DocumentLoader>,
    chunker: Chunker,
    top_k: usize,
    embedding_timeout: Duration,
    embedding_batch: usize,
    generation_timeout: Duration,
}

impl Default for RagPipelineBuilder {
    fn default() -> Self {
        Self {
            index: None,
            embedder: None,
            generator: None,
            loader: Arc::new(PlainTextLoader),
            chunker: Chunker::default(),
            top_k: DEFAULT_TOP_K,
            embedding_timeout: DEFAULT_GATEWAY_TIMEOUT,
            embedding_batch: DEFAULT_EMBEDDING_BATCH,
            generation_timeout: DEFAULT_GATEWAY_TIMEOUT,
        }
    }
}

impl RagPipelineBuilder {
    pub fn index(mut self, index: Arc<VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingGateway>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn GenerationGateway>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn loader(mut self, loader: Arc<dyn DocumentLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn embedding_timeout(mut self, timeout: Duration) -> Self {
        self.embedding_timeout = timeout;
        self
    }

    pub fn embedding_batch_size(mut self, batch: usize) -> Self {
        self.embedding_batch = batch;
        self
    }

    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<RagPipeline> {
        let missing = |what: &str| RagError::InvalidConfiguration(format!("{} is required", what));

        let index = self.index.ok_or_else(|| missing("index"))?;
        let embedder = self.embedder.ok_or_else(|| missing("embedder"))?;
        let generator = self.generator.ok_or_else(|| missing("generator"))?;
        if self.embedding_batch == 0 {
            return Err(RagError::InvalidConfiguration(
                "embedding batch size must be greater than zero".to_string(),
            ));
        }

        Ok(RagPipeline {
            retriever: Retriever::new(Arc::clone(&index), self.top_k)?,
            synthesizer: AnswerSynthesizer::new(generator, self.generation_timeout),
            index,
            embedder,
            loader: self.loader,
            chunker: self.chunker,
            embedding_timeout: self.embedding_timeout,
            embedding_batch: self.embedding_batch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::synthesis::QueryStatus;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct EchoGenerator;

    #[async_trait]
    impl GenerationGateway for EchoGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            Ok(format!("{} chars of prompt", prompt.len()))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    fn pipeline(temp: &TempDir) -> RagPipeline {
        RagPipeline::builder()
            .index(Arc::new(VectorIndex::new(temp.path())))
            .embedder(Arc::new(HashingEmbedder::new(64).unwrap()))
            .generator(Arc::new(EchoGenerator))
            .chunker(Chunker::new(40, 10).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_gateways() {
        let temp = TempDir::new().unwrap();
        let result = RagPipeline::builder()
            .index(Arc::new(VectorIndex::new(temp.path())))
            .generator(Arc::new(EchoGenerator))
            .build();
        assert!(matches!(result, Err(RagError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_ingest_file_and_query() {
        let temp = TempDir::new().unwrap();
        let pipeline = pipeline(&temp);
        let owner = OwnerId::from(1);

        let path = temp.path().join("garden.txt");
        std::fs::write(&path, "Tomatoes need full sun and regular watering.\r\n").unwrap();

        let stored = pipeline.ingest(&owner, &path, &DocumentId::from(1)).await;
        assert_eq!(stored, 2);
        assert_eq!(pipeline.get_count(&owner).await, 2);

        let response = pipeline.query(&owner, "How much sun do tomatoes need?").await;
        assert_eq!(response.status, QueryStatus::Answered);
        assert_eq!(response.citations.len(), 1);
        assert_eq!(response.citations[0].title, "garden.txt");
    }

    #[tokio::test]
    async fn test_unsupported_format_stores_nothing() {
        let temp = TempDir::new().unwrap();
        let pipeline = pipeline(&temp);
        let owner = OwnerId::from(1);

        let path = temp.path().join("sheet.xlsx");
        std::fs::write(&path, "cells").unwrap();
        let result = pipeline.try_ingest(&owner, &path, &DocumentId::from(1)).await;
        assert!(matches!(result, Err(RagError::UnsupportedFormat(_))));

        let result = pipeline
            .ingest_bytes(&owner, &DocumentId::from(2), b"%PDF", DocumentFormat::Pdf, "a.pdf")
            .await;
        assert!(matches!(result, Err(RagError::UnsupportedFormat(_))));
        assert_eq!(pipeline.get_count(&owner).await, 0);
    }

    #[tokio::test]
    async fn test_empty_document_is_distinct_error() {
        let temp = TempDir::new().unwrap();
        let pipeline = pipeline(&temp);
        let owner = OwnerId::from(1);

        let result = pipeline
            .ingest_bytes(&owner, &DocumentId::from(1), b" \r\n\n ", DocumentFormat::Txt, "blank.txt")
            .await;
        assert!(matches!(result, Err(RagError::EmptyDocument { .. })));

        let path = temp.path().join("blank.txt");
        std::fs::write(&path, "\n\n").unwrap();
        assert_eq!(pipeline.ingest(&owner, &path, &DocumentId::from(2)).await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_ingest_commits_nothing() {
        let temp = TempDir::new().unwrap();
        let pipeline = pipeline(&temp);
        let owner = OwnerId::from(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pipeline
            .ingest_bytes_with_cancel(
                &owner,
                &DocumentId::from(1),
                b"some text to embed",
                DocumentFormat::Txt,
                "a.txt",
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(RagError::Cancelled(_))));
        assert_eq!(pipeline.get_count(&owner).await, 0);
    }

    #[tokio::test]
    async fn test_delete_and_clear_report_success() {
        let temp = TempDir::new().unwrap();
        let pipeline = pipeline(&temp);
        let owner = OwnerId::from(2);

        assert!(pipeline.delete_document(&owner, &DocumentId::from(1)).await);
        assert!(pipeline.clear_all(&owner).await);

        pipeline
            .ingest_bytes(&owner, &DocumentId::from(1), b"hello world", DocumentFormat::Txt, "h.txt")
            .await
            .unwrap();
        assert!(pipeline.clear_all(&owner).await);
        assert_eq!(pipeline.get_count(&owner).await, 0);
    }
}
