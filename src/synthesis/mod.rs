//! Prompt construction, answer generation and citation extraction

use crate::gateway;
use crate::generation::GenerationGateway;
use crate::retrieval::Retrieval;
use crate::types::ScoredChunk;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Answer returned when retrieval finds nothing
pub const NO_MATCHES_ANSWER: &str = "No relevant documents found.";

/// Answer returned when the query could not be completed
pub const QUERY_FAILED_ANSWER: &str = "Error during query.";

/// Citation kind attached to every answer citation
pub const PERSONAL_DOCUMENT: &str = "personal_document";

const UNKNOWN_SOURCE: &str = "Unknown";

/// How a query ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Answered,
    NoMatches,
    Failed,
}

/// A source document cited by an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Citation {
    pub fn personal_document(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            kind: PERSONAL_DOCUMENT.to_string(),
        }
    }
}

/// Result of a question against an owner's documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub status: QueryStatus,
}

impl QueryResponse {
    pub fn no_matches() -> Self {
        Self {
            answer: NO_MATCHES_ANSWER.to_string(),
            citations: Vec::new(),
            status: QueryStatus::NoMatches,
        }
    }

    pub fn failed() -> Self {
        Self {
            answer: QUERY_FAILED_ANSWER.to_string(),
            citations: Vec::new(),
            status: QueryStatus::Failed,
        }
    }
}

/// Render the generation prompt; chunk texts are joined by a blank line in
/// retrieval order
pub fn build_prompt(question: &str, chunks: &[ScoredChunk]) -> String {
    let context = chunks
        .iter()
        .map(|c| c.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are a helpful assistant answering questions based on user's documents.\n\n\
         Context:\n{}\n\n\
         Question: {}\n\n\
         Answer:",
        context, question
    )
}

/// Base names of the chunks' sources, first occurrence only
pub fn extract_citations(chunks: &[ScoredChunk]) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    for scored in chunks {
        let title = source_title(&scored.chunk.source);
        if !citations.iter().any(|c| c.title == title) {
            citations.push(Citation::personal_document(title));
        }
    }
    citations
}

fn source_title(source: &str) -> String {
    if source.trim().is_empty() {
        return UNKNOWN_SOURCE.to_string();
    }
    // Sources may come from either platform's paths
    let normalized = source.replace('\\', "/");
    Path::new(&normalized)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_SOURCE.to_string())
}

/// Turns retrieved chunks into an answer with citations
#[derive(Clone)]
pub struct AnswerSynthesizer {
    generator: Arc<dyn GenerationGateway>,
    timeout: Duration,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn GenerationGateway>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Answer `question` from `retrieval`.
    ///
    /// Never fails: an empty retrieval yields the no-matches answer, and any
    /// generation failure, timeout or cancellation yields the failure answer.
    pub async fn synthesize(
        &self,
        question: &str,
        retrieval: &Retrieval,
        cancel: &CancellationToken,
    ) -> QueryResponse {
        let chunks = retrieval.chunks();
        if chunks.is_empty() {
            return QueryResponse::no_matches();
        }

        let prompt = build_prompt(question, chunks);
        debug!(
            provider = self.generator.name(),
            context_chunks = chunks.len(),
            "generating answer"
        );

        match gateway::bounded(
            "generation",
            self.timeout,
            cancel,
            self.generator.generate(&prompt),
        )
        .await
        {
            Ok(answer) => QueryResponse {
                answer,
                citations: extract_citations(chunks),
                status: QueryStatus::Answered,
            },
            Err(e) => {
                warn!(provider = self.generator.name(), error = %e, "answer generation failed");
                QueryResponse::failed()
            }
        }
    }
}
