//! ragdesk - Per-user retrieval-augmented question answering
//!
//! Each user owns a private, persistent collection of embedded document
//! chunks. Documents are chunked and embedded on ingest; questions are
//! answered by a language model from the most similar chunks, with the
//! source documents cited.

pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod gateway;
pub mod generation;
pub mod index;
pub mod loader;
pub mod pipeline;
pub mod retrieval;
pub mod scheduler;
pub mod synthesis;
pub mod types;

pub use error::{RagError, Result};
pub use pipeline::{IngestReport, RagPipeline};
pub use synthesis::{Citation, QueryResponse, QueryStatus};
pub use types::{DocumentId, OwnerId};
