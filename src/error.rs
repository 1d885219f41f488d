use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for ragdesk
#[derive(Error, Debug)]
pub enum RagError {
    /// Document format has no loader
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// Bad chunker or pipeline parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Owner or document id rejected
    #[error("Invalid {kind} id: {value:?}")]
    InvalidId { kind: &'static str, value: String },

    /// Document normalized to empty text
    #[error("Document {document_id} contains no text")]
    EmptyDocument { document_id: String },

    /// Embedding gateway failure
    #[error("Embedding failure ({provider}): {message}")]
    Embedding { provider: String, message: String },

    /// Generation gateway failure
    #[error("Generation failure ({provider}): {message}")]
    Generation { provider: String, message: String },

    /// Gateway call exceeded its bound
    #[error("{operation} timed out after {limit:?}")]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },

    /// Caller cancelled the operation
    #[error("{0} cancelled")]
    Cancelled(&'static str),

    /// Owner collection storage failure
    #[error("Index I/O failure for owner {owner}: {message}")]
    IndexIo { owner: String, message: String },

    /// Vector length does not match the collection
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Stored row failed verification
    #[error("Corrupt record {id}: {message}")]
    CorruptRecord { id: i64, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Whether retrying the same call may succeed.
    ///
    /// Storage and gateway failures are transient; format, configuration and
    /// data-shape problems are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::Embedding { .. }
                | RagError::Generation { .. }
                | RagError::Timeout { .. }
                | RagError::IndexIo { .. }
                | RagError::Io { .. }
                | RagError::Database(_)
        )
    }

    pub(crate) fn index_io(owner: impl ToString, message: impl Into<String>) -> Self {
        RagError::IndexIo {
            owner: owner.to_string(),
            message: message.into(),
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for ragdesk operations
pub type Result<T> = std::result::Result<T, RagError>;
