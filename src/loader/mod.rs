//! Document format resolution and text extraction
//!
//! The format is resolved once from the declared type (usually a file
//! extension). Extraction is delegated to a [`DocumentLoader`]; this crate
//! ships [`PlainTextLoader`] and leaves PDF/DOCX readers to the host.

use crate::error::{RagError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Supported input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Txt,
}

impl DocumentFormat {
    /// Resolve the format of a file from its extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| RagError::UnsupportedFormat(path.display().to_string()))?;
        ext.parse()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Txt => "txt",
        }
    }
}

impl FromStr for DocumentFormat {
    type Err = RagError;

    fn from_str(tag: &str) -> Result<Self> {
        match tag.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "docx" => Ok(DocumentFormat::Docx),
            "txt" => Ok(DocumentFormat::Txt),
            other => Err(RagError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extracts text from raw document bytes
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Return the document text, or `UnsupportedFormat` if this loader
    /// cannot read `format`
    async fn load(&self, bytes: &[u8], format: DocumentFormat) -> Result<String>;
}

/// Loader for UTF-8 plain text
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextLoader;

#[async_trait]
impl DocumentLoader for PlainTextLoader {
    async fn load(&self, bytes: &[u8], format: DocumentFormat) -> Result<String> {
        match format {
            DocumentFormat::Txt => Ok(String::from_utf8_lossy(bytes).into_owned()),
            other => Err(RagError::UnsupportedFormat(format!(
                "{} (no loader registered)",
                other
            ))),
        }
    }
}

/// Normalize extracted text before chunking.
///
/// Strips a byte-order mark, converts CRLF and lone CR to LF, collapses
/// runs of three or more newlines into one blank line, and trims the ends.
pub fn normalize_text(raw: &str) -> String {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut newline_run = 0;
    for ch in unified.chars() {
        if ch == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                out.push(ch);
            }
        } else {
            newline_run = 0;
            out.push(ch);
        }
    }

    out.trim().to_string()
}
