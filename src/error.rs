//! Custom error types for scicorpus.
//!
//! This module defines all error types used throughout the library.
//! All functions return `Result<T, CorpusError>` instead of using `unwrap()`.

use thiserror::Error;

/// Main error type for scicorpus operations.
///
/// Uses `thiserror` for ergonomic error handling and automatic `Display` implementation.
#[derive(Debug, Error)]
pub enum CorpusError {
    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A raw source record could not be mapped to the canonical shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// XML document could not be decoded
    #[error("XML error: {0}")]
    Xml(String),

    /// Rate limited by external API
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// External API returned an error
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: i32,
        /// Error message from API
        message: String,
    },

    /// A whole source could not contribute to the run
    #[error("Source {source_name} unavailable: {reason}")]
    SourceUnavailable {
        /// Source label (arxiv, pubmed, crossref)
        source_name: String,
        /// Underlying failure
        reason: String,
    },

    /// Document store failure
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Store handle could not be acquired (poisoned lock, closed connection)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<quick_xml::DeError> for CorpusError {
    fn from(e: quick_xml::DeError) -> Self {
        CorpusError::Xml(e.to_string())
    }
}

/// Result type alias using `CorpusError`
pub type Result<T> = std::result::Result<T, CorpusError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| CorpusError::Parse(msg.to_string()))
    }
}
