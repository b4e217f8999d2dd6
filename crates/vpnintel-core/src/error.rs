//! Error types for the VPN intelligence cache
//!
//! Lookups never fail; only ingestion, persistence and refresh calls
//! return these.

use thiserror::Error;

/// Result type alias for vpnintel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the VPN intelligence cache
#[derive(Error, Debug)]
pub enum Error {
    /// Durable store errors
    #[error("Store error: {0}")]
    Store(String),

    /// Feed fetch errors (connection, body read)
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Non-success HTTP status from the feed source
    #[error("HTTP error: status {status}")]
    Http {
        /// Status code returned by the source
        status: u16,
    },

    /// Feed response exceeded the size cap
    #[error("Response too large: {size} bytes (max {max} bytes)")]
    ResponseTooLarge {
        /// Observed or announced size
        size: usize,
        /// Configured cap
        max: usize,
    },

    /// Ingestion errors
    #[error("Import error: {0}")]
    Import(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A refresh is already running
    #[error("update already in progress")]
    UpdateInProgress,

    /// The operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// The operation exceeded its deadline
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// I/O errors (file import)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a fetch error
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create an import error
    pub fn import(msg: impl Into<String>) -> Self {
        Self::Import(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether a retry could plausibly succeed
    ///
    /// Cancellation and a busy pipeline are terminal; everything else
    /// the fetch path produces is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::UpdateInProgress | Self::Config(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
