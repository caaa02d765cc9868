//! Error types for gotcha

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for gotcha operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gotcha
#[derive(Error, Debug)]
pub enum Error {
    /// The discovery cache is switched off in configuration.
    ///
    /// Callers are expected to bypass caching entirely when they see this.
    #[error("Discovery cache is disabled")]
    CacheDisabled,

    /// Configuration file error or invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A single event line could not be decoded.
    #[error("Malformed test event: {0}")]
    MalformedEvent(String),

    /// An event arrived after the aggregator produced its final summary.
    #[error("Event aggregator already finalized")]
    AggregatorFinalized,

    /// Comment UUID was empty.
    #[error("Comment UUID is required")]
    EmptyUuid,

    /// The review thread reference is incomplete (no owner, repo or number).
    #[error("Missing review thread reference")]
    MissingThread,

    /// The triggering event cannot carry a review comment.
    #[error("Unsupported event type for comment posting: {0}")]
    UnsupportedEvent(String),

    /// The review platform rejected the call and retrying will not help.
    #[error("{operation} failed: {source}")]
    ApiPermanent {
        operation: &'static str,
        #[source]
        source: ApiError,
    },

    /// A transient platform failure persisted through every attempt.
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    ApiRetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: ApiError,
    },

    /// The caller cancelled the operation.
    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error with custom message.
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

/// Failure reported by a review platform client.
///
/// The HTTP status is optional because transport failures (timeouts, DNS)
/// never produce one; classification then falls back to the message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        ApiError {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        ApiError {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({})", self.message, status),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ApiError {}
