//! Error types for chat-nest.

use std::time::Duration;

/// Top-level error type for the capture pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Reconciliation error: {0}")]
    Reconciliation(#[from] ReconciliationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// DOM extraction errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("no content")]
    NoContent,

    #[error("Invalid selector {selector}: {reason}")]
    InvalidSelector { selector: String, reason: String },
}

/// Inter-context channel errors. Any of these means the background context
/// is unreachable from the page.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("Extension context invalidated")]
    ContextInvalidated,

    #[error("No response from background context within {waited:?}")]
    NoResponse { waited: Duration },
}

/// Content store / index store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Conversation not found: {id}")]
    NotFound { id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Quota exceeded for key {key}: {size} bytes > {limit} bytes")]
    QuotaExceeded {
        key: String,
        size: usize,
        limit: usize,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid conversation: {0}")]
    Invalid(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Fallback replay errors.
#[derive(Debug, thiserror::Error)]
pub enum ReconciliationError {
    #[error("Failed to replay fallback record {id}: {reason}")]
    Replay { id: String, reason: String },
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
