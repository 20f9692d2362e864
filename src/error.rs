//! Error types for the retrieval pipeline.
//!
//! Library operations return [`Result`], which carries an [`AssistantError`].
//! The variants follow the failure kinds the chain distinguishes: some are
//! fatal for a request (provider failures on the single-shot steps), others
//! are caught inside the chain and logged (store failures, malformed filters).
//!
//! The binary and config loader work with `anyhow` and convert at the edge.

use thiserror::Error;

/// Main error type for handbook assistant operations.
#[derive(Error, Debug)]
pub enum AssistantError {
    /// Embedding or generation backend unreachable or misconfigured.
    #[error("{provider} provider unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    /// A single vector-store query failed.
    #[error("vector store query failed: {0}")]
    StoreQueryFailed(String),

    /// The keyword set cannot be expressed as a metadata filter.
    #[error("malformed filter input: {0}")]
    MalformedFilterInput(String),

    /// Caller supplied an unusable request.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An external call exceeded its deadline.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// Configuration is inconsistent with the requested operation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AssistantError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

impl From<sqlx::Error> for AssistantError {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreQueryFailed(err.to_string())
    }
}

/// Result type for handbook assistant operations.
pub type Result<T> = std::result::Result<T, AssistantError>;
