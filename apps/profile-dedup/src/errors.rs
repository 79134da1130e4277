use serde::Serialize;
use thiserror::Error;

use crate::llm_client::LlmError;

/// Application-level error for loading input and handing results downstream.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Embedding error: {0}")]
    Embedding(#[from] CapabilityError),
}

/// A raw upstream record that cannot become a `Chunk`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("record {index} is not a JSON object")]
    NotAnObject { index: usize },

    #[error("record {index} has no metadata object")]
    MissingMetadata { index: usize },

    #[error("record {index} has no embedding_text")]
    MissingEmbeddingText { index: usize },
}

/// Failure of an external capability (arbitration, merge, embedding).
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Network or availability problem that survived the retry budget.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// The provider answered, but not in the shape the contract requires.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The provider refused the request outright (auth, bad request).
    #[error("request rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("failed to encode request: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Malformed,
    Rejected,
    Internal,
}

impl CapabilityError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CapabilityError::Transient(_) => FailureKind::Transient,
            CapabilityError::Malformed(_) => FailureKind::Malformed,
            CapabilityError::Rejected { .. } => FailureKind::Rejected,
            CapabilityError::Encode(_) => FailureKind::Internal,
        }
    }

    /// Only transient failures are worth re-running the same unit of work for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CapabilityError::Transient(_))
    }
}

impl From<LlmError> for CapabilityError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Parse(e) => CapabilityError::Malformed(e.to_string()),
            LlmError::EmptyContent => {
                CapabilityError::Malformed("LLM returned empty content".to_string())
            }
            LlmError::Http(e) if e.is_decode() => CapabilityError::Malformed(e.to_string()),
            LlmError::Http(e) if e.is_builder() => CapabilityError::Encode(e.to_string()),
            LlmError::Api { status, message } if !LlmError::is_transient_status(status) => {
                CapabilityError::Rejected { status, message }
            }
            other => CapabilityError::Transient(other.to_string()),
        }
    }
}
