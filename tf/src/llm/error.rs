//! LLM adapter error taxonomy

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The service cannot be reached at all; callers go straight to the
    /// rule-based fallback.
    #[error("LLM service unavailable: {0}")]
    Unavailable(String),

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The response arrived but does not match the declared schema
    #[error("Response schema violation: {0}")]
    SchemaViolation(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether another attempt may succeed; `Unavailable` is not retried -
    /// callers fall back immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Unavailable(_) => false,
            LlmError::ApiError { status, .. } => *status >= 500,
            LlmError::Network(_) => true,
            LlmError::SchemaViolation(_) => true,
            LlmError::Timeout(_) => true,
            LlmError::Json(_) => false,
        }
    }
}
