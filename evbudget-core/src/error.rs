//! Error types for evbudget-core.

use thiserror::Error;

/// Result type alias using evbudget-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while verifying claims against evidence.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller-supplied input is unusable (empty span pool, bad regex, unknown mode)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The completion returned an empty token/log-probability sequence
    #[error("Empty logprobs list")]
    EmptyLogprobs,

    /// The selected answer token carries no log-probability
    #[error("Missing logprob for generated token")]
    MissingLogprob,

    /// Log-probabilities were requested but the backend returned none
    #[error("Backend returned no logprobs; call the API with logprobs enabled")]
    MissingLogprobs,

    /// Completion backend error
    #[error("LLM API error: {provider} - {message}")]
    LlmApi {
        provider: String,
        message: String,
        retryable: bool,
    },

    /// Timeout during a single completion call
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a transient LLM API error.
    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Create an LLM API error that retrying cannot fix (auth, bad request).
    pub fn llm_api_permanent(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Whether a completion call failing with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LlmApi { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}
