//! Completion request/response types and the normalized token log-probability shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Completion provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    OpenAI,
    Dummy,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAI => write!(f, "openai"),
            Self::Dummy => write!(f, "dummy"),
        }
    }
}

/// A single-prompt completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// User prompt
    pub prompt: String,
    /// Model identifier
    pub model: String,
    /// System instructions
    pub instructions: String,
    /// Sampling temperature
    pub temperature: f64,
    /// Maximum tokens to generate
    pub max_output_tokens: u32,
    /// Whether to return per-token log-probabilities
    pub include_logprobs: bool,
    /// Number of alternatives per position (0-20)
    pub top_logprobs: u8,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            instructions: "You are a helpful assistant.".to_string(),
            temperature: 0.0,
            max_output_tokens: 64,
            include_logprobs: false,
            top_logprobs: 0,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Request log-probabilities with `top_logprobs` alternatives per position.
    pub fn with_logprobs(mut self, top_logprobs: u8) -> Self {
        self.include_logprobs = true;
        self.top_logprobs = top_logprobs;
        self
    }
}

/// One alternative considered at an output position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopLogprob {
    #[serde(alias = "text", default)]
    pub token: String,
    #[serde(alias = "log_prob", default)]
    pub logprob: Option<f64>,
}

impl TopLogprob {
    pub fn new(token: impl Into<String>, logprob: f64) -> Self {
        Self {
            token: token.into(),
            logprob: Some(logprob),
        }
    }
}

/// Log-probability record for one generated token.
///
/// Backend-specific field spellings (`text`, `log_prob`, `top_log_probs`)
/// are normalized here so nothing downstream deals with them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    #[serde(alias = "text", default)]
    pub token: String,
    #[serde(alias = "log_prob", default)]
    pub logprob: Option<f64>,
    #[serde(alias = "top_log_probs", default, deserialize_with = "null_as_empty")]
    pub top_logprobs: Vec<TopLogprob>,
}

impl TokenInfo {
    pub fn new(token: impl Into<String>, logprob: f64) -> Self {
        Self {
            token: token.into(),
            logprob: Some(logprob),
            top_logprobs: Vec::new(),
        }
    }

    pub fn with_alternatives(mut self, alternatives: Vec<TopLogprob>) -> Self {
        self.top_logprobs = alternatives;
        self
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Generated text
    pub text: String,
    /// Backend response ID, if any
    pub response_id: Option<String>,
    /// Model that served the request
    pub model: String,
    /// Per-output-token log-probabilities (present only when requested and returned)
    pub logprobs: Option<Vec<TokenInfo>>,
    /// Token usage
    pub usage: TokenUsage,
    /// Response timestamp
    pub timestamp: DateTime<Utc>,
}

impl CompletionResponse {
    /// The log-probability sequence, or an error if the backend omitted it.
    pub fn require_logprobs(&self) -> Result<&[TokenInfo]> {
        self.logprobs.as_deref().ok_or(Error::MissingLogprobs)
    }
}
