//! Completion backends that return token log-probabilities.
//!
//! The verifier only needs short, deterministic completions with per-token
//! alternatives. [`OpenAIClient`] talks to a chat-completions endpoint and
//! [`DummyClient`] scripts the same shape offline. [`Backend`] picks one from
//! configuration and runs batches with bounded concurrency.
//!
//! ## Example
//!
//! ```rust,ignore
//! use evbudget_core::llm::{Backend, BackendConfig, CompletionRequest};
//!
//! let backend = Backend::from_config(&BackendConfig::from_env()?);
//! let request = CompletionRequest::new("Is the sky blue?", "gpt-4o-mini")
//!     .with_max_output_tokens(5)
//!     .with_logprobs(10);
//!
//! let response = backend.call_text(request).await?;
//! let tokens = response.require_logprobs()?;
//! ```

mod backend;
mod batch;
mod client;
mod dummy;
mod types;

pub use backend::{Backend, BackendConfig, BackendKind};
pub use batch::{BatchExecutor, BatchQueryResult, BatchedQueryResults, DEFAULT_MAX_PARALLEL};
pub use client::{ClientConfig, LLMClient, OpenAIClient, MAX_TOP_LOGPROBS};
pub use dummy::{DummyClient, DummyReply, DEFAULT_DUMMY_P_YES};
pub use types::{
    CompletionRequest, CompletionResponse, Provider, TokenInfo, TokenUsage, TopLogprob,
};
