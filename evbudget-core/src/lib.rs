//! # evbudget-core
//!
//! Evidence-budget verification for answers that cite source spans.
//!
//! A verifier model is asked whether the cited spans entail each claim, once
//! with the spans visible and once with them scrubbed. The log-probability of
//! its `YES` answer bounds how much information the citations contributed,
//! and a claim whose confidence asks for more information than that is
//! flagged.
//!
//! ## Core Components
//!
//! - **Epistemic**: Claim extraction, span scrubbing, KL budget test, reports
//! - **LLM**: Completion clients (OpenAI-compatible and a deterministic dummy)
//!
//! ## Example
//!
//! ```rust,ignore
//! use evbudget_core::{audit_trace_budget, AuditRequest, Backend, Span, StepInput};
//!
//! let backend = Backend::from_env()?;
//! let request = AuditRequest::new(
//!     vec![StepInput::new("The Eiffel Tower is in Paris.").with_cites(["S0"])],
//!     vec![Span::new("S0", "The Eiffel Tower stands on the Champ de Mars in Paris.")],
//! );
//!
//! let response = audit_trace_budget(&backend, &request).await;
//! println!("flagged: {}", response.flagged);
//! ```

pub mod epistemic;
pub mod error;
pub mod llm;

// Re-exports for convenience
pub use epistemic::{
    audit_trace_budget, audit_trace_budget_from_env, audit_trace_budget_json,
    detect_hallucination, detect_hallucination_from_env, detect_hallucination_json,
    AuditRequest, AuditResponse, BudgetResult, BudgetScorer, ClaimDetail, ClaimExtractor,
    ClaimSplit, ContextMode, DetectRequest, DetectResponse, Interval, Span, Step, StepInput,
    Trace, Units, VerifyOptions, YesProbability,
};
pub use error::{Error, Result};
pub use llm::{
    Backend, BackendConfig, BackendKind, BatchExecutor, ClientConfig, CompletionRequest,
    CompletionResponse, DummyClient, LLMClient, OpenAIClient, Provider, TokenInfo,
};
