//! Evidence-budget verification.
//!
//! Each claim is checked with the same yes/no entailment question twice:
//! once with its cited spans visible (posterior `p1`) and once with them
//! scrubbed (prior `p0`). A claim asserted with confidence `t` needs
//! `KL(t || p0)` nats of evidence; the citations supplied `KL(p1 || p0)`.
//! When even the most favorable reading of the log-probability bounds leaves
//! the requirement above what was supplied, the claim is flagged.
//!
//! ## Example
//!
//! ```rust,ignore
//! use evbudget_core::epistemic::{detect_hallucination, DetectRequest, Span};
//! use evbudget_core::llm::Backend;
//!
//! let backend = Backend::from_env()?;
//! let request = DetectRequest::new(
//!     "Water boils at 100°C at sea level. [S0]",
//!     vec![Span::new("S0", "At sea level, water boils at 100 degrees Celsius.")],
//! );
//!
//! let response = detect_hallucination(&backend, &request).await;
//! if response.flagged {
//!     for detail in response.details.iter().filter(|d| d.flagged) {
//!         println!("unsupported: {} (gap {:.2} bits)", detail.claim, detail.budget_gap.min);
//!     }
//! }
//! ```
//!
//! Both entry points fail closed: any error yields a flagged response with
//! `error` set and no details. They take an already-built [`Backend`], so a
//! configuration error from [`Backend::from_env`] is the caller's to handle;
//! the `*_from_env` variants build the backend themselves and fold such
//! errors into the same flagged response.

pub mod claims;
pub mod kl;
pub mod prompts;
pub mod report;
pub mod scorer;
pub mod scrubber;
pub mod topk;
pub mod types;

#[cfg(test)]
mod proptest;

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::llm::Backend;

pub use claims::{
    normalize_spans, normalize_steps, reconcile_citations, resolve_target, CitationResolver,
    ClaimExtractor, FallbackResolver, DEFAULT_CITATION_PATTERN,
};
pub use kl::{
    bernoulli_kl_bits, bernoulli_kl_nats, budget_from_intervals, nats_to_bits, observed_interval,
    required_interval, BudgetBounds, KL_EPSILON,
};
pub use prompts::{build_entailment_prompt, build_prompt_pair, build_trace_budget_prompts, PromptPair};
pub use report::{
    AuditResponse, AuditSummary, ClaimDetail, DetectResponse, DetectSummary, IntervalReport,
    VerificationResponse, YesSummary,
};
pub use scorer::{BudgetScorer, ScoreOptions, MAX_OUTPUT_TOKENS, VERIFIER_INSTRUCTIONS};
pub use scrubber::{classify_span, scrub_spans_by_id, select_context_spans, spans_block, SpanKind};
pub use topk::{extract_answer_topk, yes_probability, yes_probability_from_logprobs};
pub use types::{
    AuditRequest, BudgetResult, ClaimSplit, ContextMode, DetectRequest, Interval, Span, Step,
    StepInput, TokenTopK, Trace, Units, VerifyOptions, YesProbability,
};

const NO_SPANS: &str = "No spans provided (cannot verify citations).";

/// Verify every claim in a free-text answer against the spans it cites.
pub async fn detect_hallucination(backend: &Backend, request: &DetectRequest) -> DetectResponse {
    match run_detect(backend, request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "detect_hallucination failed; returning flagged result");
            DetectResponse::failed(e.to_string())
        }
    }
}

/// [`detect_hallucination`] for a raw JSON request.
pub async fn detect_hallucination_json(backend: &Backend, request: Value) -> DetectResponse {
    match serde_json::from_value::<DetectRequest>(request) {
        Ok(request) => detect_hallucination(backend, &request).await,
        Err(e) => {
            warn!(error = %e, "malformed detect_hallucination request");
            DetectResponse::failed(Error::from(e).to_string())
        }
    }
}

/// Verify caller-supplied steps against the spans each one cites.
pub async fn audit_trace_budget(backend: &Backend, request: &AuditRequest) -> AuditResponse {
    match run_audit(backend, request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "audit_trace_budget failed; returning flagged result");
            AuditResponse::failed(e.to_string())
        }
    }
}

/// [`audit_trace_budget`] for a raw JSON request.
pub async fn audit_trace_budget_json(backend: &Backend, request: Value) -> AuditResponse {
    match serde_json::from_value::<AuditRequest>(request) {
        Ok(request) => audit_trace_budget(backend, &request).await,
        Err(e) => {
            warn!(error = %e, "malformed audit_trace_budget request");
            AuditResponse::failed(Error::from(e).to_string())
        }
    }
}

/// [`detect_hallucination`] on a backend configured from the environment.
pub async fn detect_hallucination_from_env(request: &DetectRequest) -> DetectResponse {
    match Backend::from_env() {
        Ok(backend) => detect_hallucination(&backend, request).await,
        Err(e) => {
            warn!(error = %e, "verifier backend misconfigured; returning flagged result");
            DetectResponse::failed(e.to_string())
        }
    }
}

/// [`audit_trace_budget`] on a backend configured from the environment.
pub async fn audit_trace_budget_from_env(request: &AuditRequest) -> AuditResponse {
    match Backend::from_env() {
        Ok(backend) => audit_trace_budget(&backend, request).await,
        Err(e) => {
            warn!(error = %e, "verifier backend misconfigured; returning flagged result");
            AuditResponse::failed(e.to_string())
        }
    }
}

#[instrument(skip_all, fields(backend = %backend.kind()))]
async fn run_detect(backend: &Backend, request: &DetectRequest) -> Result<DetectResponse> {
    let options = &request.options;
    options.validate()?;

    let spans = normalize_spans(&request.spans);
    if spans.is_empty() {
        return Err(Error::invalid_input(NO_SPANS));
    }

    let mut extractor = ClaimExtractor::new()
        .with_split(options.claim_split)
        .with_max_claims(options.max_claims);
    if let Some(pattern) = &options.citation_regex {
        extractor = extractor.with_citation_regex(pattern)?;
    }

    let target = resolve_target(None, options.default_target, options.min_target);
    let steps = extractor.extract(&request.answer, &spans, target);
    info!(claims = steps.len(), spans = spans.len(), "verifying answer");

    let trace = Trace::new(steps, spans);
    let details = score_details(backend, &trace, options).await?;

    Ok(report::detect_response(
        details,
        options.units,
        &options.verifier_model,
        backend.kind().as_str(),
    ))
}

#[instrument(skip_all, fields(backend = %backend.kind()))]
async fn run_audit(backend: &Backend, request: &AuditRequest) -> Result<AuditResponse> {
    let options = &request.options;
    options.validate()?;

    let spans = normalize_spans(&request.spans);
    if spans.is_empty() {
        return Err(Error::invalid_input(NO_SPANS));
    }

    let steps = normalize_steps(
        &request.steps,
        options.default_target,
        options.min_target,
        options.max_claims,
    );
    info!(steps = steps.len(), spans = spans.len(), "auditing trace");

    let trace = Trace::new(steps, spans);
    let details = score_details(backend, &trace, options).await?;

    Ok(report::audit_response(
        details,
        options.units,
        &options.verifier_model,
        backend.kind().as_str(),
    ))
}

async fn score_details(
    backend: &Backend,
    trace: &Trace,
    options: &VerifyOptions,
) -> Result<Vec<ClaimDetail>> {
    let scorer = BudgetScorer::new(backend, ScoreOptions::from(options));
    let results = scorer.score(trace).await?;

    let mut details: Vec<ClaimDetail> = results
        .iter()
        .map(|r| ClaimDetail::from_result(r, options.units))
        .collect();

    if options.require_citations {
        details.iter_mut().for_each(ClaimDetail::require_citations);
    }

    if options.include_prompts {
        for (detail, pair) in details.iter_mut().zip(scorer.prompts(trace)) {
            detail.attach_prompts(&pair, options.max_prompt_chars);
        }
    }

    Ok(details)
}
