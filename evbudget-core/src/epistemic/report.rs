//! Response shapes for the two verification entry points.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::prompts::PromptPair;
use super::types::{BudgetResult, Interval, Units, YesProbability};

/// At most this many flagged indices are listed in a summary.
pub const MAX_FLAGGED_IDXS: usize = 50;

/// Minimum prompt length kept when prompts are attached.
pub const MIN_PROMPT_CHARS: usize = 100;

/// Prompt length kept when no limit (or zero) is given.
pub const DEFAULT_PROMPT_CHARS: usize = 3000;

/// P(YES) bounds with the answer token and its alternatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YesSummary {
    pub p_lower: f64,
    pub p_upper: f64,
    pub generated: String,
    pub topk: BTreeMap<String, f64>,
}

impl From<&YesProbability> for YesSummary {
    fn from(yes: &YesProbability) -> Self {
        Self {
            p_lower: yes.p_lower,
            p_upper: yes.p_upper,
            generated: yes.generated_token.clone(),
            topk: yes.topk.clone(),
        }
    }
}

/// An interval in the requested units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalReport {
    pub min: f64,
    pub max: f64,
    pub units: Units,
}

impl IntervalReport {
    pub fn from_nats(interval: Interval, units: Units) -> Self {
        let converted = interval.to_units(units);
        Self {
            min: converted.min,
            max: converted.max,
            units,
        }
    }
}

/// Verdict for one claim or step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimDetail {
    pub idx: i64,
    pub claim: String,
    pub cites: Vec<String>,
    pub target: f64,
    pub prior_yes: YesSummary,
    pub post_yes: YesSummary,
    pub required: IntervalReport,
    pub observed: IntervalReport,
    pub budget_gap: IntervalReport,
    pub flagged: bool,
    pub has_any_citations: bool,
    pub missing_citations: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_prompt: Option<String>,
}

impl ClaimDetail {
    pub fn from_result(result: &BudgetResult, units: Units) -> Self {
        Self {
            idx: result.idx,
            claim: result.claim.clone(),
            cites: result.cites.clone(),
            target: result.target,
            prior_yes: YesSummary::from(&result.prior_yes),
            post_yes: YesSummary::from(&result.post_yes),
            required: IntervalReport::from_nats(result.required, units),
            observed: IntervalReport::from_nats(result.observed, units),
            budget_gap: IntervalReport::from_nats(result.gap, units),
            flagged: result.flagged,
            has_any_citations: result.has_citations(),
            missing_citations: false,
            prior_prompt: None,
            post_prompt: None,
        }
    }

    /// Force-flag a claim that cites nothing.
    pub fn require_citations(&mut self) {
        if !self.has_any_citations {
            self.missing_citations = true;
            self.flagged = true;
        }
    }

    /// Attach rendered prompts, each cut as by [`truncate_prompt`].
    pub fn attach_prompts(&mut self, prompts: &PromptPair, max_chars: usize) {
        self.prior_prompt = Some(truncate_prompt(&prompts.prior, max_chars, "prior_prompt"));
        self.post_prompt = Some(truncate_prompt(&prompts.posterior, max_chars, "post_prompt"));
    }
}

/// Cut `prompt` to `max(100, max_chars)` characters, marking the cut.
/// A zero limit means [`DEFAULT_PROMPT_CHARS`].
pub fn truncate_prompt(prompt: &str, max_chars: usize, label: &str) -> String {
    let requested = if max_chars == 0 {
        DEFAULT_PROMPT_CHARS
    } else {
        max_chars
    };
    let cap = requested.max(MIN_PROMPT_CHARS);
    match prompt.char_indices().nth(cap) {
        Some((byte_end, _)) => format!("{}\n...[TRUNCATED {}]", &prompt[..byte_end], label),
        None => prompt.to_string(),
    }
}

/// Summary of a free-text verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectSummary {
    pub claims_scored: usize,
    pub flagged_claims: usize,
    /// First flagged indices, capped
    pub flagged_idxs: Vec<i64>,
    pub units: Units,
    pub verifier_model: String,
    pub backend: String,
}

/// Summary of an explicit-steps verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub steps_scored: usize,
    pub flagged_steps: usize,
    pub units: Units,
    pub verifier_model: String,
    pub backend: String,
}

/// Result of a verification call. Always well-formed; failures fail closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResponse<S> {
    pub flagged: bool,
    /// Same as `flagged`
    pub under_budget: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<S>,
    pub details: Vec<ClaimDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<S> VerificationResponse<S> {
    pub fn new(summary: S, details: Vec<ClaimDetail>) -> Self {
        let flagged = details.iter().any(|d| d.flagged);
        Self {
            flagged,
            under_budget: flagged,
            summary: Some(summary),
            details,
            error: None,
        }
    }

    /// A flagged response carrying only an error message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            flagged: true,
            under_budget: true,
            summary: None,
            details: Vec::new(),
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

pub type DetectResponse = VerificationResponse<DetectSummary>;
pub type AuditResponse = VerificationResponse<AuditSummary>;

/// Shape free-text results.
pub fn detect_response(
    details: Vec<ClaimDetail>,
    units: Units,
    verifier_model: &str,
    backend: &str,
) -> DetectResponse {
    let flagged_idxs: Vec<i64> = details.iter().filter(|d| d.flagged).map(|d| d.idx).collect();
    let summary = DetectSummary {
        claims_scored: details.len(),
        flagged_claims: flagged_idxs.len(),
        flagged_idxs: flagged_idxs.into_iter().take(MAX_FLAGGED_IDXS).collect(),
        units,
        verifier_model: verifier_model.to_string(),
        backend: backend.to_string(),
    };
    VerificationResponse::new(summary, details)
}

/// Shape explicit-steps results.
pub fn audit_response(
    details: Vec<ClaimDetail>,
    units: Units,
    verifier_model: &str,
    backend: &str,
) -> AuditResponse {
    let summary = AuditSummary {
        steps_scored: details.len(),
        flagged_steps: details.iter().filter(|d| d.flagged).count(),
        units,
        verifier_model: verifier_model.to_string(),
        backend: backend.to_string(),
    };
    VerificationResponse::new(summary, details)
}
