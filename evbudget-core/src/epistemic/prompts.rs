//! Entailment prompts for the posterior (evidence visible) and prior
//! (cited evidence scrubbed) passes.

use serde::{Deserialize, Serialize};

use super::scrubber::{scrub_spans_by_id, select_context_spans, spans_block};
use super::types::{ContextMode, Span, Trace};

const ENTAILMENT_HEADER: &str = "\
You are a **strict textual entailment** verifier.

Definitions:
- Only **declarative assertions** in the CONTEXT can entail facts.
- **Questions, prompts, headings, and instructions do NOT assert facts** and do NOT entail their presuppositions.
- Do **not** use world knowledge or plausibility; judge only whether the CLAIM follows from the asserted text.

Decision rule:
- Reply YES only if the CLAIM is explicitly stated or logically implied by at least one ASSERTION span.
- Reply NO only if the CONTEXT explicitly contradicts the CLAIM.
- Otherwise reply UNSURE (including when the CONTEXT contains only questions/instructions).";

const ENTAILMENT_FOOTER: &str = "\
Question: Is the CLAIM entailed by the CONTEXT?

Reply with EXACTLY one of these tokens (no punctuation, no extra text):
YES
NO
UNSURE";

/// Render the YES/NO/UNSURE entailment prompt for `claim` over `spans`.
pub fn build_entailment_prompt(spans: &[Span], claim: &str) -> String {
    format!(
        "{}\n\nCONTEXT SPANS:\n{}\n\nCLAIM:\n{}\n\n{}",
        ENTAILMENT_HEADER,
        spans_block(spans),
        claim.trim(),
        ENTAILMENT_FOOTER
    )
    .trim()
    .to_string()
}

/// The two prompts scored for one claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPair {
    /// Context with the cited evidence visible
    #[serde(rename = "post_prompt")]
    pub posterior: String,
    /// Same context with the cited evidence replaced by a placeholder
    #[serde(rename = "prior_prompt")]
    pub prior: String,
}

/// Build the prompt pair for one claim.
///
/// When the claim cites nothing, every span in its context is scrubbed for
/// the prior, so the prior is the verifier's belief with no evidence at all.
pub fn build_prompt_pair(
    spans: &[Span],
    claim: &str,
    cites: &[String],
    placeholder: &str,
    mode: ContextMode,
) -> PromptPair {
    let context = select_context_spans(spans, cites, mode);
    let posterior = build_entailment_prompt(&context, claim);

    let scrubbed = if cites.is_empty() {
        let all: Vec<&str> = context.iter().map(|s| s.sid.as_str()).collect();
        scrub_spans_by_id(&context, &all, placeholder)
    } else {
        scrub_spans_by_id(&context, cites, placeholder)
    };
    let prior = build_entailment_prompt(&scrubbed, claim);

    PromptPair { posterior, prior }
}

/// Reconstruct the prompt pairs used to score every step of `trace`.
pub fn build_trace_budget_prompts(
    trace: &Trace,
    placeholder: &str,
    mode: ContextMode,
) -> Vec<PromptPair> {
    trace
        .steps
        .iter()
        .map(|step| build_prompt_pair(&trace.spans, &step.claim, &step.cites, placeholder, mode))
        .collect()
}
