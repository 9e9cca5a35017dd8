//! Budget scoring: two completion passes per trace and the KL test per step.
//!
//! All posterior prompts run as one batch, the backend is reset, then all
//! prior prompts run as a second batch. Results pair with steps by position.

use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::llm::{Backend, CompletionRequest, CompletionResponse};

use super::claims::resolve_target;
use super::kl::budget_from_intervals;
use super::prompts::{build_trace_budget_prompts, PromptPair};
use super::topk::yes_probability_from_logprobs;
use super::types::{BudgetResult, ContextMode, Trace, VerifyOptions, YesProbability};

/// System instructions for every entailment call.
pub const VERIFIER_INSTRUCTIONS: &str = "Reply with exactly one token: YES, NO, or UNSURE.";

/// Output cap for entailment calls.
pub const MAX_OUTPUT_TOKENS: u32 = 5;

/// Settings for one scoring run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOptions {
    pub verifier_model: String,
    pub default_target: f64,
    pub min_target: Option<f64>,
    pub temperature: f64,
    pub top_logprobs: u8,
    pub placeholder: String,
    pub context_mode: ContextMode,
}

impl Default for ScoreOptions {
    fn default() -> Self {
        Self::from(&VerifyOptions::default())
    }
}

impl From<&VerifyOptions> for ScoreOptions {
    fn from(options: &VerifyOptions) -> Self {
        Self {
            verifier_model: options.verifier_model.clone(),
            default_target: options.default_target,
            min_target: options.min_target,
            temperature: options.temperature,
            top_logprobs: options.top_logprobs,
            placeholder: options.placeholder.clone(),
            context_mode: options.context_mode,
        }
    }
}

/// Scores every step of a trace against a backend.
pub struct BudgetScorer<'a> {
    backend: &'a Backend,
    options: ScoreOptions,
}

impl<'a> BudgetScorer<'a> {
    pub fn new(backend: &'a Backend, options: ScoreOptions) -> Self {
        Self { backend, options }
    }

    pub fn options(&self) -> &ScoreOptions {
        &self.options
    }

    fn request(&self, prompt: String) -> CompletionRequest {
        CompletionRequest::new(prompt, self.options.verifier_model.clone())
            .with_instructions(VERIFIER_INSTRUCTIONS)
            .with_temperature(self.options.temperature)
            .with_max_output_tokens(MAX_OUTPUT_TOKENS)
            .with_logprobs(self.options.top_logprobs)
    }

    /// Prompt pairs this scorer would send for `trace`.
    pub fn prompts(&self, trace: &Trace) -> Vec<PromptPair> {
        build_trace_budget_prompts(trace, &self.options.placeholder, self.options.context_mode)
    }

    /// Score every step. An empty trace makes no backend calls.
    #[instrument(skip_all, fields(steps = trace.steps.len(), spans = trace.spans.len()))]
    pub async fn score(&self, trace: &Trace) -> Result<Vec<BudgetResult>> {
        if trace.steps.is_empty() {
            return Ok(Vec::new());
        }

        let pairs = self.prompts(trace);
        let (posterior_prompts, prior_prompts): (Vec<_>, Vec<_>) =
            pairs.into_iter().map(|p| (p.posterior, p.prior)).unzip();

        debug!(
            model = %self.options.verifier_model,
            context_mode = %self.options.context_mode,
            "scoring posterior prompts"
        );
        let posterior = self
            .backend
            .call_text_batch(posterior_prompts.into_iter().map(|p| self.request(p)).collect())
            .await?;

        self.backend.reset_state();

        debug!("scoring prior prompts");
        let prior = self
            .backend
            .call_text_batch(prior_prompts.into_iter().map(|p| self.request(p)).collect())
            .await?;

        let mut results = Vec::with_capacity(trace.steps.len());
        for ((step, post_resp), prior_resp) in trace.steps.iter().zip(&posterior).zip(&prior) {
            let post_yes = yes_from_response(post_resp)?;
            let prior_yes = yes_from_response(prior_resp)?;
            let target = resolve_target(
                Some(step.confidence),
                self.options.default_target,
                self.options.min_target,
            );
            let bounds = budget_from_intervals(target, &prior_yes, &post_yes);

            debug!(
                idx = step.idx,
                target,
                prior_yes = prior_yes.p_upper,
                post_yes = post_yes.p_lower,
                required_min = bounds.required.min,
                observed_max = bounds.observed.max,
                flagged = bounds.flagged,
                "step scored"
            );

            results.push(BudgetResult {
                idx: step.idx,
                claim: step.claim.clone(),
                cites: step.cites.clone(),
                target,
                prior_yes,
                post_yes,
                required: bounds.required,
                observed: bounds.observed,
                gap: bounds.gap,
                flagged: bounds.flagged,
            });
        }

        info!(
            scored = results.len(),
            flagged = results.iter().filter(|r| r.flagged).count(),
            "trace budget scored"
        );
        Ok(results)
    }
}

fn yes_from_response(response: &CompletionResponse) -> Result<YesProbability> {
    yes_probability_from_logprobs(response.require_logprobs()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epistemic::types::{Span, Step};
    use crate::error::Error;
    use crate::llm::{DummyClient, TokenInfo, TopLogprob};

    fn trace(claims: &[(&str, &[&str])]) -> Trace {
        Trace::new(
            claims
                .iter()
                .enumerate()
                .map(|(i, (claim, cites))| {
                    Step::new(
                        i as i64,
                        *claim,
                        cites.iter().map(|c| c.to_string()).collect(),
                        0.95,
                    )
                })
                .collect(),
            vec![
                Span::new("S0", "Water boils at 100°C at sea level."),
                Span::new("S1", "Paris is the capital of France."),
            ],
        )
    }

    #[tokio::test]
    async fn test_empty_trace_makes_no_calls() {
        let client = DummyClient::new();
        let backend = Backend::dummy(client);
        let scorer = BudgetScorer::new(&backend, ScoreOptions::default());
        let results = scorer.score(&Trace::default()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_supported_claim_passes() {
        let backend = Backend::dummy(
            DummyClient::new()
                .with_rule("[S0] Water boils at 100°C", 0.99)
                .with_p_yes(0.3),
        );
        let scorer = BudgetScorer::new(&backend, ScoreOptions::default());
        let results = scorer
            .score(&trace(&[("Boiling happens at 100 degrees.", &["S0"])]))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(!results[0].flagged);
        assert!((results[0].post_yes.p_lower - 0.99).abs() < 1e-9);
        assert!((results[0].prior_yes.p_lower - 0.3).abs() < 1e-9);
        assert!(results[0].required.min <= results[0].required.max);
    }

    #[tokio::test]
    async fn test_unsupported_claim_flagged() {
        let backend = Backend::dummy(DummyClient::new().with_p_yes(0.3).with_rule("[S0] Water", 0.02));
        let scorer = BudgetScorer::new(&backend, ScoreOptions::default());
        let results = scorer
            .score(&trace(&[("Water boils at 50 degrees.", &["S0"])]))
            .await
            .unwrap();
        assert!(results[0].flagged);
        assert!(results[0].gap.min > 0.0);
    }

    #[tokio::test]
    async fn test_results_follow_step_order() {
        let backend = Backend::dummy(DummyClient::new()).with_max_concurrency(1);
        let scorer = BudgetScorer::new(&backend, ScoreOptions::default());
        let results = scorer
            .score(&trace(&[("first", &["S0"]), ("second", &["S1"]), ("third", &[])]))
            .await
            .unwrap();
        let claims: Vec<&str> = results.iter().map(|r| r.claim.as_str()).collect();
        assert_eq!(claims, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_missing_logprobs_is_error() {
        let backend = Backend::dummy(DummyClient::new().without_logprobs());
        let scorer = BudgetScorer::new(&backend, ScoreOptions::default());
        let err = scorer
            .score(&trace(&[("claim", &["S0"])]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingLogprobs));
    }

    #[tokio::test]
    async fn test_yes_outside_topk_uses_upper_bound() {
        let no_tokens = vec![TokenInfo::new("NO", -0.05).with_alternatives(vec![
            TopLogprob::new("NO", -0.05),
            TopLogprob::new("UNSURE", -3.0),
        ])];
        let backend = Backend::dummy(DummyClient::new().with_reply("[S0] Water", no_tokens));
        let scorer = BudgetScorer::new(&backend, ScoreOptions::default());
        let results = scorer
            .score(&trace(&[("claim", &["S0"])]))
            .await
            .unwrap();

        assert_eq!(results[0].post_yes.p_lower, 0.0);
        assert!((results[0].post_yes.p_upper - (-3.0f64).exp()).abs() < 1e-12);
        assert_eq!(results[0].post_yes.generated_token, "NO");
    }

    #[tokio::test]
    async fn test_min_target_raises_step_target() {
        let backend = Backend::dummy(DummyClient::new());
        let options = ScoreOptions {
            min_target: Some(0.99),
            ..ScoreOptions::default()
        };
        let scorer = BudgetScorer::new(&backend, options);
        let results = scorer.score(&trace(&[("claim", &["S0"])])).await.unwrap();
        assert_eq!(results[0].target, 0.99);
    }
}
