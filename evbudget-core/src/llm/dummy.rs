//! Deterministic offline client for tests and local runs.
//!
//! Every prompt is answered `YES` with a YES/NO/UNSURE top-3 distribution.
//! Rules keyed on prompt substrings override the default probability, or
//! replace the token sequence entirely.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};

use super::client::LLMClient;
use super::types::{
    CompletionRequest, CompletionResponse, Provider, TokenInfo, TokenUsage, TopLogprob,
};

/// Default probability the dummy assigns to `YES`.
pub const DEFAULT_DUMMY_P_YES: f64 = 0.55;

const P_FLOOR: f64 = 1e-6;

/// Reply produced when a rule matches.
#[derive(Debug, Clone, PartialEq)]
pub enum DummyReply {
    /// Answer `YES` with this probability; the remainder splits evenly over NO/UNSURE.
    YesProbability(f64),
    /// Return exactly these tokens.
    Tokens(Vec<TokenInfo>),
}

#[derive(Debug, Clone, PartialEq)]
enum DummyMode {
    Normal,
    NoLogprobs,
    Fail(String),
}

/// Offline client with scripted log-probabilities.
#[derive(Debug)]
pub struct DummyClient {
    p_yes: f64,
    rules: Vec<(String, DummyReply)>,
    mode: DummyMode,
    calls: AtomicUsize,
}

impl Default for DummyClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyClient {
    pub fn new() -> Self {
        Self {
            p_yes: DEFAULT_DUMMY_P_YES,
            rules: Vec::new(),
            mode: DummyMode::Normal,
            calls: AtomicUsize::new(0),
        }
    }

    /// Set the default YES probability.
    pub fn with_p_yes(mut self, p_yes: f64) -> Self {
        self.p_yes = p_yes;
        self
    }

    /// Answer prompts containing `needle` with the given YES probability.
    /// The first matching rule wins.
    pub fn with_rule(mut self, needle: impl Into<String>, p_yes: f64) -> Self {
        self.rules
            .push((needle.into(), DummyReply::YesProbability(p_yes)));
        self
    }

    /// Answer prompts containing `needle` with a fixed token sequence.
    pub fn with_reply(mut self, needle: impl Into<String>, tokens: Vec<TokenInfo>) -> Self {
        self.rules.push((needle.into(), DummyReply::Tokens(tokens)));
        self
    }

    /// Return completions without log-probabilities.
    pub fn without_logprobs(mut self) -> Self {
        self.mode = DummyMode::NoLogprobs;
        self
    }

    /// Fail every call with a non-retryable error.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.mode = DummyMode::Fail(message.into());
        self
    }

    /// Number of completions served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn reply_for(&self, prompt: &str) -> DummyReply {
        self.rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or(DummyReply::YesProbability(self.p_yes))
    }

    fn yes_tokens(p_yes: f64, top_logprobs: u8) -> Vec<TokenInfo> {
        let p = p_yes.clamp(P_FLOOR, 1.0 - P_FLOOR);
        let rest = (1.0 - p) / 2.0;
        let mut alternatives = vec![
            TopLogprob::new("YES", p.ln()),
            TopLogprob::new("NO", rest.ln()),
            TopLogprob::new("UNSURE", rest.ln()),
        ];
        if top_logprobs > 0 {
            alternatives.truncate(top_logprobs as usize);
        }
        vec![TokenInfo::new("YES", p.ln()).with_alternatives(alternatives)]
    }
}

#[async_trait]
impl LLMClient for DummyClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let DummyMode::Fail(message) = &self.mode {
            return Err(Error::llm_api_permanent("dummy", message.clone()));
        }

        let tokens = match self.reply_for(&request.prompt) {
            DummyReply::YesProbability(p) => Self::yes_tokens(p, request.top_logprobs),
            DummyReply::Tokens(tokens) => tokens,
        };
        let text: String = tokens.iter().map(|t| t.token.as_str()).collect();

        let logprobs = match self.mode {
            DummyMode::NoLogprobs => None,
            _ if request.include_logprobs => Some(tokens),
            _ => None,
        };

        Ok(CompletionResponse {
            text,
            response_id: None,
            model: request.model,
            logprobs,
            usage: TokenUsage {
                input_tokens: request.prompt.split_whitespace().count() as u64,
                output_tokens: 1,
            },
            timestamp: Utc::now(),
        })
    }

    fn provider(&self) -> Provider {
        Provider::Dummy
    }
}
