//! Core types for evidence-budget verification.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A labeled piece of evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// Caller-assigned identifier, unique within a request
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub text: String,
}

impl Span {
    pub fn new(sid: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            text: text.into(),
        }
    }
}

/// One claim to verify, with the spans it cites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Evaluation and output order
    pub idx: i64,
    pub claim: String,
    /// Cited span ids, deduplicated, in first-seen order
    pub cites: Vec<String>,
    /// Target confidence in (0, 1)
    pub confidence: f64,
}

impl Step {
    pub fn new(idx: i64, claim: impl Into<String>, cites: Vec<String>, confidence: f64) -> Self {
        Self {
            idx,
            claim: claim.into(),
            cites,
            confidence,
        }
    }
}

/// Ordered steps paired with the full span pool of one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub steps: Vec<Step>,
    pub spans: Vec<Span>,
}

impl Trace {
    pub fn new(steps: Vec<Step>, spans: Vec<Span>) -> Self {
        Self { steps, spans }
    }
}

/// Top-k distribution at the answer token of one completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenTopK {
    /// Index of the answer token in the output sequence
    pub position: usize,
    pub generated_token: String,
    pub generated_logprob: f64,
    /// Left-trimmed alternative → highest logprob seen for it
    pub topk_logprobs: BTreeMap<String, f64>,
    /// Smallest logprob among the alternatives
    pub kth_logprob: Option<f64>,
}

/// Bounds on P(YES) derived from a top-k distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YesProbability {
    pub p_lower: f64,
    pub p_upper: f64,
    pub generated_token: String,
    pub generated_logprob: f64,
    pub kth_logprob: Option<f64>,
    pub topk: BTreeMap<String, f64>,
}

impl YesProbability {
    /// Bounds that carry no token information.
    pub fn bounds(p_lower: f64, p_upper: f64) -> Self {
        Self {
            p_lower,
            p_upper,
            generated_token: String::new(),
            generated_logprob: 0.0,
            kth_logprob: None,
            topk: BTreeMap::new(),
        }
    }
}

/// Closed interval of information amounts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub min: f64,
    pub max: f64,
}

impl Interval {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn point(value: f64) -> Self {
        Self::new(value, value)
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Convert a nats interval into `units`.
    pub fn to_units(self, units: Units) -> Self {
        match units {
            Units::Nats => self,
            Units::Bits => Self::new(
                super::kl::nats_to_bits(self.min),
                super::kl::nats_to_bits(self.max),
            ),
        }
    }
}

/// Scored budget for one claim. Intervals are in nats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetResult {
    pub idx: i64,
    pub claim: String,
    pub cites: Vec<String>,
    pub target: f64,
    pub prior_yes: YesProbability,
    pub post_yes: YesProbability,
    pub required: Interval,
    pub observed: Interval,
    pub gap: Interval,
    pub flagged: bool,
}

impl BudgetResult {
    pub fn has_citations(&self) -> bool {
        !self.cites.is_empty()
    }
}

macro_rules! string_enum_serde {
    ($ty:ty) => {
        impl TryFrom<String> for $ty {
            type Error = Error;

            fn try_from(value: String) -> Result<Self> {
                value.parse()
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.as_str().to_string()
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Which spans appear in a claim's context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ContextMode {
    /// Every span
    #[default]
    All,
    /// Only the cited spans
    Cited,
    /// Cited spans when the claim has cites, otherwise every span
    Auto,
}

impl ContextMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Cited => "cited",
            Self::Auto => "auto",
        }
    }
}

impl FromStr for ContextMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" | "full" => Ok(Self::All),
            "cited" | "cite" | "citations" | "cites" => Ok(Self::Cited),
            "auto" => Ok(Self::Auto),
            other => Err(Error::invalid_input(format!(
                "Unknown context_mode: {:?} (expected all, cited or auto)",
                other
            ))),
        }
    }
}

string_enum_serde!(ContextMode);

/// How a free-text answer is split into claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ClaimSplit {
    #[default]
    Sentences,
    Lines,
}

impl ClaimSplit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sentences => "sentences",
            Self::Lines => "lines",
        }
    }
}

impl FromStr for ClaimSplit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sentences" | "sentence" => Ok(Self::Sentences),
            "lines" | "line" => Ok(Self::Lines),
            other => Err(Error::invalid_input(format!(
                "Unknown claim_split: {:?} (expected sentences or lines)",
                other
            ))),
        }
    }
}

string_enum_serde!(ClaimSplit);

/// Units for reported information amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Units {
    #[default]
    Bits,
    Nats,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bits => "bits",
            Self::Nats => "nats",
        }
    }
}

impl FromStr for Units {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bits" | "bit" => Ok(Self::Bits),
            "nats" | "nat" => Ok(Self::Nats),
            other => Err(Error::invalid_input(format!(
                "Unknown units: {:?} (expected bits or nats)",
                other
            ))),
        }
    }
}

string_enum_serde!(Units);

/// Per-request verification options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyOptions {
    pub verifier_model: String,
    /// Confidence target for claims without their own
    pub default_target: f64,
    /// Targets below this are raised to it
    pub min_target: Option<f64>,
    /// Replacement text for scrubbed spans
    pub placeholder: String,
    pub max_claims: usize,
    pub claim_split: ClaimSplit,
    /// Citation marker regex; the `id` group (or group 1) is the span id
    pub citation_regex: Option<String>,
    pub temperature: f64,
    pub top_logprobs: u8,
    pub units: Units,
    pub context_mode: ContextMode,
    /// Flag every claim without citations
    pub require_citations: bool,
    /// Attach rendered prompts to each detail
    pub include_prompts: bool,
    pub max_prompt_chars: usize,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            verifier_model: "gpt-4o-mini".to_string(),
            default_target: 0.95,
            min_target: None,
            placeholder: "[REDACTED]".to_string(),
            max_claims: 25,
            claim_split: ClaimSplit::Sentences,
            citation_regex: None,
            temperature: 0.0,
            top_logprobs: 10,
            units: Units::Bits,
            context_mode: ContextMode::All,
            require_citations: false,
            include_prompts: false,
            max_prompt_chars: super::report::DEFAULT_PROMPT_CHARS,
        }
    }
}

impl VerifyOptions {
    /// Reject options no verification can run with.
    pub fn validate(&self) -> Result<()> {
        let in_unit = |p: f64| p.is_finite() && p > 0.0 && p < 1.0;
        if !in_unit(self.default_target) {
            return Err(Error::invalid_input(format!(
                "default_target must be in (0, 1), got {}",
                self.default_target
            )));
        }
        if let Some(min) = self.min_target {
            if !in_unit(min) {
                return Err(Error::invalid_input(format!(
                    "min_target must be in (0, 1), got {}",
                    min
                )));
            }
        }
        if self.top_logprobs > crate::llm::MAX_TOP_LOGPROBS {
            return Err(Error::invalid_input(format!(
                "top_logprobs must be between 0 and {}",
                crate::llm::MAX_TOP_LOGPROBS
            )));
        }
        if self.verifier_model.trim().is_empty() {
            return Err(Error::invalid_input("verifier_model must not be empty"));
        }
        Ok(())
    }

    pub fn with_verifier_model(mut self, model: impl Into<String>) -> Self {
        self.verifier_model = model.into();
        self
    }

    pub fn with_default_target(mut self, target: f64) -> Self {
        self.default_target = target;
        self
    }

    pub fn with_min_target(mut self, target: f64) -> Self {
        self.min_target = Some(target);
        self
    }

    pub fn with_context_mode(mut self, mode: ContextMode) -> Self {
        self.context_mode = mode;
        self
    }

    pub fn with_units(mut self, units: Units) -> Self {
        self.units = units;
        self
    }

    pub fn with_require_citations(mut self, require: bool) -> Self {
        self.require_citations = require;
        self
    }

    pub fn with_prompts(mut self, max_chars: usize) -> Self {
        self.include_prompts = true;
        self.max_prompt_chars = max_chars;
        self
    }

    pub fn with_claim_split(mut self, split: ClaimSplit) -> Self {
        self.claim_split = split;
        self
    }

    pub fn with_citation_regex(mut self, pattern: impl Into<String>) -> Self {
        self.citation_regex = Some(pattern.into());
        self
    }

    pub fn with_max_claims(mut self, max: usize) -> Self {
        self.max_claims = max;
        self
    }
}

/// Free-text verification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectRequest {
    pub answer: String,
    #[serde(default)]
    pub spans: Vec<Span>,
    #[serde(flatten)]
    pub options: VerifyOptions,
}

impl DetectRequest {
    pub fn new(answer: impl Into<String>, spans: Vec<Span>) -> Self {
        Self {
            answer: answer.into(),
            spans,
            options: VerifyOptions::default(),
        }
    }

    pub fn with_options(mut self, options: VerifyOptions) -> Self {
        self.options = options;
        self
    }
}

/// A caller-supplied step before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
    #[serde(default)]
    pub idx: Option<i64>,
    #[serde(default)]
    pub claim: String,
    /// Span ids; numbers are accepted and stringified
    #[serde(default)]
    pub cites: Vec<Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl StepInput {
    pub fn new(claim: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            ..Self::default()
        }
    }

    pub fn with_idx(mut self, idx: i64) -> Self {
        self.idx = Some(idx);
        self
    }

    pub fn with_cites<I, S>(mut self, cites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cites = cites.into_iter().map(|c| Value::String(c.into())).collect();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Explicit-steps verification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRequest {
    pub steps: Vec<StepInput>,
    #[serde(default)]
    pub spans: Vec<Span>,
    #[serde(flatten)]
    pub options: VerifyOptions,
}

impl AuditRequest {
    pub fn new(steps: Vec<StepInput>, spans: Vec<Span>) -> Self {
        Self {
            steps,
            spans,
            options: VerifyOptions::default(),
        }
    }

    pub fn with_options(mut self, options: VerifyOptions) -> Self {
        self.options = options;
        self
    }
}
