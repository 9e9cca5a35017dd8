//! Span classification, context selection and evidence scrubbing.
//!
//! Only declarative spans count as evidence. Questions and instructions are
//! masked before they reach the verifier, so a span like "Is water wet?"
//! cannot be read as asserting its presupposition. For the prior prompt the
//! cited spans are replaced by a placeholder while keeping their ids, which
//! leaves the surrounding context unchanged.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

use super::types::{ContextMode, Span};

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid regex"));

static WH_QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(who|what|which|when|where|why|how)\b").expect("Invalid regex")
});

static AUX_QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(is|are|was|were|do|does|did|can|could|should|would|will|may|might|have|has|had)\b",
    )
    .expect("Invalid regex")
});

const QUESTION_PREFIXES: &[&str] = &["question:", "q:", "prompt:", "task:"];

const INSTRUCTION_PREFIXES: &[&str] = &[
    "reply with",
    "respond with",
    "choose",
    "select",
    "options:",
    "answers:",
    "a)",
    "b)",
    "c)",
    "d)",
    "(a)",
    "(b)",
    "(c)",
    "(d)",
];

/// Auxiliary-led spans with fewer spaces than this read as questions.
const SHORT_AUX_SPACES: usize = 12;

/// What a span does, as far as entailment is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpanKind {
    Question,
    Instruction,
    Assertion,
    Empty,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Question => "QUESTION",
            Self::Instruction => "INSTRUCTION",
            Self::Assertion => "ASSERTION",
            Self::Empty => "EMPTY",
        }
    }

    /// Whether spans of this kind may entail anything.
    pub fn is_evidence(&self) -> bool {
        matches!(self, Self::Assertion)
    }
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a span's text.
pub fn classify_span(text: &str) -> SpanKind {
    let collapsed = WHITESPACE.replace_all(text.trim(), " ");
    let t = collapsed.trim();
    if t.is_empty() {
        return SpanKind::Empty;
    }

    let lower = t.to_lowercase();
    if QUESTION_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return SpanKind::Question;
    }
    if INSTRUCTION_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return SpanKind::Instruction;
    }

    if t.ends_with('?') || WH_QUESTION.is_match(&lower) {
        return SpanKind::Question;
    }
    if AUX_QUESTION.is_match(&lower)
        && (t.contains('?') || t.matches(' ').count() < SHORT_AUX_SPACES)
    {
        return SpanKind::Question;
    }

    SpanKind::Assertion
}

/// Render spans as context lines `[sid] text`, masking non-assertions.
pub fn spans_block(spans: &[Span]) -> String {
    spans
        .iter()
        .map(|span| {
            let kind = classify_span(&span.text);
            if kind.is_evidence() {
                format!("[{}] {}", span.sid, span.text)
            } else {
                format!("[{}] [NON-EVIDENCE:{}]", span.sid, kind)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Copy `spans`, replacing the text of every span whose id is in `sids`.
pub fn scrub_spans_by_id<S: AsRef<str>>(spans: &[Span], sids: &[S], placeholder: &str) -> Vec<Span> {
    let scrub: HashSet<&str> = sids.iter().map(|s| s.as_ref()).collect();
    spans
        .iter()
        .map(|span| {
            if scrub.contains(span.sid.as_str()) {
                Span::new(span.sid.clone(), placeholder)
            } else {
                span.clone()
            }
        })
        .collect()
}

/// Spans shown to the verifier for a claim with the given cites.
pub fn select_context_spans(spans: &[Span], cites: &[String], mode: ContextMode) -> Vec<Span> {
    let cited = || {
        let cite_set: HashSet<&str> = cites.iter().map(String::as_str).collect();
        spans
            .iter()
            .filter(|s| cite_set.contains(s.sid.as_str()))
            .cloned()
            .collect()
    };

    match mode {
        ContextMode::All => spans.to_vec(),
        ContextMode::Cited => cited(),
        ContextMode::Auto if cites.is_empty() => spans.to_vec(),
        ContextMode::Auto => cited(),
    }
}
