//! Claim and citation extraction.
//!
//! Free-text answers are split into claims at sentence (or line)
//! boundaries. Citation markers stay in the claim text and are collected as
//! the claim's cites. A citation that lands at the start of the next
//! sentence, as in `"Fact one. [S0] Fact two."`, belongs to the sentence
//! before it and is moved back.

use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use crate::error::{Error, Result};

use super::types::{ClaimSplit, Span, Step, StepInput};

/// Default citation marker: `[S0]`, `[doc_a]`, `[3]`.
pub const DEFAULT_CITATION_PATTERN: &str = r"\[(?P<id>[A-Za-z]\w*|\d+)\]";

static DEFAULT_CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DEFAULT_CITATION_PATTERN).expect("Invalid regex"));

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+").expect("Invalid regex"));

/// Separators allowed between citations in a citation-only segment.
static CITATION_FILLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s,;:.\-–—!?]+").expect("Invalid regex"));

/// Maps a raw citation token onto a known span id.
pub trait CitationResolver: Send + Sync {
    /// Return the known id `raw` refers to, or `None` to keep it verbatim.
    fn resolve(&self, raw: &str, known: &HashSet<String>) -> Option<String>;
}

/// Exact match, then `n` → `S<n>` / `S<n-1>`, then `S<n>` → `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackResolver {
    numeric: bool,
    zero_based: bool,
    strip_prefix: bool,
}

impl Default for FallbackResolver {
    fn default() -> Self {
        Self {
            numeric: true,
            zero_based: true,
            strip_prefix: true,
        }
    }
}

impl FallbackResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only exact id matches resolve.
    pub fn exact_only() -> Self {
        Self {
            numeric: false,
            zero_based: false,
            strip_prefix: false,
        }
    }

    /// Treat bare numbers as `S<n>` only, never as the 1-based `S<n-1>`.
    pub fn without_zero_based(mut self) -> Self {
        self.zero_based = false;
        self
    }
}

impl CitationResolver for FallbackResolver {
    fn resolve(&self, raw: &str, known: &HashSet<String>) -> Option<String> {
        if known.contains(raw) {
            return Some(raw.to_string());
        }

        if self.numeric && is_ascii_digits(raw) {
            if let Ok(n) = raw.parse::<u64>() {
                let direct = format!("S{}", n);
                if known.contains(&direct) {
                    return Some(direct);
                }
                if self.zero_based && n > 0 {
                    let shifted = format!("S{}", n - 1);
                    if known.contains(&shifted) {
                        return Some(shifted);
                    }
                }
            }
        }

        if self.strip_prefix {
            if let Some(tail) = raw.strip_prefix('S') {
                if is_ascii_digits(tail) && known.contains(tail) {
                    return Some(tail.to_string());
                }
            }
        }

        None
    }
}

fn is_ascii_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Resolve raw citations against `known`, keeping unresolved ones verbatim.
/// The result is deduplicated in first-seen order.
pub fn reconcile_citations(
    raw: &[String],
    known: &HashSet<String>,
    resolver: &dyn CitationResolver,
) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .map(|c| resolver.resolve(c, known).unwrap_or_else(|| c.clone()))
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

/// Split at whitespace runs that follow `.`, `!` or `?`.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        // The punctuation is a single ASCII byte and stays with its sentence.
        parts.push(&text[start..m.start() + 1]);
        start = m.end();
    }
    parts.push(&text[start..]);
    parts
}

/// Extracts claims and their citations from free text.
#[derive(Clone)]
pub struct ClaimExtractor {
    split: ClaimSplit,
    citation_re: Regex,
    max_claims: usize,
    resolver: Arc<dyn CitationResolver>,
}

impl Default for ClaimExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClaimExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimExtractor")
            .field("split", &self.split)
            .field("citation_re", &self.citation_re.as_str())
            .field("max_claims", &self.max_claims)
            .finish()
    }
}

impl ClaimExtractor {
    pub fn new() -> Self {
        Self {
            split: ClaimSplit::Sentences,
            citation_re: DEFAULT_CITATION_RE.clone(),
            max_claims: 25,
            resolver: Arc::new(FallbackResolver::default()),
        }
    }

    pub fn with_split(mut self, split: ClaimSplit) -> Self {
        self.split = split;
        self
    }

    /// Use a custom citation marker. The `id` group, else group 1, else the
    /// whole match is taken as the span id.
    pub fn with_citation_regex(mut self, pattern: &str) -> Result<Self> {
        self.citation_re = Regex::new(pattern)
            .map_err(|e| Error::invalid_input(format!("Invalid citation_regex: {}", e)))?;
        Ok(self)
    }

    /// Cap the number of claims (at least 1).
    pub fn with_max_claims(mut self, max_claims: usize) -> Self {
        self.max_claims = max_claims;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn CitationResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Split an answer into claims, reattaching stray citations.
    pub fn split(&self, answer: &str) -> Vec<String> {
        let answer = answer.trim();
        if answer.is_empty() {
            return Vec::new();
        }

        let segments: Vec<&str> = match self.split {
            ClaimSplit::Lines => answer.lines().collect(),
            ClaimSplit::Sentences => split_sentences(answer),
        };

        let mut merged: Vec<String> = Vec::new();
        for segment in segments.into_iter().map(str::trim).filter(|s| !s.is_empty()) {
            let Some(last) = merged.last_mut() else {
                merged.push(segment.to_string());
                continue;
            };

            if self.is_citation_only(segment) {
                last.push(' ');
                last.push_str(segment);
                continue;
            }

            let mut segment = segment;
            if let Some(end) = self.citation_prefix_end(segment) {
                let prefix = segment[..end].trim();
                let rest = segment[end..]
                    .trim_start_matches(|c: char| {
                        c.is_whitespace() || matches!(c, ',' | ';' | ':' | '-' | '–' | '—')
                    })
                    .trim();
                if !prefix.is_empty() && !rest.is_empty() {
                    last.push(' ');
                    last.push_str(prefix);
                    segment = rest;
                }
            }
            merged.push(segment.to_string());
        }

        merged.truncate(self.max_claims.max(1));
        merged
    }

    /// End offset of the run of citation markers at the start of `text`.
    /// Markers may be separated by the same filler a citation-only segment allows.
    fn citation_prefix_end(&self, text: &str) -> Option<usize> {
        let mut pos = 0;
        let mut end = None;
        loop {
            let at = match CITATION_FILLER.find_at(text, pos) {
                Some(m) if m.start() == pos => m.end(),
                _ => pos,
            };
            match self.citation_re.find_at(text, at) {
                Some(m) if m.start() == at && m.end() > at => {
                    end = Some(m.end());
                    pos = m.end();
                }
                _ => break,
            }
        }
        end
    }

    fn is_citation_only(&self, text: &str) -> bool {
        if !self.citation_re.is_match(text) {
            return false;
        }
        let without_cites = self.citation_re.replace_all(text, "");
        CITATION_FILLER.replace_all(&without_cites, "").is_empty()
    }

    /// Citation ids in `text`, in order of appearance.
    pub fn extract_cites(&self, text: &str) -> Vec<String> {
        self.citation_re
            .captures_iter(text)
            .filter_map(|caps| {
                caps.name("id")
                    .or_else(|| caps.get(1))
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().trim().to_string())
            })
            .filter(|c| !c.is_empty())
            .collect()
    }

    /// Split `answer` into steps with reconciled cites and a shared target.
    pub fn extract(&self, answer: &str, spans: &[Span], target: f64) -> Vec<Step> {
        let known: HashSet<String> = spans.iter().map(|s| s.sid.clone()).collect();
        self.split(answer)
            .into_iter()
            .enumerate()
            .map(|(i, claim)| {
                let raw = self.extract_cites(&claim);
                let cites = reconcile_citations(&raw, &known, self.resolver.as_ref());
                Step::new(i as i64, claim, cites, target)
            })
            .collect()
    }
}

/// Trim spans and drop those with an empty id or text.
pub fn normalize_spans(spans: &[Span]) -> Vec<Span> {
    spans
        .iter()
        .filter_map(|s| {
            let sid = s.sid.trim();
            let text = s.text.trim();
            (!sid.is_empty() && !text.is_empty()).then(|| Span::new(sid, text))
        })
        .collect()
}

/// The confidence target for a claim.
///
/// Missing, non-finite and non-positive confidences use `default_target`.
/// Targets below `min_target` are raised to it.
pub fn resolve_target(confidence: Option<f64>, default_target: f64, min_target: Option<f64>) -> f64 {
    let target = confidence
        .filter(|c| c.is_finite() && *c > 0.0)
        .unwrap_or(default_target);
    match min_target {
        Some(min) if min.is_finite() => target.max(min),
        _ => target,
    }
}

fn cite_to_string(value: &Value) -> Option<String> {
    let raw = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Normalize caller-supplied steps.
///
/// Empty claims are dropped and `idx` defaults to the input position. At most
/// `max(1, max_steps)` steps are kept, counted in input order, and the result
/// is then stably sorted by `idx`.
pub fn normalize_steps(
    inputs: &[StepInput],
    default_target: f64,
    min_target: Option<f64>,
    max_steps: usize,
) -> Vec<Step> {
    let mut steps: Vec<Step> = inputs
        .iter()
        .enumerate()
        .filter_map(|(i, input)| {
            let claim = input.claim.trim();
            if claim.is_empty() {
                return None;
            }
            let cites = input.cites.iter().filter_map(cite_to_string).collect();
            Some(Step::new(
                input.idx.unwrap_or(i as i64),
                claim,
                cites,
                resolve_target(input.confidence, default_target, min_target),
            ))
        })
        .take(max_steps.max(1))
        .collect();
    steps.sort_by_key(|s| s.idx);
    steps
}
