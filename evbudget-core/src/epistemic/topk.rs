//! Answer-token distributions and P(YES) bounds.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::llm::TokenInfo;

use super::types::{TokenTopK, YesProbability};

/// Extract the top-k distribution at the first non-whitespace output token.
///
/// Falls back to position 0 when every token is whitespace. Alternatives are
/// keyed by their left-trimmed text; repeated keys keep the highest logprob.
pub fn extract_answer_topk(tokens: &[TokenInfo]) -> Result<TokenTopK> {
    if tokens.is_empty() {
        return Err(Error::EmptyLogprobs);
    }

    let position = tokens
        .iter()
        .position(|t| !t.token.trim().is_empty())
        .unwrap_or(0);
    let chosen = &tokens[position];
    let generated_logprob = chosen.logprob.ok_or(Error::MissingLogprob)?;

    let mut topk_logprobs: BTreeMap<String, f64> = BTreeMap::new();
    for alt in &chosen.top_logprobs {
        let Some(lp) = alt.logprob else { continue };
        let key = alt.token.trim_start();
        if key.is_empty() {
            continue;
        }
        topk_logprobs
            .entry(key.to_string())
            .and_modify(|best| *best = best.max(lp))
            .or_insert(lp);
    }

    let kth_logprob = chosen
        .top_logprobs
        .iter()
        .filter_map(|alt| alt.logprob)
        .reduce(f64::min);

    Ok(TokenTopK {
        position,
        generated_token: chosen.token.clone(),
        generated_logprob,
        topk_logprobs,
        kth_logprob,
    })
}

/// Bound P(YES) from a top-k distribution.
///
/// When `YES` is among the alternatives its mass is known exactly. When it is
/// not, it can be at most as likely as the least likely alternative shown.
pub fn yes_probability(topk: &TokenTopK) -> YesProbability {
    let yes_mass: Option<f64> = topk
        .topk_logprobs
        .iter()
        .filter(|(token, _)| token.trim().to_uppercase() == "YES")
        .map(|(_, lp)| lp.exp())
        .reduce(|a, b| a + b);

    let (p_lower, p_upper) = match yes_mass {
        Some(p) => {
            let p = p.clamp(0.0, 1.0);
            (p, p)
        }
        None => match topk.kth_logprob {
            Some(kth) if kth.is_finite() => (0.0, kth.exp()),
            _ => (0.0, 1.0),
        },
    };

    YesProbability {
        p_lower,
        p_upper,
        generated_token: topk.generated_token.clone(),
        generated_logprob: topk.generated_logprob,
        kth_logprob: topk.kth_logprob,
        topk: topk.topk_logprobs.clone(),
    }
}

/// Extract and bound in one step.
pub fn yes_probability_from_logprobs(tokens: &[TokenInfo]) -> Result<YesProbability> {
    Ok(yes_probability(&extract_answer_topk(tokens)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TopLogprob;

    fn token(text: &str, lp: f64, alts: &[(&str, f64)]) -> TokenInfo {
        TokenInfo::new(text, lp).with_alternatives(
            alts.iter()
                .map(|(t, lp)| TopLogprob::new(*t, *lp))
                .collect(),
        )
    }

    #[test]
    fn test_empty_sequence() {
        assert!(matches!(extract_answer_topk(&[]), Err(Error::EmptyLogprobs)));
    }

    #[test]
    fn test_skips_leading_whitespace_tokens() {
        let tokens = vec![
            token(" ", -0.01, &[(" ", -0.01)]),
            token("YES", -0.2, &[("YES", -0.2), ("NO", -1.8)]),
        ];
        let topk = extract_answer_topk(&tokens).unwrap();
        assert_eq!(topk.position, 1);
        assert_eq!(topk.generated_token, "YES");
        assert_eq!(topk.kth_logprob, Some(-1.8));
    }

    #[test]
    fn test_all_whitespace_uses_first() {
        let tokens = vec![token("\n", -0.3, &[]), token(" ", -0.1, &[])];
        let topk = extract_answer_topk(&tokens).unwrap();
        assert_eq!(topk.position, 0);
        assert_eq!(topk.kth_logprob, None);
    }

    #[test]
    fn test_missing_generated_logprob() {
        let tokens = vec![TokenInfo {
            token: "YES".to_string(),
            logprob: None,
            top_logprobs: Vec::new(),
        }];
        assert!(matches!(
            extract_answer_topk(&tokens),
            Err(Error::MissingLogprob)
        ));
    }

    #[test]
    fn test_keys_trimmed_and_max_kept() {
        let mut tok = token("YES", -0.5, &[(" YES", -0.9), ("YES", -0.5), ("  ", -3.0)]);
        tok.top_logprobs.push(TopLogprob {
            token: "NO".to_string(),
            logprob: None,
        });
        let topk = extract_answer_topk(&[tok]).unwrap();

        assert_eq!(topk.topk_logprobs.len(), 1);
        assert_eq!(topk.topk_logprobs["YES"], -0.5);
        // The whitespace alternative still bounds the tail.
        assert_eq!(topk.kth_logprob, Some(-3.0));
    }

    #[test]
    fn test_yes_probability_exact() {
        let tokens = vec![token(
            "YES",
            0.8f64.ln(),
            &[("YES", 0.8f64.ln()), ("yes", 0.05f64.ln()), ("NO", 0.1f64.ln())],
        )];
        let yes = yes_probability_from_logprobs(&tokens).unwrap();
        assert!((yes.p_lower - 0.85).abs() < 1e-9);
        assert_eq!(yes.p_lower, yes.p_upper);
    }

    #[test]
    fn test_yes_absent_uses_kth_bound() {
        let tokens = vec![token(
            "NO",
            0.7f64.ln(),
            &[("NO", 0.7f64.ln()), ("UNSURE", 0.2f64.ln())],
        )];
        let yes = yes_probability_from_logprobs(&tokens).unwrap();
        assert_eq!(yes.p_lower, 0.0);
        assert!((yes.p_upper - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_yes_absent_without_alternatives() {
        let tokens = vec![token("NO", -0.1, &[])];
        let yes = yes_probability_from_logprobs(&tokens).unwrap();
        assert_eq!((yes.p_lower, yes.p_upper), (0.0, 1.0));
    }

    #[test]
    fn test_yes_mass_clamped() {
        let tokens = vec![token("YES", 0.0, &[("YES", 0.0), (" YES ", -0.1)])];
        let yes = yes_probability_from_logprobs(&tokens).unwrap();
        assert_eq!(yes.p_upper, 1.0);
    }
}
