//! Property-based tests for the budget test and its inputs.
//!
//! These cover invariants that must hold for any probabilities a backend
//! could report:
//!
//! - KL divergence is non-negative and zero on identical arguments
//! - required and observed intervals are ordered
//! - a point prior never flags a claim its `[0, u]` bound passed
//! - top-k extraction keeps YES bounds inside `[0, 1]`

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::epistemic::claims::ClaimExtractor;
    use crate::epistemic::kl::{
        bernoulli_kl_nats, budget_from_intervals, observed_interval, required_interval,
    };
    use crate::epistemic::topk::{extract_answer_topk, yes_probability};
    use crate::epistemic::types::YesProbability;
    use crate::llm::{TokenInfo, TopLogprob};

    fn probability() -> impl Strategy<Value = f64> {
        prop_oneof![
            Just(0.0),
            Just(1.0),
            Just(0.5),
            0.0f64..=1.0f64,
        ]
    }

    fn ordered_pair() -> impl Strategy<Value = (f64, f64)> {
        (probability(), probability()).prop_map(|(a, b)| if a <= b { (a, b) } else { (b, a) })
    }

    /// Posteriors concentrated near zero exercise the flagged region.
    fn posterior() -> impl Strategy<Value = (f64, f64)> {
        prop_oneof![
            (0.0f64..0.01, 0.0f64..0.01)
                .prop_map(|(a, b)| if a <= b { (a, b) } else { (b, a) }),
            ordered_pair(),
        ]
    }

    fn logprob() -> impl Strategy<Value = f64> {
        prop_oneof![Just(0.0), -30.0f64..=0.0f64]
    }

    fn alternatives() -> impl Strategy<Value = Vec<(String, f64)>> {
        let token = prop_oneof![
            Just("YES".to_string()),
            Just(" YES".to_string()),
            Just("NO".to_string()),
            Just("UNSURE".to_string()),
            Just(" ".to_string()),
            "[a-z]{1,4}",
        ];
        prop::collection::vec((token, logprob()), 0..8)
    }

    // =========================================================================
    // KL Divergence
    // =========================================================================

    proptest! {
        #[test]
        fn kl_is_non_negative(p in probability(), q in probability()) {
            let kl = bernoulli_kl_nats(p, q);
            prop_assert!(kl >= 0.0, "KL({}, {}) = {}", p, q, kl);
            prop_assert!(kl.is_finite());
        }

        #[test]
        fn kl_is_zero_for_identical(p in probability()) {
            prop_assert!(bernoulli_kl_nats(p, p).abs() < 1e-9);
        }
    }

    // =========================================================================
    // Interval Ordering
    // =========================================================================

    proptest! {
        #[test]
        fn required_interval_is_ordered(t in 0.01f64..0.99, (lo, hi) in ordered_pair()) {
            let req = required_interval(t, lo, hi);
            prop_assert!(req.min <= req.max, "{:?}", req);
        }

        #[test]
        fn observed_interval_is_ordered(
            (p1_lo, p1_hi) in ordered_pair(),
            (p0_lo, p0_hi) in ordered_pair(),
        ) {
            let obs = observed_interval(p1_lo, p1_hi, p0_lo, p0_hi);
            prop_assert!(obs.min <= obs.max, "{:?}", obs);
            prop_assert!(obs.min >= 0.0);
        }

        #[test]
        fn gap_is_ordered(
            t in 0.01f64..0.99,
            (p0_lo, p0_hi) in ordered_pair(),
            (p1_lo, p1_hi) in ordered_pair(),
        ) {
            let bounds = budget_from_intervals(
                t,
                &YesProbability::bounds(p0_lo, p0_hi),
                &YesProbability::bounds(p1_lo, p1_hi),
            );
            prop_assert!(bounds.gap.min <= bounds.gap.max);
            prop_assert_eq!(bounds.flagged, bounds.gap.min > 0.0);
        }
    }

    // =========================================================================
    // Flag Conservatism
    // =========================================================================

    proptest! {
        /// Learning the prior exactly (YES observed with probability p) never
        /// introduces a flag the `[0, u]` upper-bound prior did not already raise,
        /// for any p within that bound.
        #[test]
        fn point_prior_never_adds_flag(
            t in 0.5f64..0.99,
            u_frac in 0.001f64..=1.0,
            p_frac in 0.0f64..=1.0,
            (p1_lo, p1_hi) in posterior(),
        ) {
            let u = t * u_frac;
            let p = u * p_frac;
            let post = YesProbability::bounds(p1_lo, p1_hi);

            let bounded = budget_from_intervals(t, &YesProbability::bounds(0.0, u), &post);
            let exact = budget_from_intervals(t, &YesProbability::bounds(p, p), &post);

            if bounded.flagged {
                prop_assert!(
                    exact.flagged,
                    "t={} u={} p={} post=[{}, {}]: bounded {:?} exact {:?}",
                    t, u, p, p1_lo, p1_hi, bounded, exact
                );
            }
            if !exact.flagged {
                prop_assert!(!bounded.flagged);
            }
        }

        /// A higher posterior never turns a passing claim into a flagged one
        /// when the prior is a point below it.
        #[test]
        fn more_posterior_support_never_adds_flag(
            t in 0.5f64..0.99,
            p0 in 0.01f64..0.5,
            a in 0.0f64..=1.0,
            b in 0.0f64..=1.0,
        ) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            prop_assume!(low >= p0);
            let prior = YesProbability::bounds(p0, p0);

            let weak = budget_from_intervals(t, &prior, &YesProbability::bounds(low, low));
            let strong = budget_from_intervals(t, &prior, &YesProbability::bounds(high, high));
            if !weak.flagged {
                prop_assert!(!strong.flagged);
            }
        }
    }

    // =========================================================================
    // Extraction
    // =========================================================================

    proptest! {
        #[test]
        fn yes_bounds_stay_in_unit_interval(
            generated in prop_oneof![Just("YES".to_string()), Just("NO".to_string()), Just(" ".to_string())],
            lp in logprob(),
            alts in alternatives(),
        ) {
            let info = TokenInfo::new(generated, lp).with_alternatives(
                alts.iter().map(|(t, lp)| TopLogprob::new(t.clone(), *lp)).collect(),
            );
            let topk = extract_answer_topk(&[info]).unwrap();
            let yes = yes_probability(&topk);

            prop_assert!(yes.p_lower >= 0.0);
            prop_assert!(yes.p_lower <= yes.p_upper);
            prop_assert!(yes.p_upper <= 1.0);
            prop_assert!(topk.topk_logprobs.keys().all(|k| !k.is_empty() && !k.starts_with(' ')));
            if let Some(kth) = topk.kth_logprob {
                prop_assert!(topk.topk_logprobs.values().all(|v| *v >= kth));
            }
        }

        #[test]
        fn claims_respect_max_claims(
            sentences in prop::collection::vec("[A-Z][a-z]{2,8}( \\[S[0-9]\\])?\\.", 0..12),
            max_claims in 0usize..6,
        ) {
            let answer = sentences.join(" ");
            let claims = ClaimExtractor::new().with_max_claims(max_claims).split(&answer);
            prop_assert!(claims.len() <= max_claims.max(1));
            prop_assert!(claims.iter().all(|c| !c.trim().is_empty()));
        }
    }
}
