//! Bernoulli KL divergence and the information-budget test.
//!
//! A claim with confidence target `t` needs at least `KL(t || p0)` nats of
//! evidence to move a verifier from its prior `p0` to `t`. The evidence
//! actually supplied `KL(p1 || p0)` nats, where `p1` is the posterior with the
//! cited spans visible. Both probabilities are intervals, so both quantities
//! are intervals; a claim is flagged only when even the most favorable
//! reading leaves the requirement unmet.

use super::types::{Interval, YesProbability};

/// Probabilities are clipped to `[KL_EPSILON, 1 - KL_EPSILON]` before use.
pub const KL_EPSILON: f64 = 1e-12;

fn clip(p: f64) -> f64 {
    if p.is_nan() {
        return 0.5;
    }
    p.clamp(KL_EPSILON, 1.0 - KL_EPSILON)
}

/// Bernoulli KL divergence D_KL(P || Q) in nats.
///
/// # Arguments
/// * `p` - Probability under the distribution being measured
/// * `q` - Probability under the reference distribution
pub fn bernoulli_kl_nats(p: f64, q: f64) -> f64 {
    let p = clip(p);
    let q = clip(q);
    let kl = p * (p / q).ln() + (1.0 - p) * ((1.0 - p) / (1.0 - q)).ln();
    // Rounding can leave tiny negatives when p == q.
    kl.max(0.0)
}

/// Bernoulli KL divergence in bits.
pub fn bernoulli_kl_bits(p: f64, q: f64) -> f64 {
    nats_to_bits(bernoulli_kl_nats(p, q))
}

pub fn nats_to_bits(nats: f64) -> f64 {
    nats / std::f64::consts::LN_2
}

/// Information needed to reach `target` from a prior in `[p0_lo, p0_hi]`.
///
/// The requirement is measured from both ends of the prior. For a prior
/// below the target the upper end gives the minimum.
pub fn required_interval(target: f64, p0_lo: f64, p0_hi: f64) -> Interval {
    let from_hi = bernoulli_kl_nats(target, p0_hi);
    let from_lo = bernoulli_kl_nats(target, p0_lo.max(KL_EPSILON));
    Interval::new(from_hi.min(from_lo), from_hi.max(from_lo))
}

/// Range of `KL(p1 || p0)` over the corners of the two intervals.
pub fn observed_interval(p1_lo: f64, p1_hi: f64, p0_lo: f64, p0_hi: f64) -> Interval {
    let corners = [
        bernoulli_kl_nats(p1_lo, p0_lo),
        bernoulli_kl_nats(p1_lo, p0_hi),
        bernoulli_kl_nats(p1_hi, p0_lo),
        bernoulli_kl_nats(p1_hi, p0_hi),
    ];
    let min = corners.iter().copied().fold(f64::INFINITY, f64::min);
    let max = corners.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Interval::new(min, max)
}

/// Outcome of the budget test, in nats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetBounds {
    pub required: Interval,
    pub observed: Interval,
    /// `[required.min - observed.max, required.max - observed.min]`
    pub gap: Interval,
    pub flagged: bool,
}

/// Run the budget test for one claim.
///
/// Flagged iff `required.min > observed.max`; a tie passes.
pub fn budget_from_intervals(
    target: f64,
    prior: &YesProbability,
    posterior: &YesProbability,
) -> BudgetBounds {
    let required = required_interval(target, prior.p_lower, prior.p_upper);
    let observed = observed_interval(
        posterior.p_lower,
        posterior.p_upper,
        prior.p_lower,
        prior.p_upper,
    );
    let gap = Interval::new(required.min - observed.max, required.max - observed.min);

    BudgetBounds {
        required,
        observed,
        gap,
        flagged: required.min > observed.max,
    }
}
