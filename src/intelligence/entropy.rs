//! Token-logprob entropy and the confidence tier derived from it. Entropy is
//! measured in bits (log base 2), matching the original's
//! `-logprob / ln(2)` per-token averaging.

/// Fallback entropy when a provider returns no logprobs at all.
pub const ENTROPY_THRESHOLD_DEFAULT: f64 = 4.0;

/// Mean bits of surprisal across a token's logprob sequence. Each logprob is
/// clamped away from zero first so a token the model was fully certain about
/// (lp == 0.0) doesn't produce a literal -infinity.
pub fn compute_sequence_entropy(logprobs: &[f64]) -> f64 {
    if logprobs.is_empty() {
        return ENTROPY_THRESHOLD_DEFAULT;
    }
    let sum: f64 = logprobs
        .iter()
        .map(|lp| -lp.min(-1e-9) / std::f64::consts::LN_2)
        .sum();
    sum / logprobs.len() as f64
}

/// Entropy of the renormalized top-k distribution at each token position,
/// averaged across positions. `top_logprobs` is one inner slice per token.
pub fn compute_distribution_entropy(top_logprobs: &[Vec<f64>]) -> f64 {
    if top_logprobs.is_empty() {
        return ENTROPY_THRESHOLD_DEFAULT;
    }
    let mut total = 0.0;
    let mut n = 0usize;
    for token_lps in top_logprobs {
        if token_lps.is_empty() {
            continue;
        }
        let exps: Vec<f64> = token_lps.iter().map(|lp| lp.exp()).collect();
        let sum: f64 = exps.iter().sum();
        if sum <= 0.0 {
            continue;
        }
        let probs: Vec<f64> = exps.iter().map(|e| e / sum).collect();
        let h: f64 = probs.iter().filter(|p| **p > 0.0).map(|p| -p * p.log2()).sum();
        total += h;
        n += 1;
    }
    if n == 0 {
        ENTROPY_THRESHOLD_DEFAULT
    } else {
        total / n as f64
    }
}

/// "high" <= threshold, "medium" <= threshold*1.5, else "low". `domain_threshold`
/// overrides the global default when a calibrated per-domain tau exists.
pub fn confidence_tier(entropy: f64, domain_threshold: Option<f64>) -> &'static str {
    let threshold = domain_threshold.unwrap_or(ENTROPY_THRESHOLD_DEFAULT);
    let medium_threshold = threshold * 1.5;
    if entropy <= threshold {
        "high"
    } else if entropy <= medium_threshold {
        "medium"
    } else {
        "low"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_logprobs_falls_back_to_default() {
        assert_eq!(compute_sequence_entropy(&[]), ENTROPY_THRESHOLD_DEFAULT);
    }

    #[test]
    fn confident_token_has_low_entropy() {
        let e = compute_sequence_entropy(&[-0.01, -0.02]);
        assert!(e < 1.0);
        assert_eq!(confidence_tier(e, None), "high");
    }

    #[test]
    fn tier_thresholds() {
        assert_eq!(confidence_tier(4.0, None), "high");
        assert_eq!(confidence_tier(5.0, None), "medium");
        assert_eq!(confidence_tier(6.01, None), "low");
    }

    #[test]
    fn domain_threshold_overrides_default() {
        assert_eq!(confidence_tier(1.5, Some(1.0)), "medium");
        assert_eq!(confidence_tier(0.9, Some(1.0)), "high");
    }
}
