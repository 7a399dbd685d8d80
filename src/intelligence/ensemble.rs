//! Combines per-model forecasts into one ensemble probability, weighted by
//! model weight times domain calibration weight.

use super::entropy::confidence_tier;
use super::forecaster::Forecast;
use crate::store::model::CalibrationStateRow;
use std::collections::HashMap;

pub struct EnsembleResult {
    pub probability: f64,
    pub entropy: f64,
    pub confidence_tier: &'static str,
}

/// `model_weights` and `domain_weights` both default to 1.0 for a
/// model/domain with no stored weight yet. Any model whose combined weight
/// is <= 0 (a killed model, or a zeroed domain weight) is skipped.
pub fn combine(
    forecasts: &[Forecast],
    model_weights: &HashMap<String, f64>,
    domain_weights: &HashMap<String, f64>,
    domain_threshold: Option<f64>,
) -> EnsembleResult {
    if forecasts.is_empty() {
        return EnsembleResult { probability: 0.5, entropy: 6.0, confidence_tier: "low" };
    }

    let mut weighted_sum = 0.0;
    let mut entropy_sum = 0.0;
    let mut weight_total = 0.0;

    for f in forecasts {
        let mw = model_weights.get(&f.model).copied().unwrap_or(1.0);
        let dw = domain_weights.get(&f.model).copied().unwrap_or(1.0);
        let w = mw * dw;
        if w <= 0.0 {
            continue;
        }
        weighted_sum += f.raw_probability * w;
        entropy_sum += f.entropy * w;
        weight_total += w;
    }

    if weight_total <= 0.0 {
        let mean = forecasts.iter().map(|f| f.raw_probability).sum::<f64>() / forecasts.len() as f64;
        return EnsembleResult { probability: mean, entropy: 5.0, confidence_tier: "low" };
    }

    let probability = weighted_sum / weight_total;
    let entropy = entropy_sum / weight_total;
    EnsembleResult { probability, entropy, confidence_tier: confidence_tier(entropy, domain_threshold) }
}

/// Builds a `(domain, model) -> domain_weight` lookup from stored calibration rows.
pub fn build_calibration_lookup(rows: &[CalibrationStateRow]) -> HashMap<(String, String), f64> {
    rows.iter()
        .map(|r| ((r.domain.clone(), r.model.clone()), r.domain_weight))
        .collect()
}

/// Builds a `domain -> entropy_threshold` lookup, taking the first
/// non-null threshold seen per domain.
pub fn build_domain_thresholds(rows: &[CalibrationStateRow]) -> HashMap<String, f64> {
    let mut out = HashMap::new();
    for r in rows {
        if let Some(t) = r.entropy_threshold {
            out.entry(r.domain.clone()).or_insert(t);
        }
    }
    out
}

/// Projects the `(domain, model)` calibration lookup down to a
/// `model -> weight` map for a single domain, for use in `combine`.
pub fn domain_weights_for(
    lookup: &HashMap<(String, String), f64>,
    domain: &str,
    models: &[String],
) -> HashMap<String, f64> {
    models
        .iter()
        .map(|m| (m.clone(), lookup.get(&(domain.to_string(), m.clone())).copied().unwrap_or(1.0)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forecast(model: &str, prob: f64, entropy: f64) -> Forecast {
        Forecast {
            model: model.to_string(),
            prompt_version: "v1-baseline".to_string(),
            raw_probability: prob,
            entropy,
            confidence: "high",
            reasoning: None,
            news_used: false,
        }
    }

    #[test]
    fn empty_forecasts_return_neutral_default() {
        let result = combine(&[], &HashMap::new(), &HashMap::new(), None);
        assert_eq!(result.probability, 0.5);
        assert_eq!(result.confidence_tier, "low");
    }

    #[test]
    fn equal_weights_average_directly() {
        let forecasts = vec![forecast("a", 0.6, 2.0), forecast("b", 0.8, 2.0)];
        let result = combine(&forecasts, &HashMap::new(), &HashMap::new(), None);
        assert!((result.probability - 0.7).abs() < 1e-9);
    }

    #[test]
    fn zero_weight_model_is_excluded() {
        let forecasts = vec![forecast("a", 0.9, 1.0), forecast("b", 0.1, 1.0)];
        let mut weights = HashMap::new();
        weights.insert("b".to_string(), 0.0);
        let result = combine(&forecasts, &weights, &HashMap::new(), None);
        assert!((result.probability - 0.9).abs() < 1e-9);
    }

    #[test]
    fn all_zero_weights_falls_back_to_arithmetic_mean() {
        let forecasts = vec![forecast("a", 0.9, 1.0), forecast("b", 0.1, 1.0)];
        let mut weights = HashMap::new();
        weights.insert("a".to_string(), 0.0);
        weights.insert("b".to_string(), 0.0);
        let result = combine(&forecasts, &weights, &HashMap::new(), None);
        assert!((result.probability - 0.5).abs() < 1e-9);
        assert_eq!(result.confidence_tier, "low");
    }
}
