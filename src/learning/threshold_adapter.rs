//! Adapts each domain's entropy threshold by comparing how predictive
//! entropy actually is: if forecasts below tau resolve noticeably more
//! accurately than ones above it, tighten tau; if entropy carries no
//! separating signal for a domain, widen it instead.

use crate::config::AgentConfig;
use crate::store::{self, DbPool};
use std::collections::HashMap;

/// Brier cutoff below which an outcome counts as "correct" for separation purposes.
const CORRECT_BRIER_CUTOFF: f64 = 0.20;
const MIN_OUTCOMES_FOR_ADAPTATION: usize = 20;
const THRESHOLD_STEP: f64 = 0.25;
const MIN_THRESHOLD: f64 = 1.0;
const MAX_THRESHOLD: f64 = 8.0;
const LOOKBACK_DAYS: i64 = 60;

/// Recomputes and persists an entropy threshold per domain with enough
/// recent data, returning the domains that were actually updated.
pub fn run_threshold_adaptation(db: &DbPool, config: &AgentConfig) -> crate::errors::AgentResult<HashMap<String, f64>> {
    let since = (chrono::Utc::now() - chrono::Duration::days(LOOKBACK_DAYS)).to_rfc3339();
    let outcomes = store::get_outcomes_since(db, &since)?;
    let calibration = store::get_all_calibration(db)?;
    let forecast_entropy = store::get_forecast_entropies(db)?;

    let mut current_thresholds: HashMap<String, Vec<f64>> = HashMap::new();
    for c in &calibration {
        if let Some(t) = c.entropy_threshold {
            current_thresholds.entry(c.domain.clone()).or_default().push(t);
        }
    }
    let current: HashMap<String, f64> = current_thresholds
        .into_iter()
        .map(|(d, ts)| (d, ts.iter().sum::<f64>() / ts.len() as f64))
        .collect();

    // domain -> [(entropy, correct)]
    let mut domain_data: HashMap<String, Vec<(f64, bool)>> = HashMap::new();
    for o in &outcomes {
        let Some(entropy) = forecast_entropy.get(&o.forecast_id) else { continue };
        let correct = o.brier < CORRECT_BRIER_CUTOFF;
        domain_data.entry(o.domain.clone()).or_default().push((*entropy, correct));
    }

    let mut new_thresholds = HashMap::new();

    for (domain, points) in domain_data {
        if points.len() < MIN_OUTCOMES_FOR_ADAPTATION {
            tracing::debug!(domain = %domain, n = points.len(), need = MIN_OUTCOMES_FOR_ADAPTATION, "threshold adapt: not enough data yet");
            continue;
        }

        let tau = current.get(&domain).copied().unwrap_or(config.entropy_threshold_default);
        let new_tau = adapt_threshold(&points, tau);
        new_thresholds.insert(domain.clone(), new_tau);

        for model in calibration.iter().filter(|c| c.domain == domain).map(|c| c.model.clone()) {
            store::set_entropy_threshold(db, &domain, &model, new_tau)?;
        }

        tracing::info!(domain = %domain, from = tau, to = new_tau, "threshold adapted");
    }

    Ok(new_thresholds)
}

/// Separation metric: `P(correct | entropy < tau) - P(correct | entropy >= tau)`.
/// Strong separation (> 0.10) means entropy is predictive here, so tighten
/// tau to demand more of it; weak separation (< 0.05) means it isn't, so
/// widen tau rather than starve the pipeline of trades it would have taken.
fn adapt_threshold(points: &[(f64, bool)], current_tau: f64) -> f64 {
    let below: Vec<bool> = points.iter().filter(|(e, _)| *e < current_tau).map(|(_, c)| *c).collect();
    let above: Vec<bool> = points.iter().filter(|(e, _)| *e >= current_tau).map(|(_, c)| *c).collect();

    if below.is_empty() || above.is_empty() {
        return current_tau;
    }

    let p_below = below.iter().filter(|c| **c).count() as f64 / below.len() as f64;
    let p_above = above.iter().filter(|c| **c).count() as f64 / above.len() as f64;
    let separation = p_below - p_above;

    if separation > 0.10 {
        (current_tau - THRESHOLD_STEP).max(MIN_THRESHOLD)
    } else if separation < 0.05 {
        (current_tau + THRESHOLD_STEP).min(MAX_THRESHOLD)
    } else {
        current_tau
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_separation_tightens() {
        let points: Vec<(f64, bool)> = (0..10)
            .map(|i| if i < 5 { (2.0, true) } else { (6.0, false) })
            .collect();
        assert_eq!(adapt_threshold(&points, 4.0), 3.75);
    }

    #[test]
    fn no_separation_widens() {
        let points = vec![
            (2.0, true), (2.0, true), (2.0, false), (2.0, false), (2.0, false),
            (6.0, true), (6.0, true), (6.0, false), (6.0, false), (6.0, false),
        ];
        assert_eq!(adapt_threshold(&points, 4.0), 4.25);
    }

    #[test]
    fn missing_either_side_keeps_current() {
        let points = vec![(2.0, true), (2.0, true)];
        assert_eq!(adapt_threshold(&points, 4.0), 4.0);
    }

    #[test]
    fn threshold_clamped_to_bounds() {
        let points: Vec<(f64, bool)> = (0..10)
            .map(|i| if i < 5 { (0.5, true) } else { (6.0, false) })
            .collect();
        assert_eq!(adapt_threshold(&points, 1.1), MIN_THRESHOLD);
    }
}
