//! Per-(domain, model) Brier calibration. Runs on a rolling 90-day window
//! and only fires once enough outcomes have accumulated since the last run.

use crate::config::AgentConfig;
use crate::store::{self, DbPool};
use std::collections::HashMap;

const LOOKBACK_DAYS: i64 = 90;
const MIN_SAMPLES_PER_GROUP: usize = 3;

pub fn get_domain_weight(lookup: &HashMap<(String, String), f64>, domain: &str, model: &str) -> f64 {
    lookup.get(&(domain.to_string(), model.to_string())).copied().unwrap_or(1.0)
}

pub fn run_calibration(db: &DbPool, config: &AgentConfig) -> crate::errors::AgentResult<()> {
    let since = (chrono::Utc::now() - chrono::Duration::days(LOOKBACK_DAYS)).to_rfc3339();
    let outcomes = store::get_outcomes_since(db, &since)?;

    if (outcomes.len() as i64) < config.learning_batch_size {
        tracing::debug!(n = outcomes.len(), "skipping calibration, not enough outcomes yet");
        return Ok(());
    }

    let mut groups: HashMap<(String, String), Vec<f64>> = HashMap::new();
    for o in &outcomes {
        groups.entry((o.domain.clone(), o.model.clone())).or_default().push(o.brier);
    }

    for ((domain, model), briers) in groups {
        if briers.len() < MIN_SAMPLES_PER_GROUP {
            continue;
        }
        let mean_brier = briers.iter().sum::<f64>() / briers.len() as f64;
        let weight = brier_to_weight(mean_brier);
        store::upsert_calibration(db, &domain, &model, mean_brier, briers.len() as i64, weight, None)?;

        if mean_brier > super::RANDOM_BASELINE_BRIER {
            tracing::warn!(domain = %domain, model = %model, mean_brier, "ALERT: calibration worse than random baseline");
        } else {
            tracing::info!(domain = %domain, model = %model, mean_brier, weight, "calibration updated");
        }
    }

    Ok(())
}

fn brier_to_weight(mean_brier: f64) -> f64 {
    if mean_brier < 0.15 {
        1.5
    } else if mean_brier < 0.20 {
        1.2
    } else if mean_brier < 0.25 {
        1.0
    } else if mean_brier < 0.28 {
        0.7
    } else {
        0.3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brier_to_weight_step_function() {
        assert_eq!(brier_to_weight(0.10), 1.5);
        assert_eq!(brier_to_weight(0.18), 1.2);
        assert_eq!(brier_to_weight(0.22), 1.0);
        assert_eq!(brier_to_weight(0.27), 0.7);
        assert_eq!(brier_to_weight(0.30), 0.3);
    }

    #[test]
    fn get_domain_weight_defaults_to_one() {
        let lookup = HashMap::new();
        assert_eq!(get_domain_weight(&lookup, "finance", "gpt-4.1"), 1.0);
    }
}
