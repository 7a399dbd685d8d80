//! Reranks active models by rolling 30-day Brier score. A model whose mean
//! Brier exceeds `config.model_kill_brier` is zeroed out of rotation;
//! survivors are renormalized so active weights sum to 1.0.

use crate::config::AgentConfig;
use crate::intelligence::forecaster::{self, ModelConfig};
use crate::store::{self, DbPool};
use std::collections::HashMap;

const ROLLING_WINDOW_DAYS: i64 = 30;

/// Computes fresh model weights from recent outcomes and persists them.
/// Returns the new weight map, keyed by model id.
pub fn run_model_selection(db: &DbPool, config: &AgentConfig) -> crate::errors::AgentResult<HashMap<String, f64>> {
    let since = (chrono::Utc::now() - chrono::Duration::days(ROLLING_WINDOW_DAYS)).to_rfc3339();
    let outcomes = store::get_outcomes_since(db, &since)?;

    let mut model_briers: HashMap<String, Vec<f64>> = HashMap::new();
    for o in &outcomes {
        model_briers.entry(o.model.clone()).or_default().push(o.brier);
    }

    let existing_weights = store::get_model_weights(db)?;
    let mut weights: HashMap<String, f64> = HashMap::new();
    let mut means: HashMap<String, Option<f64>> = HashMap::new();
    let mut counts: HashMap<String, i64> = HashMap::new();

    for cfg in forecaster::default_models() {
        let briers = model_briers.get(&cfg.id).cloned().unwrap_or_default();

        if briers.is_empty() {
            let w = existing_weights.get(&cfg.id).copied().unwrap_or(cfg.weight);
            weights.insert(cfg.id.clone(), w);
            means.insert(cfg.id.clone(), None);
            counts.insert(cfg.id.clone(), 0);
            continue;
        }

        let n = briers.len() as i64;
        let mean_brier = briers.iter().sum::<f64>() / briers.len() as f64;

        let w = if mean_brier > config.model_kill_brier {
            tracing::warn!(
                model = %cfg.id, mean_brier, kill_threshold = config.model_kill_brier,
                "KILL SWITCH: removing model from rotation"
            );
            0.0
        } else {
            // skill = 1 - (brier / random-baseline); floor so a killed model
            // isn't the only zero the ensemble ever sees.
            (1.0 - mean_brier / super::RANDOM_BASELINE_BRIER).max(0.01)
        };

        tracing::info!(model = %cfg.id, mean_brier, n, weight = w, "model weight computed");

        weights.insert(cfg.id.clone(), w);
        means.insert(cfg.id.clone(), Some(mean_brier));
        counts.insert(cfg.id, n);
    }

    // Normalise non-zero weights to sum to 1, then persist each model's
    // final weight exactly once -- the source writes twice (pre- and
    // post-normalization); this halves the writes while leaving the
    // persisted result identical.
    let total: f64 = weights.values().filter(|w| **w > 0.0).sum();
    for (model, w) in weights.iter_mut() {
        if total > 0.0 {
            *w /= total;
        }
        store::upsert_model_weight(db, model, *w, means.get(model).copied().flatten(), counts.get(model).copied().unwrap_or(0))?;
    }

    tracing::info!(?weights, "model weights updated");
    Ok(weights)
}

/// Loads current weights from the store, falling back to each model's
/// configured default for one that has never been scored yet.
pub fn get_current_weights(db: &DbPool) -> crate::errors::AgentResult<HashMap<String, f64>> {
    let stored = store::get_model_weights(db)?;
    let mut out = HashMap::new();
    for cfg in forecaster::default_models() {
        let w = stored.get(&cfg.id).copied().unwrap_or(cfg.weight);
        out.insert(cfg.id, w);
    }
    Ok(out)
}

/// Applies current weights onto the default model configs, for use as the
/// forecaster's per-call model list.
pub fn weighted_model_configs(weights: &HashMap<String, f64>) -> Vec<ModelConfig> {
    forecaster::default_models()
        .into_iter()
        .map(|mut cfg| {
            if let Some(w) = weights.get(&cfg.id) {
                cfg.weight = *w;
            }
            cfg
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_model_configs_applies_overrides() {
        let mut weights = HashMap::new();
        weights.insert("gpt-4.1".to_string(), 0.0);
        let configs = weighted_model_configs(&weights);
        let gpt = configs.iter().find(|c| c.id == "gpt-4.1").unwrap();
        assert_eq!(gpt.weight, 0.0);
        let claude = configs.iter().find(|c| c.id == "claude-sonnet-4-6").unwrap();
        assert_eq!(claude.weight, 1.0);
    }
}
