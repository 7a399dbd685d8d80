//! Outcome tracker: polls both exchanges for markets that resolved since the
//! last check, records a Brier score per forecast made against that market,
//! and marks the market resolved in the store.

use crate::exchange::ExchangeClient;
use crate::store::model::NewOutcome;
use crate::store::{self, DbPool};

/// How far back to look for resolutions each run; wider than the check
/// interval so a missed poll doesn't silently drop an outcome.
const LOOKBACK_HOURS: i64 = 26;

/// Checks every configured exchange adapter for newly resolved markets,
/// records an outcome row per existing forecast, and returns the count of
/// outcomes recorded. An adapter failing to list resolutions is logged and
/// skipped rather than aborting the whole poll.
pub async fn check_new_outcomes(db: &DbPool, exchanges: &[&dyn ExchangeClient]) -> crate::errors::AgentResult<usize> {
    let since = chrono::Utc::now() - chrono::Duration::hours(LOOKBACK_HOURS);
    let mut new_outcomes = 0usize;

    for exchange in exchanges {
        let resolved = match exchange.list_resolved(since).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(exchange = exchange.name(), error = %e, "resolution check failed");
                continue;
            }
        };

        for market in resolved {
            store::mark_market_resolved(db, &market.id, market.outcome)?;

            let forecasts = store::get_forecasts_for_market(db, &market.id)?;
            let market_row = store::get_market(db, &market.id)?;
            let domain = market_row.and_then(|m| m.domain).unwrap_or_else(|| "unknown".to_string());

            for f in forecasts {
                let predicted = f.raw_probability;
                let brier = (predicted - market.outcome as f64).powi(2);
                store::insert_outcome(
                    db,
                    &NewOutcome {
                        market_id: market.id.clone(),
                        forecast_id: f.id,
                        domain: domain.clone(),
                        model: f.model,
                        prompt_version: f.prompt_version,
                        predicted_prob: predicted,
                        actual_outcome: market.outcome,
                        brier,
                        resolved_at: chrono::Utc::now().to_rfc3339(),
                    },
                )?;
                new_outcomes += 1;
            }
        }
    }

    if new_outcomes > 0 {
        tracing::info!(n = new_outcomes, "tracker: recorded new outcomes");
    }
    Ok(new_outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brier_is_squared_error_against_binary_outcome() {
        let brier = (0.8f64 - 1.0).powi(2);
        assert!((brier - 0.04).abs() < 1e-9);
        let brier_wrong = (0.8f64 - 0.0).powi(2);
        assert!((brier_wrong - 0.64).abs() < 1e-9);
    }
}
