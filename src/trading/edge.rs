//! Edge calculation and the pre-trade tradeable filter. Edge is the
//! ensemble probability minus the market's YES price; a positive edge says
//! YES is underpriced, a negative one says the opposite and we'd trade NO.

use crate::exchange::Side;

/// Edge for a YES position: positive means YES is underpriced.
pub fn compute_edge(ensemble_prob: f64, market_price: f64) -> f64 {
    ensemble_prob - market_price
}

/// Picks whichever side currently has positive edge and returns its
/// magnitude. Both sides have the same magnitude edge; this just resolves
/// the sign into a direction.
pub fn best_side_and_edge(ensemble_prob: f64, market_price: f64) -> (Side, f64) {
    let yes_edge = compute_edge(ensemble_prob, market_price);
    if yes_edge >= 0.0 {
        (Side::Yes, yes_edge)
    } else {
        (Side::No, -yes_edge)
    }
}

/// Outcome of the pre-trade filter: kept as an enum-with-reason, mirroring
/// the adapter's risk-check pattern, so callers never have to parse a
/// reason string to branch on it.
pub enum TradeDecision {
    Tradeable,
    Blocked(String),
}

impl TradeDecision {
    pub fn is_tradeable(&self) -> bool {
        matches!(self, TradeDecision::Tradeable)
    }
}

/// The four gating conditions a market must clear before a trade is sized:
/// position-count headroom, minimum edge, high-confidence ensemble, and a
/// domain the calibrator still trusts.
#[allow(clippy::too_many_arguments)]
pub fn is_tradeable(
    edge: f64,
    confidence_tier: &str,
    domain_weight: f64,
    min_edge: f64,
    max_open_positions: i64,
    current_open: i64,
) -> TradeDecision {
    if current_open >= max_open_positions {
        return TradeDecision::Blocked(format!("max open positions ({max_open_positions}) reached"));
    }
    if edge < min_edge {
        return TradeDecision::Blocked(format!("edge {edge:.3} < min {min_edge}"));
    }
    if confidence_tier != "high" {
        return TradeDecision::Blocked(format!("confidence tier is '{confidence_tier}' (need 'high')"));
    }
    if domain_weight < 0.5 {
        return TradeDecision::Blocked(format!("domain weight {domain_weight:.2} < 0.5"));
    }
    TradeDecision::Tradeable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_side_picks_yes_when_underpriced() {
        let (side, edge) = best_side_and_edge(0.7, 0.5);
        assert_eq!(side, Side::Yes);
        assert!((edge - 0.2).abs() < 1e-9);
    }

    #[test]
    fn best_side_picks_no_when_overpriced() {
        let (side, edge) = best_side_and_edge(0.3, 0.5);
        assert_eq!(side, Side::No);
        assert!((edge - 0.2).abs() < 1e-9);
    }

    #[test]
    fn blocks_on_low_confidence() {
        let decision = is_tradeable(0.1, "medium", 1.0, 0.05, 20, 0);
        assert!(!decision.is_tradeable());
    }

    #[test]
    fn blocks_on_weak_domain_weight() {
        let decision = is_tradeable(0.1, "high", 0.3, 0.05, 20, 0);
        assert!(!decision.is_tradeable());
    }

    #[test]
    fn blocks_on_position_cap() {
        let decision = is_tradeable(0.1, "high", 1.0, 0.05, 20, 20);
        assert!(!decision.is_tradeable());
    }

    #[test]
    fn allows_a_qualifying_trade() {
        let decision = is_tradeable(0.1, "high", 1.0, 0.05, 20, 0);
        assert!(decision.is_tradeable());
    }
}
