//! Fractional Kelly position sizing.
//!
//! Full Kelly for a binary bet on a side priced at `price` with edge
//! `ensemble_prob - price` reduces to `f* = edge / (1 - price)`. We scale
//! that by a fractional multiplier (default 0.25) and cap it at
//! `max_position_pct` of bankroll.

use crate::exchange::Side;

/// Fraction of bankroll to allocate, already fractional-Kelly-scaled and
/// capped. `edge` is the magnitude returned by `edge::best_side_and_edge`.
pub fn kelly_fraction(edge: f64, market_price: f64, side: Side, fractional: f64, max_pct: f64) -> f64 {
    let price = match side {
        Side::Yes => market_price,
        Side::No => 1.0 - market_price,
    };

    if price <= 0.0 || price >= 1.0 {
        return 0.0;
    }

    let full_kelly = edge / (1.0 - price);
    let fk = (full_kelly * fractional).min(max_pct);
    fk.max(0.0)
}

/// Converts a bankroll fraction into a contract count at `price`, floored
/// at one unit since prediction market contracts trade in integer-ish lots.
pub fn size_from_fraction(fraction: f64, bankroll: f64, price: f64) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    let usd_to_spend = bankroll * fraction;
    let contracts = usd_to_spend / price;
    (contracts * 100.0).round() / 100.0
}

/// `size_from_fraction` clamped to at least one unit, matching the contract
/// lot-size floor applied at order time.
pub fn size_from_fraction_floored(fraction: f64, bankroll: f64, price: f64) -> f64 {
    size_from_fraction(fraction, bankroll, price).max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_edge_yields_no_bet() {
        assert_eq!(kelly_fraction(0.0, 0.5, Side::Yes, 0.25, 0.05), 0.0);
    }

    #[test]
    fn strong_edge_is_capped_at_max_pct() {
        let f = kelly_fraction(0.4, 0.3, Side::Yes, 0.25, 0.05);
        assert_eq!(f, 0.05);
    }

    #[test]
    fn moderate_edge_is_fractional_kelly() {
        // full kelly = 0.1 / (1 - 0.5) = 0.2; fractional 0.25 -> 0.05, capped at 0.05
        let f = kelly_fraction(0.1, 0.5, Side::Yes, 0.25, 0.05);
        assert!((f - 0.05).abs() < 1e-9);
    }

    #[test]
    fn degenerate_price_yields_zero() {
        assert_eq!(kelly_fraction(0.1, 0.0, Side::Yes, 0.25, 0.05), 0.0);
        assert_eq!(kelly_fraction(0.1, 1.0, Side::Yes, 0.25, 0.05), 0.0);
    }

    #[test]
    fn no_side_uses_complement_price() {
        // side NO at market_price 0.3 -> effective price 0.7
        let f = kelly_fraction(0.1, 0.3, Side::No, 0.25, 1.0);
        assert!((f - (0.1 / 0.3) * 0.25).abs() < 1e-9);
    }

    #[test]
    fn size_floors_to_one_unit() {
        let size = size_from_fraction_floored(0.001, 100.0, 0.5);
        assert_eq!(size, 1.0);
    }

    #[test]
    fn size_scales_with_bankroll() {
        let size = size_from_fraction(0.05, 10_000.0, 0.5);
        assert!((size - 1000.0).abs() < 1e-6);
    }
}
