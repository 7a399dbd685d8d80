//! Order executor: applies the tradeable filter, sizes with Kelly, and
//! either paper-logs the trade or submits it to the live exchange adapter.

use super::{edge, kelly, portfolio};
use crate::config::AgentConfig;
use crate::exchange::{ExchangeClient, Market, Side};
use crate::store::model::NewTrade;
use crate::store::{self, DbPool};

pub struct TradeIntent<'a> {
    pub market: &'a Market,
    pub forecast_id: i64,
    pub ensemble_prob: f64,
    pub confidence_tier: &'a str,
    pub domain_weight: f64,
}

/// Evaluates `intent` against the tradeable filter, sizes it with
/// fractional Kelly, and executes it (paper or live per `config.paper_mode`).
/// Returns the trade's store id if one was placed.
pub async fn maybe_trade(
    db: &DbPool,
    config: &AgentConfig,
    exchanges: &[&dyn ExchangeClient],
    intent: TradeIntent<'_>,
) -> crate::errors::AgentResult<Option<i64>> {
    let market = intent.market;

    let open_count = store::count_open_positions(db)?;
    let (side, edge_val) = edge::best_side_and_edge(intent.ensemble_prob, market.market_price);
    let decision = edge::is_tradeable(
        edge_val,
        intent.confidence_tier,
        intent.domain_weight,
        config.min_edge,
        config.max_open_positions,
        open_count,
    );

    let edge::TradeDecision::Tradeable = decision else {
        if let edge::TradeDecision::Blocked(reason) = decision {
            tracing::debug!(market_id = %market.id, reason, "no trade");
        }
        return Ok(None);
    };

    if store::has_position(db, &market.id)? {
        tracing::debug!(market_id = %market.id, "already have a position");
        return Ok(None);
    }

    let cash = portfolio::get_cash(db)?;
    let fill_price = match side {
        Side::Yes => market.market_price,
        Side::No => 1.0 - market.market_price,
    };
    let fraction = kelly::kelly_fraction(edge_val, market.market_price, side, config.kelly_fraction, config.max_position_pct);
    let size = kelly::size_from_fraction_floored(fraction, cash, fill_price);
    let cost = size * fill_price;

    if cost > cash {
        tracing::warn!(market_id = %market.id, cost, cash, "insufficient cash for sized trade");
        return Ok(None);
    }

    if config.paper_mode {
        let trade_id = store::insert_trade(
            db,
            &NewTrade {
                market_id: market.id.clone(),
                forecast_id: Some(intent.forecast_id),
                exchange: market.exchange.to_string(),
                side: side.as_str().to_string(),
                size_units: size,
                price: fill_price,
                kelly_fraction: fraction,
                edge: edge_val,
                is_paper: true,
            },
        )?;
        portfolio::deduct_cash(db, cost)?;
        tracing::info!(
            exchange = market.exchange, side = side.as_str(), question = %market.question,
            fill_price, edge = edge_val, size, cost, "paper trade placed"
        );
        return Ok(Some(trade_id));
    }

    let Some(client) = exchanges.iter().find(|c| c.name() == market.exchange) else {
        tracing::error!(exchange = market.exchange, "no live adapter configured for this exchange");
        return Ok(None);
    };

    let order = match client.place_order(&market.id, side, size, fill_price).await {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(market_id = %market.id, error = %e, "live order failed");
            return Ok(None);
        }
    };

    let trade_id = store::insert_trade(
        db,
        &NewTrade {
            market_id: market.id.clone(),
            forecast_id: Some(intent.forecast_id),
            exchange: market.exchange.to_string(),
            side: side.as_str().to_string(),
            size_units: size,
            price: fill_price,
            kelly_fraction: fraction,
            edge: edge_val,
            is_paper: false,
        },
    )?;
    portfolio::deduct_cash(db, cost)?;
    tracing::info!(
        exchange = market.exchange, side = side.as_str(), order_id = %order.order_id,
        "live trade placed"
    );
    Ok(Some(trade_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_market() -> Market {
        Market {
            id: "m1".into(),
            exchange: "kalshi",
            question: "Will it happen?".into(),
            market_price: 0.4,
            volume_usd: 50_000.0,
            close_time: None,
            url: String::new(),
        }
    }

    #[tokio::test]
    async fn insufficient_confidence_skips_trade() {
        let db = store::init_db(":memory:", 1000.0).unwrap();
        store::upsert_market(
            &db,
            &store::model::MarketRow {
                id: "m1".into(),
                exchange: "kalshi".into(),
                question: "Will it happen?".into(),
                domain: Some("politics".into()),
                url: None,
                market_price: Some(0.4),
                volume_usd: 50_000.0,
                close_time: None,
                resolved: false,
                outcome: None,
                dedup_group: None,
                updated_at: String::new(),
            },
        )
        .unwrap();
        let config = test_config();
        let market = test_market();
        let intent = TradeIntent {
            market: &market,
            forecast_id: 1,
            ensemble_prob: 0.45,
            confidence_tier: "medium",
            domain_weight: 1.0,
        };
        let result = maybe_trade(&db, &config, &[], intent).await.unwrap();
        assert!(result.is_none());
    }

    fn test_config() -> AgentConfig {
        AgentConfig {
            paper_mode: true,
            virtual_bankroll: 1000.0,
            min_edge: 0.05,
            kelly_fraction: 0.25,
            max_position_pct: 0.05,
            max_open_positions: 20,
            min_volume_usd: 10_000.0,
            min_hours_to_close: 48,
            learning_batch_size: 10,
            entropy_threshold_default: 4.0,
            prompt_tournament_min_trials: 20,
            model_kill_brier: 0.28,
            scan_interval_hours: 4,
            price_update_interval_minutes: 30,
            resolution_check_interval_hours: 1,
            forecast_interval_hours: 4,
            self_improvement_hour: 6,
            max_retries: 3,
            kalshi_rate_limit_rps: 10.0,
            poly_rate_limit_rps: 5.0,
            llm_concurrency: 3,
            news_search_provider: "tavily".into(),
            max_news_articles: 5,
            tavily_api_key: String::new(),
            brave_api_key: String::new(),
            classifier_model: "claude-haiku-4-5-20251001".into(),
            prompt_evolver_model: "gpt-4.1".into(),
            anthropic_api_key: String::new(),
            openai_api_key: String::new(),
            deepseek_api_key: String::new(),
            kalshi_api_key: String::new(),
            kalshi_private_key_path: String::new(),
            kalshi_host: "https://trading-api.kalshi.com/trade-api/v2".into(),
            poly_private_key: String::new(),
            poly_api_key: String::new(),
            poly_api_secret: String::new(),
            poly_api_passphrase: String::new(),
            poly_host: "https://clob.polymarket.com".into(),
            db_path: "data/agent.db".into(),
        }
    }

    #[tokio::test]
    async fn qualifying_trade_is_paper_logged() {
        let db = store::init_db(":memory:", 1000.0).unwrap();
        store::upsert_market(
            &db,
            &store::model::MarketRow {
                id: "m1".into(),
                exchange: "kalshi".into(),
                question: "Will it happen?".into(),
                domain: Some("politics".into()),
                url: None,
                market_price: Some(0.4),
                volume_usd: 50_000.0,
                close_time: None,
                resolved: false,
                outcome: None,
                dedup_group: None,
                updated_at: String::new(),
            },
        )
        .unwrap();
        let config = test_config();
        let market = test_market();
        let intent = TradeIntent {
            market: &market,
            forecast_id: 1,
            ensemble_prob: 0.7,
            confidence_tier: "high",
            domain_weight: 1.0,
        };
        let result = maybe_trade(&db, &config, &[], intent).await.unwrap();
        assert!(result.is_some());
        assert!(store::has_position(&db, "m1").unwrap());
    }
}
