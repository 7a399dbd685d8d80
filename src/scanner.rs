//! Cross-exchange market scanner: discovers markets on every adapter,
//! fuzzy-matches cross-listed questions into dedup groups, and persists
//! everything to the store. Also refreshes prices for already-known markets.

use crate::exchange::{ExchangeClient, Market};
use crate::store::model::MarketRow;
use crate::store::{self, DbPool};
use std::collections::HashMap;

/// Normalized-Levenshtein similarity (0-1) above which two questions on
/// different exchanges are treated as the same underlying market.
const DEDUP_THRESHOLD: f64 = 0.85;

/// Scans every adapter concurrently, dedups cross-listed markets by fuzzy
/// question similarity, and upserts the combined set. A single adapter
/// failing to list markets is logged and excluded rather than aborting the
/// whole scan.
pub async fn scan_all_markets(db: &DbPool, exchanges: &[&dyn ExchangeClient]) -> crate::errors::AgentResult<Vec<Market>> {
    let lists = futures_util::future::join_all(exchanges.iter().map(|e| async move {
        match e.list_markets().await {
            Ok(m) => m,
            Err(err) => {
                tracing::error!(exchange = e.name(), error = %err, "market scan failed");
                Vec::new()
            }
        }
    }))
    .await;

    let all_markets: Vec<Market> = lists.into_iter().flatten().collect();
    tracing::info!(n = all_markets.len(), "scanner: total raw markets found");

    let dedup_groups = find_dedup_groups(&all_markets);

    for market in &all_markets {
        let row = MarketRow {
            id: market.id.clone(),
            exchange: market.exchange.to_string(),
            question: market.question.clone(),
            domain: None,
            url: Some(market.url.clone()),
            market_price: Some(market.market_price),
            volume_usd: market.volume_usd,
            close_time: market.close_time.map(|t| t.to_rfc3339()),
            resolved: false,
            outcome: None,
            dedup_group: dedup_groups.get(&market.id).cloned(),
            updated_at: String::new(),
        };
        store::upsert_market(db, &row)?;
    }

    tracing::info!(n = all_markets.len(), "scanner: upserted markets to store");
    Ok(all_markets)
}

/// Matches markets from different exchanges by fuzzy question similarity.
/// Returns `{market_id: matching_market_id_on_other_exchange}` for every
/// pair that cleared `DEDUP_THRESHOLD`; entries are written both ways so
/// either market's row can look up its counterpart.
fn find_dedup_groups(markets: &[Market]) -> HashMap<String, String> {
    let mut groups = HashMap::new();

    for (i, a) in markets.iter().enumerate() {
        let mut best_score = 0.0;
        let mut best_match: Option<&str> = None;

        for b in markets.iter().skip(i + 1) {
            if a.exchange == b.exchange {
                continue;
            }
            let score = strsim::normalized_levenshtein(&normalize_question(&a.question), &normalize_question(&b.question));
            if score > best_score {
                best_score = score;
                best_match = Some(&b.id);
            }
        }

        if best_score >= DEDUP_THRESHOLD {
            if let Some(match_id) = best_match {
                groups.insert(a.id.clone(), match_id.to_string());
                groups.insert(match_id.to_string(), a.id.clone());
                tracing::debug!(score = best_score, a = %a.question, b = match_id, "dedup match");
            }
        }
    }

    groups
}

/// Lowercases, strips punctuation, then sorts tokens -- the same two-stage
/// shape as `token_sort_ratio`, so word-reordered questions across venues
/// ("Will Biden beat Trump" vs "Will Trump lose to Biden") still score high
/// under the similarity metric.
fn normalize_question(q: &str) -> String {
    let stripped: String = q.to_lowercase().chars().filter(|c| c.is_alphanumeric() || c.is_whitespace()).collect();
    let mut tokens: Vec<&str> = stripped.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Refreshes `market_price` for every active market, grouped by adapter so
/// each market is only queried against the exchange it actually lives on.
pub async fn refresh_prices(db: &DbPool, exchanges: &[&dyn ExchangeClient]) -> crate::errors::AgentResult<()> {
    let active = store::get_active_markets(db)?;
    if active.is_empty() {
        return Ok(());
    }

    let futures = active.iter().map(|m| async move {
        let Some(client) = exchanges.iter().find(|c| c.name() == m.exchange) else {
            return;
        };
        match client.market_price(&m.id).await {
            Ok(price) => {
                if let Err(e) = store::update_market_price(db, &m.id, price) {
                    tracing::debug!(market_id = %m.id, error = %e, "failed to persist refreshed price");
                }
            }
            Err(e) => tracing::debug!(market_id = %m.id, error = %e, "price refresh failed"),
        }
    });
    futures_util::future::join_all(futures).await;

    tracing::info!(n = active.len(), "scanner: refreshed prices");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn market(id: &str, exchange: &'static str, question: &str) -> Market {
        Market {
            id: id.to_string(),
            exchange,
            question: question.to_string(),
            market_price: 0.5,
            volume_usd: 1000.0,
            close_time: Some(Utc::now()),
            url: String::new(),
        }
    }

    #[test]
    fn dedups_similar_questions_across_exchanges() {
        let markets = vec![
            market("k1", "kalshi", "Will the Fed cut rates in March?"),
            market("p1", "polymarket", "Will the Fed cut rates in March"),
        ];
        let groups = find_dedup_groups(&markets);
        assert_eq!(groups.get("k1"), Some(&"p1".to_string()));
        assert_eq!(groups.get("p1"), Some(&"k1".to_string()));
    }

    #[test]
    fn does_not_dedup_same_exchange_or_dissimilar_questions() {
        let markets = vec![
            market("k1", "kalshi", "Will the Fed cut rates in March?"),
            market("k2", "kalshi", "Will the Fed cut rates in March?"),
            market("p1", "polymarket", "Will it rain in Tokyo tomorrow?"),
        ];
        let groups = find_dedup_groups(&markets);
        assert!(groups.is_empty());
    }

    #[test]
    fn normalize_question_strips_punctuation_and_case() {
        assert_eq!(normalize_question("Will the Fed cut rates?"), "cut fed rates the will");
    }

    #[test]
    fn normalize_question_sorts_tokens_so_word_order_does_not_matter() {
        assert_eq!(normalize_question("Will Biden beat Trump in 2024"), normalize_question("In 2024 will Trump beat Biden"));
    }

    #[tokio::test]
    async fn scan_with_no_exchanges_returns_empty() {
        let db = store::init_db(":memory:", 1000.0).unwrap();
        let result = scan_all_markets(&db, &[]).await.unwrap();
        assert!(result.is_empty());
    }
}
