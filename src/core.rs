//! Process-wide shared state. Everything that would otherwise be a global
//! lives on one `Core` value built once at startup and passed by reference
//! to every job: the store handle, configuration, the shared HTTP client,
//! the LLM concurrency gate, and the two exchange adapters.

use crate::config::AgentConfig;
use crate::exchange::kalshi::KalshiExchange;
use crate::exchange::polymarket::PolymarketExchange;
use crate::exchange::ExchangeClient;
use crate::store::DbPool;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

pub struct Core {
    pub db: DbPool,
    pub config: AgentConfig,
    pub client: reqwest::Client,
    pub llm_semaphore: Arc<Semaphore>,
    pub kalshi: KalshiExchange,
    pub polymarket: PolymarketExchange,
    /// Outcomes recorded since the last incremental calibration run; reset
    /// to zero once it crosses `config.learning_batch_size`.
    outcome_counter: AtomicI64,
}

impl Core {
    pub fn new(config: AgentConfig) -> crate::errors::AgentResult<Self> {
        let db = crate::store::init_db(&config.db_path, config.virtual_bankroll)?;
        let client = reqwest::Client::builder().timeout(std::time::Duration::from_secs(30)).build()?;
        let llm_semaphore = Arc::new(Semaphore::new(config.llm_concurrency));

        let kalshi = KalshiExchange::new(
            &config.kalshi_host,
            &config.kalshi_api_key,
            &config.kalshi_private_key_path,
            config.min_volume_usd,
            config.min_hours_to_close,
            config.kalshi_rate_limit_rps,
            config.max_retries,
        )?;
        let polymarket = PolymarketExchange::new(
            &config.poly_host,
            &config.poly_api_key,
            &config.poly_api_secret,
            &config.poly_api_passphrase,
            config.min_volume_usd,
            config.min_hours_to_close,
            config.poly_rate_limit_rps,
            config.max_retries,
        )?;

        Ok(Self { db, config, client, llm_semaphore, kalshi, polymarket, outcome_counter: AtomicI64::new(0) })
    }

    pub fn exchanges(&self) -> [&dyn ExchangeClient; 2] {
        [&self.kalshi, &self.polymarket]
    }

    /// Adds `n` newly recorded outcomes to the running total and returns
    /// whether the incremental-learning batch size has now been reached.
    /// Reaching it resets the counter back to zero.
    pub fn record_outcomes_and_check_batch(&self, n: i64) -> bool {
        if n == 0 {
            return false;
        }
        let total = self.outcome_counter.fetch_add(n, Ordering::SeqCst) + n;
        if total >= self.config.learning_batch_size {
            self.outcome_counter.store(0, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_core() -> Core {
        let mut config = test_config();
        config.db_path = ":memory:".to_string();
        Core::new(config).unwrap()
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

    #[test]
    fn batch_resets_once_threshold_crossed() {
        let core = test_core();
        assert!(!core.record_outcomes_and_check_batch(4));
        assert!(!core.record_outcomes_and_check_batch(5));
        assert!(core.record_outcomes_and_check_batch(2));
        // counter reset, so a small follow-up shouldn't trigger again
        assert!(!core.record_outcomes_and_check_batch(1));
    }

    #[test]
    fn zero_outcomes_never_triggers() {
        let core = test_core();
        assert!(!core.record_outcomes_and_check_batch(0));
    }
}
