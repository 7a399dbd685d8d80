use crate::errors::{AgentError, AgentResult};

/// All tuneable parameters, loaded from the environment with the defaults
/// the original bot shipped. Every field is optional at the process level:
/// an agent with zero credentials configured still starts and runs, with
/// components degrading to no-op per the error handling design.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    // Paper trading
    pub paper_mode: bool,
    pub virtual_bankroll: f64,

    // Trading parameters
    pub min_edge: f64,
    pub kelly_fraction: f64,
    pub max_position_pct: f64,
    pub max_open_positions: i64,

    // Market filters
    pub min_volume_usd: f64,
    pub min_hours_to_close: i64,

    // Self-improvement
    pub learning_batch_size: i64,
    pub entropy_threshold_default: f64,
    pub prompt_tournament_min_trials: i64,
    pub model_kill_brier: f64,

    // Scheduler intervals
    pub scan_interval_hours: i64,
    pub price_update_interval_minutes: i64,
    pub resolution_check_interval_hours: i64,
    pub forecast_interval_hours: i64,
    pub self_improvement_hour: u32,

    // Retry / rate limiting
    pub max_retries: u32,
    pub kalshi_rate_limit_rps: f64,
    pub poly_rate_limit_rps: f64,
    pub llm_concurrency: usize,

    // News
    pub news_search_provider: String,
    pub max_news_articles: usize,
    pub tavily_api_key: String,
    pub brave_api_key: String,

    // LLM providers
    pub classifier_model: String,
    pub prompt_evolver_model: String,
    pub anthropic_api_key: String,
    pub openai_api_key: String,
    pub deepseek_api_key: String,

    // Kalshi
    pub kalshi_api_key: String,
    pub kalshi_private_key_path: String,
    pub kalshi_host: String,

    // Polymarket
    pub poly_private_key: String,
    pub poly_api_key: String,
    pub poly_api_secret: String,
    pub poly_api_passphrase: String,
    pub poly_host: String,

    // Store
    pub db_path: String,
}

impl AgentConfig {
    pub fn from_env() -> AgentResult<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            paper_mode: env_var_or("PAPER_MODE", "true") != "false",
            virtual_bankroll: parse_env("VIRTUAL_BANKROLL", "10000.0")?,

            min_edge: parse_env("MIN_EDGE", "0.05")?,
            kelly_fraction: parse_env("KELLY_FRACTION", "0.25")?,
            max_position_pct: parse_env("MAX_POSITION_PCT", "0.05")?,
            max_open_positions: parse_env("MAX_OPEN_POSITIONS", "20")?,

            min_volume_usd: parse_env("MIN_VOLUME_USD", "10000.0")?,
            min_hours_to_close: parse_env("MIN_HOURS_TO_CLOSE", "48")?,

            learning_batch_size: parse_env("LEARNING_BATCH_SIZE", "10")?,
            entropy_threshold_default: parse_env("ENTROPY_THRESHOLD_DEFAULT", "4.0")?,
            prompt_tournament_min_trials: parse_env("PROMPT_TOURNAMENT_MIN_TRIALS", "20")?,
            model_kill_brier: parse_env("MODEL_KILL_BRIER", "0.28")?,

            scan_interval_hours: parse_env("SCAN_INTERVAL_HOURS", "4")?,
            price_update_interval_minutes: parse_env("PRICE_UPDATE_INTERVAL_MINUTES", "30")?,
            resolution_check_interval_hours: parse_env("RESOLUTION_CHECK_INTERVAL_HOURS", "1")?,
            forecast_interval_hours: parse_env("FORECAST_INTERVAL_HOURS", "4")?,
            self_improvement_hour: parse_env("SELF_IMPROVEMENT_HOUR", "6")?,

            max_retries: parse_env("MAX_RETRIES", "3")?,
            kalshi_rate_limit_rps: parse_env("KALSHI_RATE_LIMIT_RPS", "10.0")?,
            poly_rate_limit_rps: parse_env("POLY_RATE_LIMIT_RPS", "5.0")?,
            llm_concurrency: parse_env("LLM_CONCURRENCY", "3")?,

            news_search_provider: env_var_or("NEWS_SEARCH_PROVIDER", "tavily"),
            max_news_articles: parse_env("MAX_NEWS_ARTICLES", "5")?,
            tavily_api_key: env_var_or("TAVILY_API_KEY", ""),
            brave_api_key: env_var_or("BRAVE_API_KEY", ""),

            classifier_model: env_var_or("CLASSIFIER_MODEL", "claude-haiku-4-5-20251001"),
            prompt_evolver_model: env_var_or("PROMPT_EVOLVER_MODEL", "gpt-4.1"),
            anthropic_api_key: env_var_or("ANTHROPIC_API_KEY", ""),
            openai_api_key: env_var_or("OPENAI_API_KEY", ""),
            deepseek_api_key: env_var_or("DEEPSEEK_API_KEY", ""),

            kalshi_api_key: env_var_or("KALSHI_API_KEY", ""),
            kalshi_private_key_path: env_var_or("KALSHI_PRIVATE_KEY_PATH", ""),
            kalshi_host: env_var_or(
                "KALSHI_HOST",
                "https://trading-api.kalshi.com/trade-api/v2",
            ),

            poly_private_key: env_var_or("POLY_PRIVATE_KEY", ""),
            poly_api_key: env_var_or("POLY_API_KEY", ""),
            poly_api_secret: env_var_or("POLY_API_SECRET", ""),
            poly_api_passphrase: env_var_or("POLY_API_PASSPHRASE", ""),
            poly_host: env_var_or("POLY_HOST", "https://clob.polymarket.com"),

            db_path: env_var_or("DB_PATH", "data/agent.db"),
        })
    }
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> AgentResult<T>
where
    T::Err: std::fmt::Display,
{
    env_var_or(key, default)
        .parse::<T>()
        .map_err(|e| AgentError::Config(format!("{key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_without_env() {
        // Clearing env isn't safe in a parallel test run; just verify the
        // default literals themselves are well-formed for their types.
        let cfg = AgentConfig {
            paper_mode: true,
            virtual_bankroll: "10000.0".parse().unwrap(),
            min_edge: "0.05".parse().unwrap(),
            kelly_fraction: "0.25".parse().unwrap(),
            max_position_pct: "0.05".parse().unwrap(),
            max_open_positions: "20".parse().unwrap(),
            min_volume_usd: "10000.0".parse().unwrap(),
            min_hours_to_close: "48".parse().unwrap(),
            learning_batch_size: "10".parse().unwrap(),
            entropy_threshold_default: "4.0".parse().unwrap(),
            prompt_tournament_min_trials: "20".parse().unwrap(),
            model_kill_brier: "0.28".parse().unwrap(),
            scan_interval_hours: "4".parse().unwrap(),
            price_update_interval_minutes: "30".parse().unwrap(),
            resolution_check_interval_hours: "1".parse().unwrap(),
            forecast_interval_hours: "4".parse().unwrap(),
            self_improvement_hour: "6".parse().unwrap(),
            max_retries: "3".parse().unwrap(),
            kalshi_rate_limit_rps: "10.0".parse().unwrap(),
            poly_rate_limit_rps: "5.0".parse().unwrap(),
            llm_concurrency: "3".parse().unwrap(),
            news_search_provider: "tavily".into(),
            max_news_articles: "5".parse().unwrap(),
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
        };
        assert_eq!(cfg.max_open_positions, 20);
        assert!(cfg.paper_mode);
    }
}
