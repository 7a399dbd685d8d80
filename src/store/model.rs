//! Entity types for every row the store persists. Mirrors the tables in
//! `migrations/001_init.sql`. Nullable columns are `Option<T>`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRow {
    pub id: String,
    pub exchange: String,
    pub question: String,
    pub domain: Option<String>,
    pub url: Option<String>,
    pub market_price: Option<f64>,
    pub volume_usd: f64,
    pub close_time: Option<String>,
    pub resolved: bool,
    pub outcome: Option<i64>,
    pub dedup_group: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRow {
    pub id: i64,
    pub market_id: String,
    pub model: String,
    pub prompt_version: String,
    pub raw_probability: f64,
    pub entropy: f64,
    pub ensemble_probability: f64,
    pub confidence_tier: String,
    pub reasoning_excerpt: Option<String>,
    pub news_used: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewForecast {
    pub market_id: String,
    pub model: String,
    pub prompt_version: String,
    pub raw_probability: f64,
    pub entropy: f64,
    pub ensemble_probability: f64,
    pub confidence_tier: String,
    pub reasoning_excerpt: Option<String>,
    pub news_used: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrade {
    pub market_id: String,
    pub forecast_id: Option<i64>,
    pub exchange: String,
    pub side: String,
    pub size_units: f64,
    pub price: f64,
    pub kelly_fraction: f64,
    pub edge: f64,
    pub is_paper: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOutcome {
    pub market_id: String,
    pub forecast_id: i64,
    pub domain: String,
    pub model: String,
    pub prompt_version: String,
    pub predicted_prob: f64,
    pub actual_outcome: i64,
    pub brier: f64,
    pub resolved_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRow {
    pub id: i64,
    pub market_id: String,
    pub forecast_id: i64,
    pub domain: String,
    pub model: String,
    pub prompt_version: String,
    pub predicted_prob: f64,
    pub actual_outcome: i64,
    pub brier: f64,
    pub resolved_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationStateRow {
    pub domain: String,
    pub model: String,
    pub brier_score: f64,
    pub n_resolved: i64,
    pub domain_weight: f64,
    pub entropy_threshold: Option<f64>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelWeightRow {
    pub model: String,
    pub weight: f64,
    pub rolling_brier: Option<f64>,
    pub n_resolved: i64,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptExperimentRow {
    pub prompt_version: String,
    pub domain: Option<String>,
    pub prompt_template: String,
    pub n_trials: i64,
    pub n_wins: i64,
    pub mean_brier: Option<f64>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    pub cash: f64,
    pub total_value: f64,
    pub updated_at: String,
}
