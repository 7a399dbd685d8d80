//! SQLite-backed store. Every entity in the data model lives here; it is
//! the only mutable global state in the system. Operations take a short-lived
//! lock on the shared connection and commit immediately, the same
//! connection-per-operation discipline the teacher's query helpers use for
//! their cold-path reads -- there is no dedicated writer task here because,
//! unlike a tick-by-tick price feed, every write in this agent is already
//! sequenced by job/pipeline ordering except for concurrent LLM cost logging,
//! which the mutex serializes directly.

pub mod model;

use crate::errors::{AgentError, AgentResult};
use model::*;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub type DbPool = Arc<Mutex<Connection>>;

pub fn init_db(db_path: &str, virtual_bankroll: f64) -> AgentResult<DbPool> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
    )?;

    let schema = include_str!("../../migrations/001_init.sql");
    conn.execute_batch(schema)?;

    conn.execute(
        "INSERT OR IGNORE INTO portfolio_state (id, cash, total_value) VALUES (1, ?1, ?2)",
        params![virtual_bankroll, virtual_bankroll],
    )?;

    tracing::info!(path = db_path, "store initialized");
    Ok(Arc::new(Mutex::new(conn)))
}

fn lock(db: &DbPool) -> AgentResult<std::sync::MutexGuard<'_, Connection>> {
    db.lock()
        .map_err(|e| AgentError::Database(format!("lock poisoned: {e}")))
}

// ---------------------------------------------------------------------
// Markets
// ---------------------------------------------------------------------

pub fn upsert_market(db: &DbPool, m: &MarketRow) -> AgentResult<()> {
    let conn = lock(db)?;
    conn.execute(
        "INSERT INTO markets
            (id, exchange, question, domain, url, market_price, volume_usd,
             close_time, resolved, outcome, dedup_group, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, CURRENT_TIMESTAMP)
         ON CONFLICT(id) DO UPDATE SET
            market_price = excluded.market_price,
            volume_usd   = excluded.volume_usd,
            resolved     = excluded.resolved,
            outcome      = excluded.outcome,
            domain       = COALESCE(excluded.domain, domain),
            dedup_group  = COALESCE(excluded.dedup_group, dedup_group),
            updated_at   = CURRENT_TIMESTAMP",
        params![
            m.id,
            m.exchange,
            m.question,
            m.domain,
            m.url,
            m.market_price,
            m.volume_usd,
            m.close_time,
            m.resolved as i64,
            m.outcome,
            m.dedup_group,
        ],
    )?;
    Ok(())
}

pub fn get_active_markets(db: &DbPool) -> AgentResult<Vec<MarketRow>> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare("SELECT * FROM markets WHERE resolved = 0")?;
    query_markets(&mut stmt, [])
}

pub fn get_market(db: &DbPool, market_id: &str) -> AgentResult<Option<MarketRow>> {
    let conn = lock(db)?;
    conn.query_row("SELECT * FROM markets WHERE id = ?1", params![market_id], row_to_market)
        .optional()
        .map_err(Into::into)
}

/// Markets with no forecast created in the last `max_age_hours` hours.
pub fn get_unforecasted_markets(db: &DbPool, max_age_hours: i64) -> AgentResult<Vec<MarketRow>> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare(
        "SELECT m.* FROM markets m
         WHERE m.resolved = 0
           AND NOT EXISTS (
             SELECT 1 FROM forecasts f
             WHERE f.market_id = m.id
               AND f.created_at > datetime('now', ?1)
           )",
    )?;
    let cutoff = format!("-{max_age_hours} hours");
    query_markets(&mut stmt, params![cutoff])
}

pub fn mark_market_resolved(db: &DbPool, market_id: &str, outcome: i64) -> AgentResult<()> {
    let conn = lock(db)?;
    conn.execute(
        "UPDATE markets SET resolved = 1, outcome = ?1 WHERE id = ?2",
        params![outcome, market_id],
    )?;
    Ok(())
}

pub fn update_market_price(db: &DbPool, market_id: &str, price: f64) -> AgentResult<()> {
    let conn = lock(db)?;
    conn.execute(
        "UPDATE markets SET market_price = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
        params![price, market_id],
    )?;
    Ok(())
}

fn query_markets(
    stmt: &mut rusqlite::Statement<'_>,
    params: impl rusqlite::Params,
) -> AgentResult<Vec<MarketRow>> {
    let rows = stmt.query_map(params, row_to_market)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn row_to_market(row: &rusqlite::Row) -> rusqlite::Result<MarketRow> {
    Ok(MarketRow {
        id: row.get("id")?,
        exchange: row.get("exchange")?,
        question: row.get("question")?,
        domain: row.get("domain")?,
        url: row.get("url")?,
        market_price: row.get("market_price")?,
        volume_usd: row.get("volume_usd")?,
        close_time: row.get("close_time")?,
        resolved: row.get::<_, i64>("resolved")? != 0,
        outcome: row.get("outcome")?,
        dedup_group: row.get("dedup_group")?,
        updated_at: row.get("updated_at")?,
    })
}

// ---------------------------------------------------------------------
// Forecasts
// ---------------------------------------------------------------------

pub fn insert_forecast(db: &DbPool, f: &NewForecast) -> AgentResult<i64> {
    let conn = lock(db)?;
    conn.execute(
        "INSERT INTO forecasts
            (market_id, model, prompt_version, raw_probability, entropy,
             ensemble_probability, confidence_tier, reasoning_excerpt, news_used)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            f.market_id,
            f.model,
            f.prompt_version,
            f.raw_probability,
            f.entropy,
            f.ensemble_probability,
            f.confidence_tier,
            f.reasoning_excerpt,
            f.news_used as i64,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_latest_forecast(db: &DbPool, market_id: &str) -> AgentResult<Option<ForecastRow>> {
    let conn = lock(db)?;
    conn.query_row(
        "SELECT * FROM forecasts WHERE market_id = ?1 ORDER BY created_at DESC LIMIT 1",
        params![market_id],
        row_to_forecast,
    )
    .optional()
    .map_err(Into::into)
}

pub fn get_forecasts_for_market(db: &DbPool, market_id: &str) -> AgentResult<Vec<ForecastRow>> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare("SELECT * FROM forecasts WHERE market_id = ?1 ORDER BY created_at")?;
    let rows = stmt.query_map(params![market_id], row_to_forecast)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn row_to_forecast(row: &rusqlite::Row) -> rusqlite::Result<ForecastRow> {
    Ok(ForecastRow {
        id: row.get("id")?,
        market_id: row.get("market_id")?,
        model: row.get("model")?,
        prompt_version: row.get("prompt_version")?,
        raw_probability: row.get("raw_probability")?,
        entropy: row.get("entropy")?,
        ensemble_probability: row.get("ensemble_probability")?,
        confidence_tier: row.get("confidence_tier")?,
        reasoning_excerpt: row.get("reasoning_excerpt")?,
        news_used: row.get::<_, i64>("news_used")? != 0,
        created_at: row.get("created_at")?,
    })
}

// ---------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------

pub fn insert_trade(db: &DbPool, t: &NewTrade) -> AgentResult<i64> {
    let conn = lock(db)?;
    conn.execute(
        "INSERT INTO trades
            (market_id, forecast_id, exchange, side, size_units, price,
             kelly_fraction, edge, is_paper)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            t.market_id,
            t.forecast_id,
            t.exchange,
            t.side,
            t.size_units,
            t.price,
            t.kelly_fraction,
            t.edge,
            t.is_paper as i64,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn count_open_positions(db: &DbPool) -> AgentResult<i64> {
    let conn = lock(db)?;
    conn.query_row(
        "SELECT COUNT(DISTINCT t.market_id) FROM trades t
         JOIN markets m ON t.market_id = m.id
         WHERE m.resolved = 0",
        [],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

pub fn has_position(db: &DbPool, market_id: &str) -> AgentResult<bool> {
    let conn = lock(db)?;
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM trades WHERE market_id = ?1 LIMIT 1",
            params![market_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

/// Open (unresolved, paper) positions with their current mark price, for
/// portfolio mark-to-market.
pub fn get_open_paper_positions(db: &DbPool) -> AgentResult<Vec<(String, String, f64, f64)>> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare(
        "SELECT t.market_id, t.side, t.size_units, COALESCE(m.market_price, t.price) AS mark_price
         FROM trades t
         JOIN markets m ON t.market_id = m.id
         WHERE m.resolved = 0 AND t.is_paper = 1",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, f64>(2)?, row.get::<_, f64>(3)?))
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

// ---------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------

pub fn insert_outcome(db: &DbPool, o: &NewOutcome) -> AgentResult<()> {
    let conn = lock(db)?;
    conn.execute(
        "INSERT INTO outcomes
            (market_id, forecast_id, domain, model, prompt_version,
             predicted_prob, actual_outcome, brier, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            o.market_id,
            o.forecast_id,
            o.domain,
            o.model,
            o.prompt_version,
            o.predicted_prob,
            o.actual_outcome,
            o.brier,
            o.resolved_at,
        ],
    )?;
    Ok(())
}

pub fn get_outcomes_since(db: &DbPool, since_iso: &str) -> AgentResult<Vec<OutcomeRow>> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare("SELECT * FROM outcomes WHERE resolved_at > ?1")?;
    let rows = stmt.query_map(params![since_iso], |row| {
        Ok(OutcomeRow {
            id: row.get("id")?,
            market_id: row.get("market_id")?,
            forecast_id: row.get("forecast_id")?,
            domain: row.get("domain")?,
            model: row.get("model")?,
            prompt_version: row.get("prompt_version")?,
            predicted_prob: row.get("predicted_prob")?,
            actual_outcome: row.get("actual_outcome")?,
            brier: row.get("brier")?,
            resolved_at: row.get("resolved_at")?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Entropy per forecast id, for the threshold adapter's join against outcomes.
pub fn get_forecast_entropies(db: &DbPool) -> AgentResult<std::collections::HashMap<i64, f64>> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare("SELECT id, entropy FROM forecasts WHERE entropy IS NOT NULL")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?)))?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

// ---------------------------------------------------------------------
// Calibration state
// ---------------------------------------------------------------------

pub fn get_calibration_state(
    db: &DbPool,
    domain: &str,
    model: &str,
) -> AgentResult<Option<CalibrationStateRow>> {
    let conn = lock(db)?;
    conn.query_row(
        "SELECT * FROM calibration_state WHERE domain = ?1 AND model = ?2",
        params![domain, model],
        row_to_calibration,
    )
    .optional()
    .map_err(Into::into)
}

pub fn get_all_calibration(db: &DbPool) -> AgentResult<Vec<CalibrationStateRow>> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare("SELECT * FROM calibration_state")?;
    let rows = stmt.query_map([], row_to_calibration)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

#[allow(clippy::too_many_arguments)]
pub fn upsert_calibration(
    db: &DbPool,
    domain: &str,
    model: &str,
    brier: f64,
    n: i64,
    weight: f64,
    entropy_threshold: Option<f64>,
) -> AgentResult<()> {
    let conn = lock(db)?;
    conn.execute(
        "INSERT INTO calibration_state
            (domain, model, brier_score, n_resolved, domain_weight, entropy_threshold, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, CURRENT_TIMESTAMP)
         ON CONFLICT(domain, model) DO UPDATE SET
            brier_score       = excluded.brier_score,
            n_resolved        = excluded.n_resolved,
            domain_weight     = excluded.domain_weight,
            entropy_threshold = COALESCE(excluded.entropy_threshold, entropy_threshold),
            updated_at        = CURRENT_TIMESTAMP",
        params![domain, model, brier, n, weight, entropy_threshold],
    )?;
    Ok(())
}

/// Used by the threshold adapter to persist an already-computed tau onto an
/// existing calibration row without touching its brier/weight fields.
pub fn set_entropy_threshold(db: &DbPool, domain: &str, model: &str, tau: f64) -> AgentResult<()> {
    let conn = lock(db)?;
    conn.execute(
        "UPDATE calibration_state SET entropy_threshold = ?1, updated_at = CURRENT_TIMESTAMP
         WHERE domain = ?2 AND model = ?3",
        params![tau, domain, model],
    )?;
    Ok(())
}

fn row_to_calibration(row: &rusqlite::Row) -> rusqlite::Result<CalibrationStateRow> {
    Ok(CalibrationStateRow {
        domain: row.get("domain")?,
        model: row.get("model")?,
        brier_score: row.get("brier_score")?,
        n_resolved: row.get("n_resolved")?,
        domain_weight: row.get("domain_weight")?,
        entropy_threshold: row.get("entropy_threshold")?,
        updated_at: row.get("updated_at")?,
    })
}

// ---------------------------------------------------------------------
// Model weights
// ---------------------------------------------------------------------

pub fn get_model_weights(db: &DbPool) -> AgentResult<std::collections::HashMap<String, f64>> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare("SELECT model, weight FROM model_weights")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn upsert_model_weight(
    db: &DbPool,
    model: &str,
    weight: f64,
    rolling_brier: Option<f64>,
    n_resolved: i64,
) -> AgentResult<()> {
    let conn = lock(db)?;
    conn.execute(
        "INSERT INTO model_weights (model, weight, rolling_brier, n_resolved, updated_at)
         VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)
         ON CONFLICT(model) DO UPDATE SET
            weight        = excluded.weight,
            rolling_brier = excluded.rolling_brier,
            n_resolved    = excluded.n_resolved,
            updated_at    = CURRENT_TIMESTAMP",
        params![model, weight, rolling_brier, n_resolved],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------
// Prompt experiments
// ---------------------------------------------------------------------

pub fn get_active_prompts(
    db: &DbPool,
    domain: Option<&str>,
) -> AgentResult<Vec<PromptExperimentRow>> {
    let conn = lock(db)?;
    let mut stmt = if domain.is_some() {
        conn.prepare("SELECT * FROM prompt_experiments WHERE active = 1 AND (domain = ?1 OR domain IS NULL)")?
    } else {
        conn.prepare("SELECT * FROM prompt_experiments WHERE active = 1")?
    };
    let rows = if let Some(d) = domain {
        stmt.query_map(params![d], row_to_prompt)?
            .filter_map(|r| r.ok())
            .collect()
    } else {
        stmt.query_map([], row_to_prompt)?
            .filter_map(|r| r.ok())
            .collect()
    };
    Ok(rows)
}

pub fn upsert_prompt_experiment(db: &DbPool, p: &PromptExperimentRow) -> AgentResult<()> {
    let conn = lock(db)?;
    conn.execute(
        "INSERT INTO prompt_experiments
            (prompt_version, domain, prompt_template, n_trials, n_wins, mean_brier, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(prompt_version) DO UPDATE SET
            n_trials   = excluded.n_trials,
            n_wins     = excluded.n_wins,
            mean_brier = excluded.mean_brier,
            active     = excluded.active",
        params![
            p.prompt_version,
            p.domain,
            p.prompt_template,
            p.n_trials,
            p.n_wins,
            p.mean_brier,
            p.active as i64,
        ],
    )?;
    Ok(())
}

pub fn retire_prompt(db: &DbPool, prompt_version: &str) -> AgentResult<()> {
    let conn = lock(db)?;
    conn.execute(
        "UPDATE prompt_experiments SET active = 0 WHERE prompt_version = ?1",
        params![prompt_version],
    )?;
    Ok(())
}

fn row_to_prompt(row: &rusqlite::Row) -> rusqlite::Result<PromptExperimentRow> {
    Ok(PromptExperimentRow {
        prompt_version: row.get("prompt_version")?,
        domain: row.get("domain")?,
        prompt_template: row.get("prompt_template")?,
        n_trials: row.get("n_trials")?,
        n_wins: row.get("n_wins")?,
        mean_brier: row.get("mean_brier")?,
        active: row.get::<_, i64>("active")? != 0,
    })
}

// ---------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------

pub fn get_portfolio(db: &DbPool) -> AgentResult<PortfolioState> {
    let conn = lock(db)?;
    conn.query_row("SELECT cash, total_value, updated_at FROM portfolio_state WHERE id = 1", [], |row| {
        Ok(PortfolioState {
            cash: row.get(0)?,
            total_value: row.get(1)?,
            updated_at: row.get(2)?,
        })
    })
    .map_err(Into::into)
}

pub fn update_portfolio(db: &DbPool, cash: f64, total_value: f64) -> AgentResult<()> {
    let conn = lock(db)?;
    conn.execute(
        "INSERT INTO portfolio_state (id, cash, total_value, updated_at)
         VALUES (1, ?1, ?2, CURRENT_TIMESTAMP)
         ON CONFLICT(id) DO UPDATE SET
            cash        = excluded.cash,
            total_value = excluded.total_value,
            updated_at  = CURRENT_TIMESTAMP",
        params![cash, total_value],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------
// LLM cost tracking
// ---------------------------------------------------------------------

pub fn log_llm_cost(
    db: &DbPool,
    model: &str,
    input_tokens: i64,
    output_tokens: i64,
    cost_usd: f64,
    call_type: &str,
) -> AgentResult<()> {
    let conn = lock(db)?;
    conn.execute(
        "INSERT INTO llm_costs (model, input_tokens, output_tokens, cost_usd, call_type)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![model, input_tokens, output_tokens, cost_usd, call_type],
    )?;
    Ok(())
}

pub fn get_total_llm_spend(db: &DbPool) -> AgentResult<f64> {
    let conn = lock(db)?;
    conn.query_row("SELECT COALESCE(SUM(cost_usd), 0) FROM llm_costs", [], |row| row.get(0))
        .map_err(Into::into)
}
