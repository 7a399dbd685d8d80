//! Schedules and runs the six background jobs. Each job carries a
//! `max_instances=1` guard: a tick that lands while the previous run of that
//! same job hasn't finished is skipped rather than queued. Per-job failures
//! are logged and swallowed so one misbehaving job never takes down the
//! others or the process.

use crate::core::Core;
use crate::intelligence::{classifier, ensemble, forecaster, news};
use crate::learning::{domain_calibrator, model_selector, prompt_evolver, threshold_adapter, tracker};
use crate::store::model::NewForecast;
use crate::store::{self, model::MarketRow};
use crate::trading::executor::{self, TradeIntent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cooperative `max_instances=1` lock: `enter()` returns `None` if the job
/// is already mid-run, and the returned guard clears the flag on drop so a
/// panicking job run doesn't wedge the slot open forever... except a panic
/// unwinds through the guard's Drop impl regardless, which is the point.
struct JobGuard(Arc<AtomicBool>);

impl JobGuard {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    fn enter(&self) -> Option<JobGuardHandle> {
        if self.0.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(JobGuardHandle(self.0.clone()))
        }
    }
}

struct JobGuardHandle(Arc<AtomicBool>);

impl Drop for JobGuardHandle {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Spawns one tokio task per job and returns their handles. The caller is
/// expected to hold onto the handles only to abort them on shutdown; each
/// task runs until the process exits.
pub fn spawn_all(core: Arc<Core>) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    handles.push(spawn_interval_job(
        core.clone(),
        Duration::from_secs(core.config.scan_interval_hours as u64 * 3600),
        "scan_markets",
        scan_markets_job,
    ));
    handles.push(spawn_interval_job(
        core.clone(),
        Duration::from_secs(core.config.price_update_interval_minutes as u64 * 60),
        "update_prices",
        update_prices_job,
    ));
    handles.push(spawn_interval_job(
        core.clone(),
        Duration::from_secs(core.config.resolution_check_interval_hours as u64 * 3600),
        "check_resolutions",
        check_resolutions_job,
    ));
    handles.push(spawn_interval_job(
        core.clone(),
        Duration::from_secs(core.config.forecast_interval_hours as u64 * 3600),
        "run_forecasts",
        run_forecasts_job,
    ));
    handles.push(spawn_daily_job(core.clone(), core.config.self_improvement_hour, "self_improvement", self_improvement_job));
    handles.push(spawn_weekly_job(core.clone(), chrono::Weekday::Mon, 7, "prompt_tournament", prompt_tournament_job));

    handles
}

type JobFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

fn scan_markets_job(core: Arc<Core>) -> JobFuture {
    Box::pin(async move { scan_markets(&core).await })
}
fn update_prices_job(core: Arc<Core>) -> JobFuture {
    Box::pin(async move { update_prices(&core).await })
}
fn check_resolutions_job(core: Arc<Core>) -> JobFuture {
    Box::pin(async move { check_resolutions(&core).await })
}
fn run_forecasts_job(core: Arc<Core>) -> JobFuture {
    Box::pin(async move { run_forecasts(&core).await })
}
fn self_improvement_job(core: Arc<Core>) -> JobFuture {
    Box::pin(async move { self_improvement(&core).await })
}
fn prompt_tournament_job(core: Arc<Core>) -> JobFuture {
    Box::pin(async move { prompt_tournament(&core).await })
}

fn spawn_interval_job(
    core: Arc<Core>,
    period: Duration,
    name: &'static str,
    run: fn(Arc<Core>) -> JobFuture,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let guard = JobGuard::new();
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let Some(handle) = guard.enter() else {
                tracing::debug!(job = name, "skipping tick, previous run still in flight");
                continue;
            };
            tracing::info!(job = name, "job started");
            run(core.clone()).await;
            drop(handle);
        }
    })
}

fn spawn_daily_job(
    core: Arc<Core>,
    hour: u32,
    name: &'static str,
    run: fn(Arc<Core>) -> JobFuture,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let guard = JobGuard::new();
        loop {
            tokio::time::sleep(duration_until_next_hour(hour)).await;
            let Some(handle) = guard.enter() else {
                tracing::debug!(job = name, "skipping tick, previous run still in flight");
                continue;
            };
            tracing::info!(job = name, "job started");
            run(core.clone()).await;
            drop(handle);
        }
    })
}

fn spawn_weekly_job(
    core: Arc<Core>,
    weekday: chrono::Weekday,
    hour: u32,
    name: &'static str,
    run: fn(Arc<Core>) -> JobFuture,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let guard = JobGuard::new();
        loop {
            tokio::time::sleep(duration_until_next_weekday_hour(weekday, hour)).await;
            let Some(handle) = guard.enter() else {
                tracing::debug!(job = name, "skipping tick, previous run still in flight");
                continue;
            };
            tracing::info!(job = name, "job started");
            run(core.clone()).await;
            drop(handle);
        }
    })
}

fn duration_until_next_hour(hour: u32) -> Duration {
    use chrono::{Duration as ChronoDuration, Timelike, Utc};
    let now = Utc::now();
    let mut next = now.date_naive().and_hms_opt(hour, 0, 0).expect("valid hour").and_utc();
    if next <= now {
        next += ChronoDuration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}

fn duration_until_next_weekday_hour(weekday: chrono::Weekday, hour: u32) -> Duration {
    use chrono::{Datelike, Duration as ChronoDuration, Utc};
    let now = Utc::now();
    let mut next = now.date_naive().and_hms_opt(hour, 0, 0).expect("valid hour").and_utc();
    while next.weekday() != weekday || next <= now {
        next += ChronoDuration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}

// ---------------------------------------------------------------------
// Job bodies
// ---------------------------------------------------------------------

async fn scan_markets(core: &Core) {
    let exchanges = core.exchanges();
    match crate::scanner::scan_all_markets(&core.db, &exchanges).await {
        Ok(markets) => tracing::info!(n = markets.len(), "scan_markets: found markets"),
        Err(e) => tracing::error!(error = %e, "scan_markets failed"),
    }
}

async fn update_prices(core: &Core) {
    let exchanges = core.exchanges();
    if let Err(e) = crate::scanner::refresh_prices(&core.db, &exchanges).await {
        tracing::error!(error = %e, "update_prices failed");
    }
}

async fn check_resolutions(core: &Core) {
    let exchanges = core.exchanges();
    match tracker::check_new_outcomes(&core.db, &exchanges).await {
        Ok(n) => {
            tracing::info!(n, "check_resolutions: recorded new outcomes");
            if core.record_outcomes_and_check_batch(n as i64) {
                tracing::info!("batch size reached, triggering incremental calibration");
                run_incremental_calibration(core);
            }
        }
        Err(e) => tracing::error!(error = %e, "check_resolutions failed"),
    }
}

fn run_incremental_calibration(core: &Core) {
    if let Err(e) = domain_calibrator::run_calibration(&core.db, &core.config) {
        tracing::error!(error = %e, "incremental calibration failed");
    }
    if let Err(e) = threshold_adapter::run_threshold_adaptation(&core.db, &core.config) {
        tracing::error!(error = %e, "incremental threshold adaptation failed");
    }
}

/// Runs one pass of the forecast pipeline over every unforecasted market.
/// Exposed for the CLI's `--once`/default-startup paths, which run a pass
/// immediately instead of waiting for the first scheduled tick.
pub async fn run_forecasts_once(core: &Core) {
    run_forecasts(core).await;
}

/// `--paper` entry point: scans every adapter, runs the full pipeline on
/// just the first market the scan turns up, then prints a forecast summary
/// alongside the portfolio summary. Unlike `--once` this never touches
/// `update_prices`/`check_resolutions` and only ever processes one market --
/// it's a smoke test for the forecast-to-trade path, not a production tick.
pub async fn run_paper_mode(core: &Core) {
    let exchanges = core.exchanges();
    if let Err(e) = crate::scanner::scan_all_markets(&core.db, &exchanges).await {
        tracing::error!(error = %e, "paper run: scan failed");
    }

    let markets = match store::get_active_markets(&core.db) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "paper run: failed to load markets");
            return;
        }
    };
    let Some(first) = markets.into_iter().next() else {
        tracing::warn!("paper run: no markets available after scan");
        return;
    };
    let market_id = first.id.clone();

    process_market(core, first).await;

    match store::get_latest_forecast(&core.db, &market_id) {
        Ok(Some(f)) => tracing::info!(
            market_id = %market_id,
            model = %f.model,
            ensemble_probability = f.ensemble_probability,
            confidence_tier = %f.confidence_tier,
            reasoning = %f.reasoning_excerpt.as_deref().unwrap_or(""),
            "=== forecast summary ==="
        ),
        Ok(None) => tracing::warn!(market_id = %market_id, "paper run: no forecast produced"),
        Err(e) => tracing::error!(market_id = %market_id, error = %e, "paper run: failed to load forecast"),
    }

    if let Err(e) = crate::trading::portfolio::print_summary(&core.db) {
        tracing::error!(error = %e, "paper run: failed to print portfolio summary");
    }
}

async fn run_forecasts(core: &Core) {
    let markets = match store::get_unforecasted_markets(&core.db, core.config.forecast_interval_hours) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "run_forecasts failed to load markets");
            return;
        }
    };
    if markets.is_empty() {
        tracing::info!("run_forecasts: no unforecasted markets");
        return;
    }
    tracing::info!(n = markets.len(), "run_forecasts: processing markets");
    for market in markets {
        process_market(core, market).await;
    }
}

/// Full single-market pipeline: classify, fetch news, pick a prompt, fan
/// out to the model ensemble, combine, persist, and decide whether to trade.
pub(crate) async fn process_market(core: &Core, mut row: MarketRow) {
    let market_id = row.id.clone();

    if row.domain.is_none() {
        let classification = classifier::classify(&core.client, &core.config, &row.question).await;
        row.domain = Some(classification.domain.clone());
        if let Err(e) = store::upsert_market(&core.db, &row) {
            tracing::error!(market_id = %market_id, error = %e, "failed to persist classified domain");
        }
    }
    let domain = row.domain.clone().unwrap_or_else(|| "politics".to_string());

    let market = crate::exchange::Market {
        id: row.id.clone(),
        exchange: match row.exchange.as_str() {
            "kalshi" => "kalshi",
            _ => "polymarket",
        },
        question: row.question.clone(),
        market_price: row.market_price.unwrap_or(0.5),
        volume_usd: row.volume_usd,
        close_time: row.close_time.as_deref().and_then(|s| s.parse().ok()),
        url: row.url.clone().unwrap_or_default(),
    };

    let news_ctx = news::get_news_context(&core.client, &core.config, &domain, &market.question).await;

    let (prompt_version, prompt_template) = match prompt_evolver::get_active_prompt(&core.db, Some(&domain)) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(market_id = %market_id, error = %e, "failed to load active prompt");
            return;
        }
    };

    let model_weights = match model_selector::get_current_weights(&core.db) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(market_id = %market_id, error = %e, "failed to load model weights");
            return;
        }
    };
    let calibration_rows = match store::get_all_calibration(&core.db) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(market_id = %market_id, error = %e, "failed to load calibration state");
            return;
        }
    };
    let cal_lookup = ensemble::build_calibration_lookup(&calibration_rows);
    let domain_thresholds = ensemble::build_domain_thresholds(&calibration_rows);
    let models = model_selector::weighted_model_configs(&model_weights);
    let domain_weights = ensemble::domain_weights_for(&cal_lookup, &domain, &models.iter().map(|m| m.id.clone()).collect::<Vec<_>>());

    let forecasts = forecaster::forecast(
        &core.client,
        &core.db,
        &core.config,
        &core.llm_semaphore,
        &models,
        &prompt_version,
        &prompt_template,
        &market.question,
        &domain,
        &news_ctx.body,
        &news_ctx.system_prefix,
        news_ctx.use_news,
        market.market_price,
    )
    .await;

    if forecasts.is_empty() {
        tracing::warn!(market_id = %market_id, "no forecasts produced");
        return;
    }

    let result = ensemble::combine(&forecasts, &model_weights, &domain_weights, domain_thresholds.get(&domain).copied());

    let mut last_forecast_id = None;
    for f in &forecasts {
        match store::insert_forecast(
            &core.db,
            &NewForecast {
                market_id: market_id.clone(),
                model: f.model.clone(),
                prompt_version: f.prompt_version.clone(),
                raw_probability: f.raw_probability,
                entropy: f.entropy,
                ensemble_probability: result.probability,
                confidence_tier: result.confidence_tier.to_string(),
                reasoning_excerpt: f.reasoning.clone(),
                news_used: f.news_used,
            },
        ) {
            Ok(id) => last_forecast_id = Some(id),
            Err(e) => tracing::error!(market_id = %market_id, error = %e, "failed to persist forecast"),
        }
    }

    let Some(forecast_id) = last_forecast_id else { return };
    let default_model = models.first().map(|m| m.id.clone()).unwrap_or_else(|| "claude-sonnet-4-6".to_string());
    let domain_weight = domain_calibrator::get_domain_weight(&cal_lookup, &domain, &default_model);

    let intent = TradeIntent {
        market: &market,
        forecast_id,
        ensemble_prob: result.probability,
        confidence_tier: result.confidence_tier,
        domain_weight,
    };

    let exchanges = core.exchanges();
    match executor::maybe_trade(&core.db, &core.config, &exchanges, intent).await {
        Ok(trade_id) => tracing::info!(
            market_id = %market_id, domain = %domain, probability = result.probability,
            entropy = result.entropy, confidence = result.confidence_tier,
            edge = result.probability - market.market_price,
            trade_id = ?trade_id, "pipeline complete"
        ),
        Err(e) => tracing::error!(market_id = %market_id, error = %e, "trade execution failed"),
    }
}

async fn self_improvement(core: &Core) {
    if let Err(e) = domain_calibrator::run_calibration(&core.db, &core.config) {
        tracing::error!(error = %e, "self_improvement: calibration failed");
    }
    match model_selector::run_model_selection(&core.db, &core.config) {
        Ok(weights) => tracing::info!(?weights, "self_improvement: model weights updated"),
        Err(e) => tracing::error!(error = %e, "self_improvement: model selection failed"),
    }
    if let Err(e) = threshold_adapter::run_threshold_adaptation(&core.db, &core.config) {
        tracing::error!(error = %e, "self_improvement: threshold adaptation failed");
    }
    tracing::info!("self_improvement: complete");
}

async fn prompt_tournament(core: &Core) {
    let domains: Vec<Option<&str>> = std::iter::once(None).chain(crate::intelligence::DOMAIN_PRIORITY.iter().map(|d| Some(*d))).collect();
    for domain in domains {
        if let Err(e) = prompt_evolver::run_prompt_tournament(&core.client, &core.db, &core.config, domain).await {
            tracing::error!(?domain, error = %e, "prompt_tournament failed");
        }
    }
    tracing::info!("prompt_tournament: complete");
}

/// Restores model weights and seeds prompt variants on startup, then prints
/// the current portfolio state.
pub fn load_state(core: &Core) -> crate::errors::AgentResult<()> {
    let weights = model_selector::get_current_weights(&core.db)?;
    prompt_evolver::seed_initial_prompts(&core.db)?;
    tracing::info!(?weights, "state loaded");
    crate::trading::portfolio::print_summary(&core.db)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_guard_blocks_reentry_until_dropped() {
        let guard = JobGuard::new();
        let handle = guard.enter().expect("first enter succeeds");
        assert!(guard.enter().is_none());
        drop(handle);
        assert!(guard.enter().is_some());
    }

    #[test]
    fn next_hour_duration_is_within_a_day() {
        let d = duration_until_next_hour(12);
        assert!(d <= Duration::from_secs(24 * 3600));
    }

    #[test]
    fn next_weekday_hour_lands_on_that_weekday() {
        use chrono::{Datelike, Utc};
        let d = duration_until_next_weekday_hour(chrono::Weekday::Mon, 7);
        let target = Utc::now() + chrono::Duration::from_std(d).unwrap();
        assert_eq!(target.weekday(), chrono::Weekday::Mon);
    }
}
