mod config;
mod core;
mod errors;
mod exchange;
mod intelligence;
mod learning;
mod orchestrator;
mod scanner;
mod store;
mod trading;

use crate::core::Core;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(if verbose { "debug" } else { "info" })),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("prediction agent starting");

    let mut config = match config::AgentConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    let paper_run = args.iter().any(|a| a == "--paper");
    if paper_run {
        config.paper_mode = true;
    }

    let core = match Core::new(config) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!("core init error: {e}");
            std::process::exit(1);
        }
    };

    if args.iter().any(|a| a == "--dry-run") {
        run_dry_run(&core).await;
        return;
    }

    if paper_run {
        if let Err(e) = orchestrator::load_state(&core) {
            tracing::error!(error = %e, "load_state failed");
        }
        orchestrator::run_paper_mode(&core).await;
        return;
    }

    if args.iter().any(|a| a == "--once") {
        run_once(&core).await;
        return;
    }

    run_forever(core).await;
}

/// Lists a handful of markets from each exchange adapter without touching
/// the store or running any forecasts -- a smoke test for credentials and
/// connectivity.
async fn run_dry_run(core: &Core) {
    for exchange in core.exchanges() {
        match exchange.list_markets().await {
            Ok(markets) => {
                tracing::info!(exchange = exchange.name(), n = markets.len(), "dry run: listed markets");
                for m in markets.iter().take(5) {
                    tracing::info!(exchange = exchange.name(), id = %m.id, question = %m.question, price = m.market_price, "market");
                }
            }
            Err(e) => tracing::error!(exchange = exchange.name(), error = %e, "dry run: list_markets failed"),
        }
    }
}

/// Runs one full pass -- load state, scan, refresh prices, check
/// resolutions, forecast -- and exits. Useful for cron-style invocation
/// outside the built-in scheduler.
async fn run_once(core: &Core) {
    if let Err(e) = orchestrator::load_state(core) {
        tracing::error!(error = %e, "load_state failed");
    }

    let exchanges = core.exchanges();
    if let Err(e) = scanner::scan_all_markets(&core.db, &exchanges).await {
        tracing::error!(error = %e, "scan failed");
    }
    if let Err(e) = scanner::refresh_prices(&core.db, &exchanges).await {
        tracing::error!(error = %e, "price refresh failed");
    }
    match learning::tracker::check_new_outcomes(&core.db, &exchanges).await {
        Ok(n) => tracing::info!(n, "recorded new outcomes"),
        Err(e) => tracing::error!(error = %e, "resolution check failed"),
    }

    orchestrator::run_forecasts_once(core).await;

    if let Err(e) = trading::portfolio::print_summary(&core.db) {
        tracing::error!(error = %e, "failed to print portfolio summary");
    }
}

/// The default mode: loads state, runs one immediate scan + forecast pass so
/// the agent isn't idle until the first scheduled tick, then starts the
/// background jobs and blocks until Ctrl-C.
async fn run_forever(core: Arc<Core>) {
    if let Err(e) = orchestrator::load_state(&core) {
        tracing::error!(error = %e, "load_state failed");
    }

    let exchanges = core.exchanges();
    if let Err(e) = scanner::scan_all_markets(&core.db, &exchanges).await {
        tracing::error!(error = %e, "initial scan failed");
    }
    orchestrator::run_forecasts_once(&core).await;

    let handles = orchestrator::spawn_all(core.clone());

    tracing::info!("scheduler running, press ctrl-c to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
    tracing::info!("shutdown requested, stopping jobs");
    for h in handles {
        h.abort();
    }
}
