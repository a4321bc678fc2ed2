use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, EngineCommand, RiskEvent, TradingMode};
use engine::{Engine, EngineSettings, ExecutionCoordinator, SymbolEvaluator, TradeJournal};
use paper::PaperGateway;
use risk::{RiskConfig, RiskFileConfig, RiskManager};
use strategy::{GeneratorFileConfig, IndicatorScorer, SignalGenerator};

/// Symbols to stream: the union of every mode's universe.
fn trading_symbols(cfg: &RiskConfig) -> anyhow::Result<Vec<String>> {
    let symbols: BTreeSet<String> = cfg
        .conservative
        .symbols
        .iter()
        .chain(&cfg.scalping.symbols)
        .map(|s| s.to_uppercase())
        .collect();
    if symbols.is_empty() {
        bail!("no symbols configured; list them under [[mode]] symbols in the risk config");
    }
    Ok(symbols.into_iter().collect())
}

fn log_risk_event(event: RiskEvent) {
    match event {
        RiskEvent::AdmissionRejected { symbol, mode, reason } => {
            info!(symbol = %symbol, mode = %mode, reason = %reason, "Admission rejected");
        }
        RiskEvent::PositionOpened { id, symbol, mode, direction, quantity, price } => {
            info!(id = %id, symbol = %symbol, mode = %mode, direction = %direction, quantity, price, "Opened");
        }
        RiskEvent::PositionReduced { id, symbol, closed_quantity, remaining, realized_pnl } => {
            info!(id = %id, symbol = %symbol, closed_quantity, remaining, realized_pnl, "Reduced");
        }
        RiskEvent::PositionClosed { id, symbol, reason, realized_pnl } => {
            info!(id = %id, symbol = %symbol, reason = %reason, realized_pnl, "Closed");
        }
        RiskEvent::ExecutionFailed { symbol, error } => {
            error!(symbol = %symbol, error = %error, "Execution failed");
        }
        RiskEvent::ReconciliationConflict { detail } => {
            warn!(detail = %detail, "Ledger and exchange disagree");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(mode = %cfg.trading_mode, "LadderBot starting");
    if cfg.trading_mode == TradingMode::Live {
        panic!("TRADING_MODE=live needs an exchange ExecutionGateway; this binary only wires paper trading");
    }

    let risk_cfg = RiskFileConfig::load(&cfg.risk_config_path);
    let generator_file = cfg
        .generator_config_path
        .as_deref()
        .map(GeneratorFileConfig::load)
        .unwrap_or_default();
    let symbols = trading_symbols(&risk_cfg)?;

    // ── Database ──────────────────────────────────────────────────────────────
    let db = SqlitePool::connect(&cfg.database_url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to database: {e}"));
    engine::journal::migrate(&db)
        .await
        .unwrap_or_else(|e| panic!("Database migration failed: {e}"));
    info!("Database ready");

    // ── Gateway ───────────────────────────────────────────────────────────────
    info!(slippage_bps = cfg.paper_slippage_bps, "Paper trading mode, using PaperGateway");
    let paper = Arc::new(PaperGateway::new(cfg.paper_initial_balance, cfg.paper_slippage_bps));

    // ── Risk & execution ──────────────────────────────────────────────────────
    let (risk_event_tx, mut risk_event_rx) = mpsc::channel::<RiskEvent>(256);
    let risk_manager = RiskManager::new(risk_cfg)
        .context("invalid risk configuration")?
        .with_events(risk_event_tx.clone());
    let coordinator = Arc::new(
        ExecutionCoordinator::new(
            paper.clone(),
            risk_manager,
            Duration::from_millis(cfg.gateway_timeout_ms),
        )
        .with_journal(TradeJournal::new(db.clone(), cfg.trading_mode))
        .with_events(risk_event_tx),
    );

    // ── Strategy ──────────────────────────────────────────────────────────────
    let evaluator = SymbolEvaluator::new(
        Arc::new(IndicatorScorer::new(generator_file.scorer)),
        Arc::new(SignalGenerator::new(generator_file.generator)),
        coordinator,
    );

    // ── Engine ────────────────────────────────────────────────────────────────
    let (engine, engine_handle) = Engine::new(EngineSettings::from_config(&cfg), symbols, evaluator);

    // Paper fills follow the live feed.
    let mut market_rx = engine_handle.subscribe_market();
    let price_sink = paper.clone();
    tokio::spawn(async move {
        loop {
            match market_rx.recv().await {
                Ok(event) => price_sink.update_price(&event.symbol, event.price).await,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::spawn(async move {
        while let Some(event) = risk_event_rx.recv().await {
            log_risk_event(event);
        }
    });

    tokio::spawn(engine.run());
    engine_handle.send(EngineCommand::Start).await;

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("Shutdown signal received. Stopping engine.");
    engine_handle.send(EngineCommand::Stop).await;
    Ok(())
}
