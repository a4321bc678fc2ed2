use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use common::{Config, EngineCommand, EngineState, MarketEvent, ModeKind, Result};
use strategy::{MarketScorer, SignalGenerator};

use crate::binance::BinanceStream;
use crate::executor::{ExecutionCoordinator, ExecutionResult};

/// Timing knobs for the engine's workers and periodic tasks.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub evaluation_interval: Duration,
    pub equity_refresh_interval: Duration,
    pub reconcile_interval: Duration,
    /// How often the daily reset boundary is checked.
    pub day_roll_interval: Duration,
    /// Connect the Binance kline streams on start. Off when events are
    /// published through `EngineHandle::publish_market` instead.
    pub stream_market_data: bool,
}

impl EngineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        // tokio intervals panic on a zero period.
        let secs = |n: u64| Duration::from_secs(n.max(1));
        Self {
            evaluation_interval: secs(cfg.evaluation_interval_secs),
            equity_refresh_interval: secs(cfg.equity_refresh_secs),
            reconcile_interval: secs(cfg.reconcile_interval_secs),
            day_roll_interval: Duration::from_secs(60),
            stream_market_data: true,
        }
    }
}

/// The single per-symbol evaluation entry point shared by the interval timer
/// and market pushes: score, generate, admit, execute.
#[derive(Clone)]
pub struct SymbolEvaluator {
    scorer: Arc<dyn MarketScorer>,
    generator: Arc<SignalGenerator>,
    coordinator: Arc<ExecutionCoordinator>,
}

impl SymbolEvaluator {
    pub fn new(
        scorer: Arc<dyn MarketScorer>,
        generator: Arc<SignalGenerator>,
        coordinator: Arc<ExecutionCoordinator>,
    ) -> Self {
        Self { scorer, generator, coordinator }
    }

    pub fn coordinator(&self) -> &Arc<ExecutionCoordinator> {
        &self.coordinator
    }

    /// `Ok(None)` when nothing reached admission: no market data yet, the mode
    /// is disabled, or the generator said wait.
    pub async fn evaluate(&self, mode: ModeKind, symbol: &str) -> Result<Option<ExecutionResult>> {
        let risk = self.coordinator.risk();
        if !risk.get_mode(mode).await.config.enabled {
            return Ok(None);
        }
        let Some(snapshot) = self.scorer.snapshot(symbol).await else {
            debug!(symbol, "No market data yet");
            return Ok(None);
        };
        let scoring = self.scorer.score(symbol).await?;
        let signal = self.generator.generate(symbol, &snapshot, &scoring);
        if !signal.is_actionable() {
            debug!(symbol, mode = %mode, regime = %scoring.regime, "Generator says wait");
            return Ok(None);
        }

        let decision = risk.try_admit(&signal, mode).await?;
        Ok(Some(self.coordinator.execute(decision).await))
    }
}

/// Cloneable handle passed to the binary and tests.
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    state: Arc<RwLock<EngineState>>,
    market_tx: broadcast::Sender<MarketEvent>,
}

impl EngineHandle {
    pub async fn send(&self, cmd: EngineCommand) {
        let _ = self.command_tx.send(cmd).await;
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    /// Subscribe to the market event broadcast.
    pub fn subscribe_market(&self) -> broadcast::Receiver<MarketEvent> {
        self.market_tx.subscribe()
    }

    /// Inject a market event as if it came from the feed.
    pub fn publish_market(&self, event: MarketEvent) {
        let _ = self.market_tx.send(event);
    }
}

/// The main engine: owns the market feed, one evaluation worker per
/// (mode, symbol), the periodic housekeeping and command processing.
pub struct Engine {
    settings: EngineSettings,
    symbols: Vec<String>,
    evaluator: SymbolEvaluator,
    state: Arc<RwLock<EngineState>>,
    market_tx: broadcast::Sender<MarketEvent>,
    command_rx: mpsc::Receiver<EngineCommand>,
    #[allow(dead_code)] // kept to prevent channel close
    command_tx: mpsc::Sender<EngineCommand>,
}

impl Engine {
    pub fn new(
        settings: EngineSettings,
        symbols: Vec<String>,
        evaluator: SymbolEvaluator,
    ) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (market_tx, _) = broadcast::channel(1024);
        let state = Arc::new(RwLock::new(EngineState::Stopped));

        let handle = EngineHandle {
            command_tx: command_tx.clone(),
            state: state.clone(),
            market_tx: market_tx.clone(),
        };

        let engine = Engine {
            settings,
            symbols,
            evaluator,
            state,
            market_tx,
            command_rx,
            command_tx,
        };

        (engine, handle)
    }

    /// Run the engine. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!("Engine initialized in Stopped state. Waiting for Start command.");

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        let coordinator = self.evaluator.coordinator().clone();
        let risk = coordinator.risk().clone();

        loop {
            match self.command_rx.recv().await {
                Some(EngineCommand::Start) => {
                    if *self.state.read().await != EngineState::Stopped {
                        info!("Engine already running");
                        continue;
                    }
                    info!(symbols = ?self.symbols, "Starting engine");
                    tasks = self.spawn_tasks().await;
                    *self.state.write().await = EngineState::Running;
                }

                Some(EngineCommand::Stop) => {
                    info!("Engine stopping, aborting tasks");
                    *self.state.write().await = EngineState::Stopped;
                    for h in tasks.drain(..) {
                        h.abort();
                    }
                }

                Some(EngineCommand::Pause) => {
                    let mut state = self.state.write().await;
                    if *state == EngineState::Running {
                        info!("Engine paused, open positions still managed");
                        *state = EngineState::Paused;
                    }
                }

                Some(EngineCommand::Resume) => {
                    let mut state = self.state.write().await;
                    if *state == EngineState::Paused {
                        info!("Engine resumed");
                        *state = EngineState::Running;
                    }
                }

                Some(EngineCommand::SetModeEnabled { mode, enabled }) => {
                    if risk.set_mode_enabled(mode, enabled).await {
                        info!(mode = %mode, enabled, "Mode toggled");
                    }
                }

                Some(EngineCommand::ResetDailyCounters) => {
                    risk.reset_daily_counters(Utc::now()).await;
                    info!("Daily counters reset");
                }

                Some(EngineCommand::ResetPortfolio) => {
                    let dropped = coordinator.reset_portfolio().await;
                    info!(dropped, "Portfolio reset");
                }

                Some(EngineCommand::Reconcile) => {
                    if let Err(e) = coordinator.reconcile().await {
                        error!(error = %e, "Reconciliation failed");
                    }
                }

                None => {
                    warn!("Engine command channel closed, shutting down");
                    break;
                }
            }
        }

        for h in tasks {
            h.abort();
        }
    }

    async fn spawn_tasks(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        let market_rx = self.market_tx.subscribe();

        if self.settings.stream_market_data {
            for symbol in &self.symbols {
                let stream = BinanceStream::new(symbol.clone(), self.market_tx.clone());
                tasks.push(tokio::spawn(stream.run()));
            }
        }

        // One worker per (mode, symbol). Eligibility is fixed at start.
        let risk = self.evaluator.coordinator().risk().clone();
        let mut triggers: HashMap<String, Vec<mpsc::Sender<()>>> = HashMap::new();
        for mode in ModeKind::ALL {
            let config = risk.get_mode(mode).await.config;
            for symbol in self.symbols.iter().filter(|s| config.is_eligible(s)) {
                let (tx, rx) = mpsc::channel(1);
                triggers.entry(symbol.clone()).or_default().push(tx);
                tasks.push(tokio::spawn(run_worker(
                    self.evaluator.clone(),
                    self.state.clone(),
                    mode,
                    symbol.clone(),
                    self.settings.evaluation_interval,
                    rx,
                )));
            }
        }

        tasks.push(tokio::spawn(run_dispatcher(
            self.evaluator.clone(),
            market_rx,
            triggers,
        )));
        tasks.push(tokio::spawn(run_housekeeping(
            self.evaluator.coordinator().clone(),
            self.settings.clone(),
        )));
        tasks
    }
}

async fn run_worker(
    evaluator: SymbolEvaluator,
    state: Arc<RwLock<EngineState>>,
    mode: ModeKind,
    symbol: String,
    period: Duration,
    mut trigger_rx: mpsc::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(symbol = %symbol, mode = %mode, "Evaluation worker started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            trigger = trigger_rx.recv() => {
                if trigger.is_none() {
                    break;
                }
            }
        }
        if *state.read().await != EngineState::Running {
            continue;
        }
        match evaluator.evaluate(mode, &symbol).await {
            Ok(Some(ExecutionResult::Failed { error, .. })) => {
                warn!(symbol = %symbol, mode = %mode, error = %error, "Execution failed");
            }
            Ok(_) => {}
            Err(e) => warn!(symbol = %symbol, mode = %mode, error = %e, "Evaluation failed"),
        }
    }
}

/// Feeds the scorer, drives position lifecycles and wakes the workers of a
/// symbol whenever one of its candles closes.
async fn run_dispatcher(
    evaluator: SymbolEvaluator,
    mut market_rx: broadcast::Receiver<MarketEvent>,
    triggers: HashMap<String, Vec<mpsc::Sender<()>>>,
) {
    loop {
        let event = match market_rx.recv().await {
            Ok(e) => e,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Market dispatcher lagging");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        evaluator.scorer.observe(&event).await;
        evaluator.coordinator.on_market_event(&event).await;

        if event.is_candle_closed {
            for tx in triggers.get(&event.symbol).into_iter().flatten() {
                // A full channel already holds a pending wake-up.
                let _ = tx.try_send(());
            }
        }
    }
}

async fn run_housekeeping(coordinator: Arc<ExecutionCoordinator>, settings: EngineSettings) {
    let mut day = tokio::time::interval(settings.day_roll_interval);
    let mut equity = tokio::time::interval(settings.equity_refresh_interval);
    let mut reconcile = tokio::time::interval(settings.reconcile_interval);
    for t in [&mut day, &mut equity, &mut reconcile] {
        t.set_missed_tick_behavior(MissedTickBehavior::Skip);
    }

    loop {
        tokio::select! {
            _ = day.tick() => {
                if coordinator.risk().roll_day(Utc::now()).await {
                    info!("Trading day rolled, daily counters cleared");
                }
                coordinator.expire_stale_reservations().await;
            }
            _ = equity.tick() => {
                if let Err(e) = coordinator.refresh_equity().await {
                    warn!(error = %e, "Equity refresh failed");
                }
            }
            _ = reconcile.tick() => {
                if let Err(e) = coordinator.reconcile().await {
                    warn!(error = %e, "Periodic reconciliation failed");
                }
            }
        }
    }
}
