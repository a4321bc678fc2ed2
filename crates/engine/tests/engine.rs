mod support;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use common::{
    Bias, EngineCommand, EngineState, MarketEvent, MarketRegime, MarketSnapshot, ModeKind, Result,
    ScoringResult, SubScore,
};
use engine::{Engine, EngineHandle, EngineSettings, ExecutionCoordinator, SymbolEvaluator};
use risk::RiskManager;
use strategy::{GeneratorConfig, MarketScorer, SignalGenerator};

use support::{risk_config, MockGateway};

/// Remembers the last price per symbol and always votes bullish.
#[derive(Default)]
struct BullishScorer {
    prices: RwLock<HashMap<String, f64>>,
}

#[async_trait]
impl MarketScorer for BullishScorer {
    async fn observe(&self, event: &MarketEvent) {
        self.prices.write().await.insert(event.symbol.clone(), event.price);
    }

    async fn score(&self, _symbol: &str) -> Result<ScoringResult> {
        Ok(ScoringResult {
            regime: MarketRegime::StrongTrend,
            confidence: 0.9,
            bias: Bias::Bullish,
            factors: vec![SubScore {
                factor: "trend".into(),
                score: 0.9,
                bias: Bias::Bullish,
                description: "fast above slow".into(),
            }],
        })
    }

    async fn snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        let price = *self.prices.read().await.get(symbol)?;
        Some(MarketSnapshot { symbol: symbol.into(), price, atr: 0.0, timestamp: Utc::now() })
    }
}

fn candle(symbol: &str, price: f64, closed: bool) -> MarketEvent {
    MarketEvent {
        symbol: symbol.into(),
        price,
        open: price,
        high: price,
        low: price,
        volume: 1.0,
        is_candle_closed: closed,
        timestamp: Utc::now(),
    }
}

fn settings() -> EngineSettings {
    EngineSettings {
        evaluation_interval: Duration::from_secs(3600),
        equity_refresh_interval: Duration::from_secs(3600),
        reconcile_interval: Duration::from_secs(3600),
        day_roll_interval: Duration::from_secs(3600),
        stream_market_data: false,
    }
}

fn start_engine(gateway: Arc<MockGateway>) -> (EngineHandle, RiskManager) {
    let risk = RiskManager::new(risk_config()).unwrap();
    let coordinator = Arc::new(ExecutionCoordinator::new(gateway, risk.clone(), Duration::from_secs(2)));
    let evaluator = SymbolEvaluator::new(
        Arc::new(BullishScorer::default()),
        Arc::new(SignalGenerator::new(GeneratorConfig::default())),
        coordinator,
    );
    let (engine, handle) = Engine::new(settings(), vec!["BTCUSDT".into()], evaluator);
    tokio::spawn(engine.run());
    (handle, risk)
}

async fn wait_for<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn closed_candle_triggers_entry_and_ticks_manage_it() {
    let gateway = Arc::new(MockGateway::default());
    let (handle, risk) = start_engine(gateway.clone());
    let (handle, risk) = (&handle, &risk);

    handle.send(EngineCommand::Start).await;
    assert!(wait_for(move || async move { handle.state().await == EngineState::Running }).await);

    handle.publish_market(candle("BTCUSDT", 100.0, true));
    assert!(wait_for(move || async move { risk.list_open_positions().await.len() == 1 }).await);

    let positions = risk.list_open_positions().await;
    let pos = &positions[0];
    assert_eq!(pos.mode, ModeKind::Conservative);
    assert_eq!(pos.entry_price, 100.0);

    // Fallback 1% stop at 99.
    gateway.set_mark(98.5);
    handle.publish_market(candle("BTCUSDT", 98.5, false));
    assert!(wait_for(move || async move { risk.list_open_positions().await.is_empty() }).await);
    assert_eq!(gateway.close_count(), 1);
}

#[tokio::test]
async fn paused_engine_opens_nothing() {
    let gateway = Arc::new(MockGateway::default());
    let (handle, risk) = start_engine(gateway.clone());
    let (handle, risk) = (&handle, &risk);

    handle.send(EngineCommand::Start).await;
    handle.send(EngineCommand::Pause).await;
    assert!(wait_for(move || async move { handle.state().await == EngineState::Paused }).await);

    handle.publish_market(candle("BTCUSDT", 100.0, true));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(risk.list_open_positions().await.is_empty());

    handle.send(EngineCommand::Resume).await;
    assert!(wait_for(move || async move { handle.state().await == EngineState::Running }).await);
    handle.publish_market(candle("BTCUSDT", 100.0, true));
    assert!(wait_for(move || async move { risk.list_open_positions().await.len() == 1 }).await);
}

#[tokio::test]
async fn mode_toggle_and_resets_go_through_commands() {
    let gateway = Arc::new(MockGateway::default());
    let (handle, risk) = start_engine(gateway.clone());
    let (handle, risk) = (&handle, &risk);

    handle.send(EngineCommand::SetModeEnabled { mode: ModeKind::Conservative, enabled: false }).await;
    assert!(wait_for(move || async move { !risk.get_mode(ModeKind::Conservative).await.config.enabled }).await);

    handle.send(EngineCommand::Start).await;
    assert!(wait_for(move || async move { handle.state().await == EngineState::Running }).await);
    handle.publish_market(candle("BTCUSDT", 100.0, true));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(risk.list_open_positions().await.is_empty());

    handle.send(EngineCommand::SetModeEnabled { mode: ModeKind::Conservative, enabled: true }).await;
    assert!(wait_for(move || async move { risk.get_mode(ModeKind::Conservative).await.config.enabled }).await);
    handle.publish_market(candle("BTCUSDT", 100.0, true));
    assert!(wait_for(move || async move { risk.list_open_positions().await.len() == 1 }).await);
    assert_eq!(risk.get_mode(ModeKind::Conservative).await.daily_trade_count, 1);

    handle.send(EngineCommand::ResetDailyCounters).await;
    assert!(wait_for(move || async move { risk.get_mode(ModeKind::Conservative).await.daily_trade_count == 0 }).await);

    handle.send(EngineCommand::ResetPortfolio).await;
    assert!(wait_for(move || async move { risk.list_open_positions().await.is_empty() }).await);
    assert_eq!(gateway.close_count(), 0);

    handle.send(EngineCommand::Stop).await;
    assert!(wait_for(move || async move { handle.state().await == EngineState::Stopped }).await);
}
