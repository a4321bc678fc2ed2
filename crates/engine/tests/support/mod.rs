#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use common::{
    Balances, Error, ExchangePosition, ExchangePositionRef, ExecutionGateway, Fill,
    OpenConfirmation, OpenRequest, Result, RiskEvent, Signal, SignalAction, TakeProfitLevel,
};
use engine::{ExecutionCoordinator, TradeJournal};
use risk::{RiskConfig, RiskManager};
use sqlx::sqlite::SqlitePoolOptions;

/// In-memory gateway that fills at the request's reference price (plus
/// `open_slippage`) on open and at a settable mark on close.
#[derive(Default)]
pub struct MockGateway {
    pub opens: AtomicUsize,
    pub closes: Mutex<Vec<(ExchangePositionRef, f64)>>,
    pub reject: AtomicBool,
    pub open_delay: Option<Duration>,
    /// Added to the reference price of every open fill.
    pub open_slippage: f64,
    pub mark: Mutex<f64>,
    pub positions: Mutex<HashMap<ExchangePositionRef, ExchangePosition>>,
}

impl MockGateway {
    pub fn slow(delay: Duration) -> Self {
        Self { open_delay: Some(delay), ..Self::default() }
    }

    pub fn set_mark(&self, price: f64) {
        *self.mark.lock().unwrap() = price;
    }

    pub fn close_count(&self) -> usize {
        self.closes.lock().unwrap().len()
    }

    /// Pretend the exchange holds a position the ledger never saw.
    pub fn inject(&self, position: ExchangePosition) {
        self.positions.lock().unwrap().insert(position.position_ref.clone(), position);
    }
}

#[async_trait]
impl ExecutionGateway for MockGateway {
    async fn open_position(&self, request: &OpenRequest) -> Result<OpenConfirmation> {
        if let Some(d) = self.open_delay {
            tokio::time::sleep(d).await;
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(Error::GatewayRejected("insufficient margin".into()));
        }
        let n = self.opens.fetch_add(1, Ordering::SeqCst);
        let position_ref = ExchangePositionRef(format!("mock-{n}"));
        self.positions.lock().unwrap().insert(
            position_ref.clone(),
            ExchangePosition {
                position_ref: position_ref.clone(),
                symbol: request.symbol.clone(),
                direction: request.direction,
                quantity: request.quantity,
            },
        );
        Ok(OpenConfirmation {
            position_ref,
            fill_price: request.reference_price + self.open_slippage,
            quantity: request.quantity,
            timestamp: Utc::now(),
        })
    }

    async fn close_position(&self, position_ref: &ExchangePositionRef, quantity: f64) -> Result<Fill> {
        self.closes.lock().unwrap().push((position_ref.clone(), quantity));
        let mut positions = self.positions.lock().unwrap();
        if let Some(p) = positions.get_mut(position_ref) {
            p.quantity -= quantity;
            if p.quantity <= 1e-12 {
                positions.remove(position_ref);
            }
        }
        Ok(Fill {
            position_ref: position_ref.clone(),
            fill_price: *self.mark.lock().unwrap(),
            quantity,
            timestamp: Utc::now(),
        })
    }

    async fn account_state(&self) -> Result<Balances> {
        Ok(Balances { equity: 10_000.0, available: 10_000.0 })
    }

    async fn open_positions(&self) -> Result<Vec<ExchangePosition>> {
        Ok(self.positions.lock().unwrap().values().cloned().collect())
    }
}

/// Conservative mode without entry spacing and with a trailing stop far
/// enough away that it never interferes with the ladders.
pub fn risk_config() -> RiskConfig {
    let mut cfg = RiskConfig::default();
    cfg.conservative.min_entry_interval_secs = 0;
    cfg.conservative.trailing.activation_pct = 0.10;
    cfg
}

/// Long at 100, stop 98, targets 102 and 105 releasing half each.
pub fn ladder_signal(symbol: &str, confidence: f64) -> Signal {
    Signal {
        symbol: symbol.into(),
        action: SignalAction::Buy,
        confidence,
        entry_price: 100.0,
        stop_loss: 98.0,
        take_profit_levels: vec![
            TakeProfitLevel { price: 102.0, release_pct: 0.5 },
            TakeProfitLevel { price: 105.0, release_pct: 0.5 },
        ],
        risk_reward_ratio: 2.0,
        position_size_multiplier: 1.0,
        invalidation_price: 98.0,
        rationale: Vec::new(),
        timestamp: Utc::now(),
    }
}

pub async fn journal() -> TradeJournal {
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    engine::journal::migrate(&db).await.unwrap();
    TradeJournal::new(db, common::TradingMode::Paper)
}

pub struct Harness {
    pub gateway: Arc<MockGateway>,
    pub coordinator: Arc<ExecutionCoordinator>,
    pub events: mpsc::Receiver<RiskEvent>,
}

pub fn harness(gateway: MockGateway, timeout: Duration, journal: Option<TradeJournal>) -> Harness {
    harness_with(gateway, risk_config(), timeout, journal)
}

pub fn harness_with(
    gateway: MockGateway,
    config: RiskConfig,
    timeout: Duration,
    journal: Option<TradeJournal>,
) -> Harness {
    let gateway = Arc::new(gateway);
    let (tx, events) = mpsc::channel(256);
    let risk = RiskManager::new(config).unwrap().with_events(tx.clone());
    let mut coordinator = ExecutionCoordinator::new(gateway.clone(), risk, timeout).with_events(tx);
    if let Some(j) = journal {
        coordinator = coordinator.with_journal(j);
    }
    Harness { gateway, coordinator: Arc::new(coordinator), events }
}

pub fn drain(rx: &mut mpsc::Receiver<RiskEvent>) -> Vec<RiskEvent> {
    let mut out = Vec::new();
    while let Ok(e) = rx.try_recv() {
        out.push(e);
    }
    out
}
