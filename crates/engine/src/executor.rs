use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use common::{
    Balances, CloseReason, Decision, Error, ExecutionGateway, LifecycleEvent, MarketEvent,
    OpenRequest, Position, PositionId, ProtectiveLevels, RejectionReason, ReservationId, Result,
    RiskEvent,
};
use risk::{close_quantity, PriceTick, RiskManager};

use crate::journal::TradeJournal;
use crate::reconcile::{self, ReconcileReport};

/// What happened to one decision handed to `execute`.
#[derive(Debug)]
pub enum ExecutionResult {
    Opened(Position),
    /// Admission refused it; the gateway was never called.
    Rejected(RejectionReason),
    /// The gateway call failed or timed out and the reservation was released.
    Failed { symbol: String, error: Error },
}

impl ExecutionResult {
    pub fn is_opened(&self) -> bool {
        matches!(self, ExecutionResult::Opened(_))
    }
}

/// Releases an admission's reservation unless the open was settled. Covers
/// the execute future being dropped mid-call, e.g. when its worker is aborted.
struct ReservationGuard {
    risk: RiskManager,
    reservation: Option<ReservationId>,
}

impl ReservationGuard {
    fn new(risk: &RiskManager, reservation: ReservationId) -> Self {
        Self { risk: risk.clone(), reservation: Some(reservation) }
    }

    fn disarm(&mut self) {
        self.reservation = None;
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        let Some(reservation) = self.reservation.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let risk = self.risk.clone();
                handle.spawn(async move {
                    risk.release(reservation).await;
                });
            }
            Err(_) => warn!(%reservation, "No runtime to release an abandoned reservation"),
        }
    }
}

/// Bridges admitted decisions and lifecycle close events to the gateway.
///
/// This is the ONLY component that calls the mutating `ExecutionGateway`
/// methods. Every gateway call carries a timeout; a failed open releases the
/// provisional reservation taken at admission.
pub struct ExecutionCoordinator {
    gateway: Arc<dyn ExecutionGateway>,
    risk: RiskManager,
    journal: Option<TradeJournal>,
    risk_event_tx: Option<mpsc::Sender<RiskEvent>>,
    timeout: Duration,
    /// Serializes price-update processing per position.
    position_locks: Mutex<HashMap<PositionId, Arc<Mutex<()>>>>,
}

impl ExecutionCoordinator {
    pub fn new(gateway: Arc<dyn ExecutionGateway>, risk: RiskManager, timeout: Duration) -> Self {
        Self {
            gateway,
            risk,
            journal: None,
            risk_event_tx: None,
            timeout,
            position_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_journal(mut self, journal: TradeJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_events(mut self, tx: mpsc::Sender<RiskEvent>) -> Self {
        self.risk_event_tx = Some(tx);
        self
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    // ─── Opening ──────────────────────────────────────────────────────────────

    /// Execute one admission decision with exactly one open call. A slipped
    /// fill that no longer fits the risk ceiling is trimmed straight after.
    pub async fn execute(&self, decision: Decision) -> ExecutionResult {
        let admission = match decision {
            Decision::Admitted(a) => a,
            Decision::Rejected(reason) => return ExecutionResult::Rejected(reason),
        };
        let signal = &admission.signal;
        let request = OpenRequest {
            symbol: signal.symbol.clone(),
            direction: admission.direction,
            quantity: admission.quantity,
            reference_price: signal.entry_price,
            protective: ProtectiveLevels {
                stop_loss: signal.stop_loss,
                take_profits: admission.profit_targets.iter().map(|t| t.price).collect(),
            },
        };
        info!(
            symbol = %request.symbol,
            mode = %admission.mode,
            direction = %request.direction,
            qty = request.quantity,
            "Opening position"
        );

        let mut guard = ReservationGuard::new(&self.risk, admission.reservation);
        let confirmation = match self
            .call("open_position", self.gateway.open_position(&request))
            .await
        {
            Ok(c) => c,
            Err(e) => {
                error!(symbol = %request.symbol, error = %e, "Open failed");
                guard.disarm();
                self.risk.release(admission.reservation).await;
                self.emit(RiskEvent::ExecutionFailed {
                    symbol: request.symbol.clone(),
                    error: e.to_string(),
                });
                return ExecutionResult::Failed { symbol: request.symbol, error: e };
            }
        };

        let settled = self.risk.confirm_open(&admission, &confirmation).await;
        guard.disarm();
        let outcome = match settled {
            Ok(o) => o,
            Err(e) => {
                error!(
                    symbol = %request.symbol,
                    position_ref = %confirmation.position_ref,
                    error = %e,
                    "Exchange opened a position the ledger could not record"
                );
                self.emit(RiskEvent::ReconciliationConflict { detail: e.to_string() });
                return ExecutionResult::Failed { symbol: request.symbol, error: e };
            }
        };

        let position = outcome.position;
        info!(
            id = %position.id,
            symbol = %position.symbol,
            mode = %position.mode,
            price = position.entry_price,
            qty = position.quantity,
            "Position opened"
        );
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_open(&position).await {
                error!("Failed to journal opened trade: {e}");
            }
        }
        self.emit(RiskEvent::PositionOpened {
            id: position.id.clone(),
            symbol: position.symbol.clone(),
            mode: position.mode,
            direction: position.direction,
            quantity: position.quantity,
            price: position.entry_price,
        });

        let position = if outcome.excess_quantity > 0.0 {
            self.trim(position, outcome.excess_quantity).await
        } else {
            position
        };

        if let Some(advisory) = outcome.advisory {
            warn!(error = %advisory, "Counter drift after open, reconciling");
            if let Err(e) = self.reconcile().await {
                error!(error = %e, "Reconciliation after counter drift failed");
            }
        }
        ExecutionResult::Opened(position)
    }

    /// Close the part of a fresh position that does not fit under the risk
    /// ceiling. Returns the position as tracked afterwards.
    async fn trim(&self, position: Position, excess: f64) -> Position {
        let lock = self.position_lock(&position.id).await;
        let _serialized = lock.lock().await;

        let settled = self
            .settle_close(&position, excess, None, CloseReason::RiskCeiling)
            .await;
        match settled {
            Ok(true) => {
                self.position_locks.lock().await.remove(&position.id);
                position
            }
            Ok(false) => self.risk.position(&position.id).await.unwrap_or(position),
            Err(e) => {
                error!(id = %position.id, error = %e, "Position left above the risk ceiling");
                position
            }
        }
    }

    // ─── Lifecycle ────────────────────────────────────────────────────────────

    /// Evaluate a price update for one position and execute any resulting
    /// closes, in order, stopping once the position is gone.
    pub async fn on_price_update(
        &self,
        id: &PositionId,
        tick: PriceTick,
    ) -> Result<Vec<LifecycleEvent>> {
        let lock = self.position_lock(id).await;
        let _serialized = lock.lock().await;

        let events = self.risk.on_price_update(id, tick).await?;
        for event in events.iter().filter(|e| e.needs_execution()) {
            let Some(position) = self.risk.position(id).await else {
                break;
            };
            if self.close(&position, event).await? {
                break;
            }
        }

        if self.risk.position(id).await.is_none() {
            self.position_locks.lock().await.remove(id);
        }
        Ok(events)
    }

    /// Route a market event to every open position on its symbol. Positions are
    /// processed concurrently; each one is serialized by its own lock.
    pub async fn on_market_event(&self, event: &MarketEvent) {
        if !(event.price.is_finite() && event.price > 0.0) {
            return;
        }
        let tick = PriceTick {
            price: event.price,
            at: event.timestamp,
            volatility: Some((event.high - event.low).abs() / event.price),
        };
        let ids: Vec<PositionId> = self
            .risk
            .list_open_positions()
            .await
            .into_iter()
            .filter(|p| p.symbol == event.symbol)
            .map(|p| p.id)
            .collect();

        let results = join_all(ids.iter().map(|id| self.on_price_update(id, tick))).await;
        for (id, res) in ids.iter().zip(results) {
            match res {
                Ok(_) | Err(Error::UnknownPosition(_)) => {}
                Err(e) => warn!(id = %id, symbol = %event.symbol, error = %e, "Price update failed"),
            }
        }
    }

    /// Returns true when the position was fully closed.
    async fn close(&self, position: &Position, event: &LifecycleEvent) -> Result<bool> {
        let Some(quantity) = close_quantity(position, event).filter(|q| *q > 0.0) else {
            return Ok(false);
        };
        let (target, reason) = match event {
            LifecycleEvent::PartialClose { target_index, .. } => {
                (Some(*target_index), CloseReason::ProfitLadder)
            }
            LifecycleEvent::FullClose { reason, .. } => (None, reason.clone()),
            _ => return Ok(false),
        };
        self.settle_close(position, quantity, target, reason).await
    }

    /// Close `quantity` at the gateway and apply the fill. `reason` is used
    /// when the fill takes the position to zero. Returns true in that case.
    async fn settle_close(
        &self,
        position: &Position,
        quantity: f64,
        target: Option<usize>,
        reason: CloseReason,
    ) -> Result<bool> {
        let fill = match self
            .call("close_position", self.gateway.close_position(&position.exchange_ref, quantity))
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(id = %position.id, symbol = %position.symbol, error = %e, "Close failed");
                self.emit(RiskEvent::ExecutionFailed {
                    symbol: position.symbol.clone(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let outcome = match self.risk.apply_close_fill(&position.id, &fill, target).await {
            Ok(o) => o,
            Err(e) => {
                error!(id = %position.id, error = %e, "Close fill does not match the ledger");
                self.emit(RiskEvent::ReconciliationConflict { detail: e.to_string() });
                return Err(e);
            }
        };

        let reason = outcome.closed.as_ref().map(|_| reason);
        if let Some(journal) = &self.journal {
            if let Err(e) = journal
                .record_fill(
                    &position.id,
                    outcome.remaining,
                    fill.fill_price,
                    outcome.realized_pnl,
                    fill.timestamp,
                    reason.as_ref(),
                )
                .await
            {
                error!("Failed to journal close fill: {e}");
            }
        }

        match (reason, outcome.closed) {
            (Some(reason), Some(closed)) => {
                info!(
                    id = %closed.id,
                    symbol = %closed.symbol,
                    reason = %reason,
                    pnl = closed.realized_pnl,
                    "Position closed"
                );
                self.emit(RiskEvent::PositionClosed {
                    id: closed.id,
                    symbol: closed.symbol,
                    reason,
                    realized_pnl: closed.realized_pnl,
                });
                Ok(true)
            }
            _ => {
                info!(
                    id = %position.id,
                    symbol = %position.symbol,
                    closed = outcome.closed_quantity,
                    remaining = outcome.remaining,
                    "Position reduced"
                );
                self.emit(RiskEvent::PositionReduced {
                    id: position.id.clone(),
                    symbol: position.symbol.clone(),
                    closed_quantity: outcome.closed_quantity,
                    remaining: outcome.remaining,
                    realized_pnl: outcome.realized_pnl,
                });
                Ok(false)
            }
        }
    }

    // ─── Account ──────────────────────────────────────────────────────────────

    /// Pull balances from the gateway and update the sizing equity.
    pub async fn refresh_equity(&self) -> Result<Balances> {
        let balances = self.call("account_state", self.gateway.account_state()).await?;
        self.risk.set_equity(balances.equity).await;
        debug!(equity = balances.equity, available = balances.available, "Equity refreshed");
        Ok(balances)
    }

    /// Compare the ledger against the exchange and publish every discrepancy.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let held = self.call("open_positions", self.gateway.open_positions()).await?;
        let ledger = self.risk.list_open_positions().await;
        let report = reconcile::diff(&ledger, &held);

        if report.is_clean() {
            info!(positions = report.ledger_positions, "Reconciliation clean");
        }
        for d in &report.discrepancies {
            error!(detail = %d, "Reconciliation conflict");
            self.emit(RiskEvent::ReconciliationConflict { detail: d.to_string() });
        }
        Ok(report)
    }

    /// Release reservations whose execution must already have finished or been
    /// dropped: anything older than twice the gateway timeout.
    pub async fn expire_stale_reservations(&self) -> usize {
        let max_age = chrono::Duration::milliseconds((self.timeout.as_millis() as i64).saturating_mul(2));
        self.risk.expire_reservations(max_age, Utc::now()).await
    }

    /// Drop the ledger's view of all positions. The exchange is not touched.
    pub async fn reset_portfolio(&self) -> usize {
        let dropped = self.risk.reset_portfolio().await;
        self.position_locks.lock().await.clear();
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.abandon_open(Utc::now()).await {
                error!("Failed to mark journaled trades abandoned: {e}");
            }
        }
        dropped
    }

    // ─── Helpers ──────────────────────────────────────────────────────────────

    async fn call<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(Error::GatewayTimeout {
                operation: operation.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    async fn position_lock(&self, id: &PositionId) -> Arc<Mutex<()>> {
        self.position_locks
            .lock()
            .await
            .entry(id.clone())
            .or_default()
            .clone()
    }

    /// Never waits on a slow consumer; a full channel drops the event.
    fn emit(&self, event: RiskEvent) {
        if let Some(tx) = &self.risk_event_tx {
            if let Err(e) = tx.try_send(event) {
                debug!(error = %e, "Risk event dropped");
            }
        }
    }
}
