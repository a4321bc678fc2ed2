use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use common::{
    Admission, Decision, Error, Fill, LifecycleEvent, ModeKind, OpenConfirmation, PortfolioSnapshot,
    Position, PositionId, ReservationId, Result, RiskEvent, Signal,
};

use crate::admission::{AdmissionController, PortfolioLimits, RISK_EPSILON};
use crate::config::RiskConfig;
use crate::ledger::{FillOutcome, PortfolioLedger};
use crate::lifecycle::{self, PriceTick};
use crate::modes::{Mode, ModeConfig, ModeRegistry};

/// Everything admission and settlement mutate. Only reachable through the lock.
struct Book {
    modes: ModeRegistry,
    ledger: PortfolioLedger,
    admission: AdmissionController,
    /// Account equity used to size new positions.
    equity: f64,
}

/// Result of settling an opening fill.
#[derive(Debug)]
pub struct OpenOutcome {
    pub position: Position,
    /// Set when the daily counter was already at its cap. The position is
    /// tracked regardless; the caller should schedule a reconciliation.
    pub advisory: Option<Error>,
    /// Quantity to close straight away because the fill landed further from
    /// the stops than admission priced in and the position no longer fits
    /// under the risk ceiling. Zero when it fits.
    pub excess_quantity: f64,
}

/// The gatekeeper between signal evaluation and the execution coordinator.
///
/// Cloneable handle around a single `tokio::sync::Mutex`. Every check,
/// reservation, insertion and PnL accrual takes this lock, and no guard is
/// ever held across an `.await`.
#[derive(Clone)]
pub struct RiskManager {
    book: Arc<Mutex<Book>>,
    risk_event_tx: Option<mpsc::Sender<RiskEvent>>,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Result<Self> {
        Self::new_at(config, Utc::now())
    }

    pub fn new_at(config: RiskConfig, now: DateTime<Utc>) -> Result<Self> {
        let modes = ModeRegistry::new(
            config.conservative,
            config.scalping,
            config.daily_reset_hour_utc,
            now,
        )?;
        let book = Book {
            modes,
            ledger: PortfolioLedger::new(config.max_portfolio_risk),
            admission: AdmissionController::new(PortfolioLimits {
                max_open_positions: config.max_open_positions,
            }),
            equity: config.initial_equity,
        };
        Ok(Self { book: Arc::new(Mutex::new(book)), risk_event_tx: None })
    }

    /// Publish admission rejections on `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<RiskEvent>) -> Self {
        self.risk_event_tx = Some(tx);
        self
    }

    // ─── Admission ────────────────────────────────────────────────────────────

    pub async fn try_admit(&self, signal: &Signal, mode: ModeKind) -> Result<Decision> {
        self.try_admit_at(signal, mode, Utc::now()).await
    }

    pub async fn try_admit_at(
        &self,
        signal: &Signal,
        mode: ModeKind,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let decision = {
            let mut guard = self.book.lock().await;
            let book = &mut *guard;
            let equity = book.equity;
            book.admission
                .try_admit(&mut book.modes, &mut book.ledger, signal, mode, equity, now)?
        };

        match &decision {
            Decision::Admitted(a) => info!(
                symbol = %signal.symbol,
                mode = %mode,
                action = %signal.action,
                confidence = signal.confidence,
                quantity = a.quantity,
                risk = a.risk_fraction,
                "Signal admitted"
            ),
            Decision::Rejected(reason) => {
                warn!(symbol = %signal.symbol, mode = %mode, reason = %reason, "Signal rejected");
                if let Some(tx) = &self.risk_event_tx {
                    if let Err(e) = tx.try_send(RiskEvent::AdmissionRejected {
                        symbol: signal.symbol.clone(),
                        mode,
                        reason: reason.clone(),
                    }) {
                        debug!(error = %e, "Risk event dropped");
                    }
                }
            }
        }
        Ok(decision)
    }

    /// Release a provisional reservation. Safe to call more than once.
    pub async fn release(&self, reservation: ReservationId) -> bool {
        let released = self.book.lock().await.ledger.release(reservation);
        if let Some(r) = &released {
            warn!(%reservation, symbol = %r.symbol, mode = %r.mode, "Reservation released");
        }
        released.is_some()
    }

    // ─── Settlement ───────────────────────────────────────────────────────────

    /// Turn a confirmed open into a tracked position, consuming the reservation.
    pub async fn confirm_open(
        &self,
        admission: &Admission,
        confirmation: &OpenConfirmation,
    ) -> Result<OpenOutcome> {
        let mut book = self.book.lock().await;
        if book.ledger.release(admission.reservation).is_none() {
            return Err(Error::ReconciliationConflict(format!(
                "open confirmed for {} but reservation {} is not pending",
                admission.signal.symbol, admission.reservation
            )));
        }

        let position = Position {
            id: PositionId::new(),
            symbol: admission.signal.symbol.clone(),
            direction: admission.direction,
            entry_price: confirmation.fill_price,
            initial_quantity: confirmation.quantity,
            quantity: confirmation.quantity,
            mode: admission.mode,
            confidence: admission.signal.confidence,
            entry_time: confirmation.timestamp,
            exchange_ref: confirmation.position_ref.clone(),
            notional_fraction: admission.notional_fraction,
            profit_targets: admission.profit_targets.clone(),
            consumed_targets: BTreeSet::new(),
            stop_levels: admission.stop_levels.clone(),
            trailing_policy: admission.trailing_policy,
            trailing_stop: None,
            max_profit_seen: 0.0,
            last_price: confirmation.fill_price,
            realized_pnl: 0.0,
        };
        let excess_quantity = excess_over_ceiling(&book.ledger, &position);
        if excess_quantity > 0.0 {
            warn!(
                symbol = %position.symbol,
                fill = confirmation.fill_price,
                reference = admission.signal.entry_price,
                excess = excess_quantity,
                "Fill widened the stop distance past the risk ceiling"
            );
        }
        book.ledger.insert(position.clone())?;

        let advisory = book
            .modes
            .record_daily_trade(admission.mode, confirmation.timestamp)
            .err();
        if let Some(e) = &advisory {
            warn!(symbol = %position.symbol, error = %e, "Daily counter already at cap after fill");
        }
        Ok(OpenOutcome { position, advisory, excess_quantity })
    }

    /// Evaluate one price update for a position and commit its tracking state.
    /// Returned close events still need execution and `apply_close_fill`.
    pub async fn on_price_update(
        &self,
        id: &PositionId,
        tick: PriceTick,
    ) -> Result<Vec<LifecycleEvent>> {
        let mut book = self.book.lock().await;
        let position = book
            .ledger
            .get(id)
            .ok_or_else(|| Error::UnknownPosition(id.to_string()))?;
        let outcome = lifecycle::evaluate(position, &tick);
        book.ledger
            .commit_tracking(id, tick.price, outcome.max_profit_seen, outcome.trailing_stop)?;
        Ok(outcome.events)
    }

    pub async fn apply_close_fill(
        &self,
        id: &PositionId,
        fill: &Fill,
        target: Option<usize>,
    ) -> Result<FillOutcome> {
        let mut book = self.book.lock().await;
        let position = book
            .ledger
            .get(id)
            .ok_or_else(|| Error::UnknownPosition(id.to_string()))?;
        if position.exchange_ref != fill.position_ref {
            return Err(Error::ReconciliationConflict(format!(
                "fill for {} applied to position {id} held as {}",
                fill.position_ref, position.exchange_ref
            )));
        }
        book.ledger.apply_fill(id, fill.quantity, fill.fill_price, target)
    }

    // ─── Queries ──────────────────────────────────────────────────────────────

    pub async fn position(&self, id: &PositionId) -> Option<Position> {
        self.book.lock().await.ledger.get(id).cloned()
    }

    pub async fn list_open_positions(&self) -> Vec<Position> {
        self.book.lock().await.ledger.list_open_positions()
    }

    pub async fn snapshot(&self) -> PortfolioSnapshot {
        self.book.lock().await.ledger.snapshot()
    }

    /// Release reservations older than `max_age`. Their executions can no
    /// longer be in flight once every gateway call has timed out.
    pub async fn expire_reservations(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> usize {
        let expired = self.book.lock().await.ledger.expire_reservations(now - max_age);
        for r in &expired {
            warn!(reservation = %r.id, symbol = %r.symbol, mode = %r.mode, "Stale reservation expired");
        }
        expired.len()
    }

    /// Discard the ledger's view of every position. No exchange calls.
    pub async fn reset_portfolio(&self) -> usize {
        let dropped = self.book.lock().await.ledger.reset();
        warn!(dropped, "Portfolio reset; exchange positions untouched");
        dropped
    }

    // ─── Modes ────────────────────────────────────────────────────────────────

    pub async fn get_mode(&self, kind: ModeKind) -> Mode {
        self.book.lock().await.modes.get_mode(kind).clone()
    }

    pub async fn modes(&self) -> Vec<Mode> {
        self.book.lock().await.modes.modes().into_iter().cloned().collect()
    }

    /// Takes effect for the next admission. Open positions keep being managed.
    pub async fn set_mode_enabled(&self, kind: ModeKind, enabled: bool) -> bool {
        self.book.lock().await.modes.set_enabled(kind, enabled)
    }

    pub async fn configure_mode(&self, kind: ModeKind, config: ModeConfig) -> Result<()> {
        self.book.lock().await.modes.configure(kind, config)
    }

    pub async fn reset_daily_counters(&self, as_of: DateTime<Utc>) {
        self.book.lock().await.modes.reset_daily_counters(as_of);
    }

    /// Roll the daily counters if a reset boundary has passed.
    pub async fn roll_day(&self, now: DateTime<Utc>) -> bool {
        self.book.lock().await.modes.roll_day(now)
    }

    // ─── Equity ───────────────────────────────────────────────────────────────

    pub async fn equity(&self) -> f64 {
        self.book.lock().await.equity
    }

    pub async fn set_equity(&self, equity: f64) {
        if !(equity.is_finite() && equity >= 0.0) {
            warn!(equity, "Ignoring invalid equity update");
            return;
        }
        self.book.lock().await.equity = equity;
    }
}

/// Quantity that must come off `position` for the ledger to stay within its
/// risk ceiling. Expects the position's own reservation already released.
fn excess_over_ceiling(ledger: &PortfolioLedger, position: &Position) -> f64 {
    let worst = position.worst_case_loss();
    let headroom = (ledger.max_portfolio_risk() - ledger.committed_risk()).max(0.0);
    if worst <= headroom + RISK_EPSILON {
        return 0.0;
    }
    let keep = (headroom / worst).clamp(0.0, 1.0);
    position.quantity * (1.0 - keep)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
