use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::info;

use common::{
    Error, ModeKind, PortfolioSnapshot, Position, PositionId, ReservationId, Result, TrailingStop,
};

/// Remaining quantity below this share of the initial quantity counts as flat.
const DUST_RATIO: f64 = 1e-9;

/// Provisional claim on capacity held between admission and execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: ReservationId,
    pub mode: ModeKind,
    pub symbol: String,
    pub risk_fraction: f64,
    pub created_at: DateTime<Utc>,
}

/// Result of applying a close fill to a position.
#[derive(Debug, Clone)]
pub struct FillOutcome {
    pub closed_quantity: f64,
    pub realized_pnl: f64,
    pub remaining: f64,
    /// The removed position when the fill took the quantity to zero.
    pub closed: Option<Position>,
}

/// Single source of truth for open positions and pending reservations.
#[derive(Debug, Clone)]
pub struct PortfolioLedger {
    positions: HashMap<PositionId, Position>,
    reservations: BTreeMap<ReservationId, Reservation>,
    next_reservation: u64,
    realized_pnl: f64,
    max_portfolio_risk: f64,
}

impl PortfolioLedger {
    pub fn new(max_portfolio_risk: f64) -> Self {
        Self {
            positions: HashMap::new(),
            reservations: BTreeMap::new(),
            next_reservation: 1,
            realized_pnl: 0.0,
            max_portfolio_risk,
        }
    }

    pub fn max_portfolio_risk(&self) -> f64 {
        self.max_portfolio_risk
    }

    // ─── Reservations ─────────────────────────────────────────────────────────

    pub fn reserve(
        &mut self,
        mode: ModeKind,
        symbol: &str,
        risk_fraction: f64,
        now: DateTime<Utc>,
    ) -> ReservationId {
        let id = ReservationId(self.next_reservation);
        self.next_reservation += 1;
        self.reservations.insert(
            id,
            Reservation { id, mode, symbol: symbol.to_string(), risk_fraction, created_at: now },
        );
        id
    }

    /// Idempotent: releasing an unknown reservation returns `None`.
    pub fn release(&mut self, id: ReservationId) -> Option<Reservation> {
        self.reservations.remove(&id)
    }

    /// Drop every reservation created before `cutoff`.
    pub fn expire_reservations(&mut self, cutoff: DateTime<Utc>) -> Vec<Reservation> {
        let stale: Vec<ReservationId> = self
            .reservations
            .values()
            .filter(|r| r.created_at < cutoff)
            .map(|r| r.id)
            .collect();
        stale.into_iter().filter_map(|id| self.reservations.remove(&id)).collect()
    }

    pub fn pending_for(&self, mode: ModeKind) -> usize {
        self.reservations.values().filter(|r| r.mode == mode).count()
    }

    pub fn latest_reservation(&self, mode: ModeKind) -> Option<DateTime<Utc>> {
        self.reservations.values().filter(|r| r.mode == mode).map(|r| r.created_at).max()
    }

    // ─── Occupancy ────────────────────────────────────────────────────────────

    /// True if `symbol` has an open position or pending reservation under `mode`.
    pub fn is_occupied(&self, mode: ModeKind, symbol: &str) -> bool {
        self.positions.values().any(|p| p.mode == mode && p.symbol == symbol)
            || self.reservations.values().any(|r| r.mode == mode && r.symbol == symbol)
    }

    /// Open positions plus pending reservations under `mode`.
    pub fn occupancy(&self, mode: ModeKind) -> usize {
        self.positions.values().filter(|p| p.mode == mode).count() + self.pending_for(mode)
    }

    pub fn total_occupancy(&self) -> usize {
        self.positions.len() + self.reservations.len()
    }

    /// Worst-case loss of open positions plus reserved risk, as a fraction of equity.
    pub fn committed_risk(&self) -> f64 {
        let open: f64 = self.positions.values().map(Position::worst_case_loss).sum();
        let reserved: f64 = self.reservations.values().map(|r| r.risk_fraction).sum();
        open + reserved
    }

    pub fn utilization_pct(&self, committed: f64) -> f64 {
        if self.max_portfolio_risk <= 0.0 {
            return 100.0;
        }
        committed / self.max_portfolio_risk * 100.0
    }

    // ─── Positions ────────────────────────────────────────────────────────────

    pub fn insert(&mut self, position: Position) -> Result<()> {
        if self.positions.contains_key(&position.id) {
            return Err(Error::ReconciliationConflict(format!(
                "position {} already tracked",
                position.id
            )));
        }
        if let Some(existing) = self
            .positions
            .values()
            .find(|p| p.mode == position.mode && p.symbol == position.symbol)
        {
            return Err(Error::ReconciliationConflict(format!(
                "{} already open under {} as {}",
                position.symbol, position.mode, existing.id
            )));
        }
        info!(
            id = %position.id,
            symbol = %position.symbol,
            mode = %position.mode,
            direction = %position.direction,
            quantity = position.quantity,
            entry = position.entry_price,
            "Position tracked"
        );
        self.positions.insert(position.id.clone(), position);
        Ok(())
    }

    pub fn get(&self, id: &PositionId) -> Option<&Position> {
        self.positions.get(id)
    }

    /// Commit per-tick tracking state. Does not touch quantity or targets.
    pub fn commit_tracking(
        &mut self,
        id: &PositionId,
        last_price: f64,
        max_profit_seen: f64,
        trailing_stop: Option<TrailingStop>,
    ) -> Result<()> {
        let position = self
            .positions
            .get_mut(id)
            .ok_or_else(|| Error::UnknownPosition(id.to_string()))?;
        position.last_price = last_price;
        position.max_profit_seen = position.max_profit_seen.max(max_profit_seen);
        position.trailing_stop = trailing_stop;
        Ok(())
    }

    /// Apply a confirmed close fill. `target` marks the profit target the fill
    /// satisfies. A position reaching zero is removed and its PnL folds into
    /// the realized accumulator.
    pub fn apply_fill(
        &mut self,
        id: &PositionId,
        quantity: f64,
        fill_price: f64,
        target: Option<usize>,
    ) -> Result<FillOutcome> {
        let position = self
            .positions
            .get_mut(id)
            .ok_or_else(|| Error::UnknownPosition(id.to_string()))?;
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(Error::ReconciliationConflict(format!(
                "fill of {quantity} for position {id}"
            )));
        }
        if quantity > position.quantity * (1.0 + 1e-9) {
            return Err(Error::ReconciliationConflict(format!(
                "fill of {quantity} exceeds remaining {} on {id}",
                position.quantity
            )));
        }

        let closed_quantity = quantity.min(position.quantity);
        let pnl = position.direction.sign() * (fill_price - position.entry_price) * closed_quantity;
        position.quantity -= closed_quantity;
        position.realized_pnl += pnl;
        position.last_price = fill_price;
        if let Some(index) = target {
            position.consumed_targets.insert(index);
        }
        self.realized_pnl += pnl;

        let remaining = position.quantity;
        let closed = if remaining <= position.initial_quantity * DUST_RATIO {
            self.positions.remove(id)
        } else {
            None
        };

        Ok(FillOutcome {
            closed_quantity,
            realized_pnl: pnl,
            remaining: if closed.is_some() { 0.0 } else { remaining },
            closed,
        })
    }

    /// Drop a position without touching the realized accumulator.
    pub fn remove(&mut self, id: &PositionId) -> Option<Position> {
        self.positions.remove(id)
    }

    /// Open positions ordered by entry time.
    pub fn list_open_positions(&self) -> Vec<Position> {
        let mut list: Vec<Position> = self.positions.values().cloned().collect();
        list.sort_by(|a, b| a.entry_time.cmp(&b.entry_time).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn snapshot(&self) -> PortfolioSnapshot {
        let committed = self.committed_risk();
        PortfolioSnapshot {
            total_positions: self.positions.len(),
            active_symbols: self.positions.values().map(|p| p.symbol.clone()).collect(),
            total_unrealized_pnl: self.positions.values().map(Position::unrealized_pnl).sum(),
            total_realized_pnl: self.realized_pnl,
            committed_risk: committed,
            risk_ceiling: self.max_portfolio_risk,
            risk_utilization_pct: self.utilization_pct(committed),
            pending_reservations: self.reservations.len(),
        }
    }

    /// Forget every tracked position and the realized accumulator. In-flight
    /// reservations stay so their executions can still settle.
    pub fn reset(&mut self) -> usize {
        let dropped = self.positions.len();
        self.positions.clear();
        self.realized_pnl = 0.0;
        dropped
    }
}
