//! Ledger vs exchange position comparison.
//!
//! Discrepancies are reported, never resolved: an operator decides whether the
//! ledger or the exchange is right.

use std::collections::HashMap;
use std::fmt;

use common::{Direction, ExchangePosition, ExchangePositionRef, Position, PositionId};

/// Relative quantity difference tolerated before a mismatch is reported.
const QUANTITY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub enum Discrepancy {
    /// Tracked by the ledger, absent on the exchange.
    MissingOnExchange { id: PositionId, symbol: String, position_ref: ExchangePositionRef },
    /// Held by the exchange, unknown to the ledger.
    UntrackedOnExchange { position_ref: ExchangePositionRef, symbol: String, quantity: f64 },
    QuantityMismatch { id: PositionId, symbol: String, ledger: f64, exchange: f64 },
    DirectionMismatch { id: PositionId, symbol: String, ledger: Direction, exchange: Direction },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::MissingOnExchange { id, symbol, position_ref } => {
                write!(f, "{symbol} position {id} ({position_ref}) not found on exchange")
            }
            Discrepancy::UntrackedOnExchange { position_ref, symbol, quantity } => {
                write!(f, "exchange holds {quantity} {symbol} as {position_ref} with no ledger entry")
            }
            Discrepancy::QuantityMismatch { id, symbol, ledger, exchange } => {
                write!(f, "{symbol} position {id}: ledger quantity {ledger}, exchange {exchange}")
            }
            Discrepancy::DirectionMismatch { id, symbol, ledger, exchange } => {
                write!(f, "{symbol} position {id}: ledger {ledger}, exchange {exchange}")
            }
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub ledger_positions: usize,
    pub exchange_positions: usize,
    pub discrepancies: Vec<Discrepancy>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

pub fn diff(ledger: &[Position], exchange: &[ExchangePosition]) -> ReconcileReport {
    let mut remote: HashMap<&ExchangePositionRef, &ExchangePosition> =
        exchange.iter().map(|p| (&p.position_ref, p)).collect();
    let mut discrepancies = Vec::new();

    for pos in ledger {
        let Some(held) = remote.remove(&pos.exchange_ref) else {
            discrepancies.push(Discrepancy::MissingOnExchange {
                id: pos.id.clone(),
                symbol: pos.symbol.clone(),
                position_ref: pos.exchange_ref.clone(),
            });
            continue;
        };
        if held.direction != pos.direction {
            discrepancies.push(Discrepancy::DirectionMismatch {
                id: pos.id.clone(),
                symbol: pos.symbol.clone(),
                ledger: pos.direction,
                exchange: held.direction,
            });
        }
        let scale = pos.quantity.abs().max(held.quantity.abs()).max(f64::MIN_POSITIVE);
        if (pos.quantity - held.quantity).abs() / scale > QUANTITY_TOLERANCE {
            discrepancies.push(Discrepancy::QuantityMismatch {
                id: pos.id.clone(),
                symbol: pos.symbol.clone(),
                ledger: pos.quantity,
                exchange: held.quantity,
            });
        }
    }

    let mut untracked: Vec<&ExchangePosition> = remote.into_values().collect();
    untracked.sort_by(|a, b| a.position_ref.0.cmp(&b.position_ref.0));
    discrepancies.extend(untracked.into_iter().map(|p| Discrepancy::UntrackedOnExchange {
        position_ref: p.position_ref.clone(),
        symbol: p.symbol.clone(),
        quantity: p.quantity,
    }));

    ReconcileReport {
        ledger_positions: ledger.len(),
        exchange_positions: exchange.len(),
        discrepancies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{ModeKind, TrailingPolicy};
    use std::collections::BTreeSet;

    fn ledger_pos(r: &str, qty: f64) -> Position {
        Position {
            id: PositionId::new(),
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            entry_price: 100.0,
            initial_quantity: qty,
            quantity: qty,
            mode: ModeKind::Scalping,
            confidence: 0.6,
            entry_time: Utc::now(),
            exchange_ref: ExchangePositionRef(r.into()),
            notional_fraction: 0.05,
            profit_targets: Vec::new(),
            consumed_targets: BTreeSet::new(),
            stop_levels: Vec::new(),
            trailing_policy: TrailingPolicy { activation_pct: 0.0015, distance_pct: 0.0008 },
            trailing_stop: None,
            max_profit_seen: 0.0,
            last_price: 100.0,
            realized_pnl: 0.0,
        }
    }

    fn held(r: &str, qty: f64) -> ExchangePosition {
        ExchangePosition {
            position_ref: ExchangePositionRef(r.into()),
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            quantity: qty,
        }
    }

    #[test]
    fn matching_books_are_clean() {
        let report = diff(&[ledger_pos("a", 1.0)], &[held("a", 1.0)]);
        assert!(report.is_clean());
        assert_eq!(report.ledger_positions, 1);
    }

    #[test]
    fn every_kind_of_drift_is_reported() {
        let mut short = held("c", 2.0);
        short.direction = Direction::Short;
        let report = diff(
            &[ledger_pos("a", 1.0), ledger_pos("b", 1.0), ledger_pos("c", 2.0)],
            &[held("b", 0.5), short, held("z", 3.0)],
        );
        assert!(matches!(report.discrepancies[0], Discrepancy::MissingOnExchange { .. }));
        assert!(matches!(report.discrepancies[1], Discrepancy::QuantityMismatch { .. }));
        assert!(matches!(report.discrepancies[2], Discrepancy::DirectionMismatch { .. }));
        assert!(matches!(report.discrepancies[3], Discrepancy::UntrackedOnExchange { .. }));
        assert_eq!(report.discrepancies.len(), 4);
    }

    #[test]
    fn rounding_noise_is_not_a_mismatch() {
        let report = diff(&[ledger_pos("a", 0.3)], &[held("a", 0.1 + 0.2)]);
        assert!(report.is_clean());
    }
}
