use chrono::{DateTime, Utc};
use tracing::debug;

use common::{
    protective_distance, Admission, Decision, Direction, ModeKind, ProfitTarget, RejectionReason,
    Result, Signal, StopLevel, StopPrice, StopTrigger, TargetTrigger,
};

use crate::ledger::PortfolioLedger;
use crate::modes::{ModeConfig, ModeRegistry};

/// Hard ceiling on simultaneous open positions across all modes. Compiled-in,
/// not user-configurable, as a last-resort safeguard against runaway trading.
pub const MAX_OPEN_POSITIONS: usize = 50;

/// Projected utilization is compared with this much slack to absorb float noise.
pub(crate) const RISK_EPSILON: f64 = 1e-12;

/// Portfolio-wide limits applied to every admission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortfolioLimits {
    pub max_open_positions: usize,
}

impl PortfolioLimits {
    pub fn effective_max_positions(&self) -> usize {
        self.max_open_positions.min(MAX_OPEN_POSITIONS)
    }
}

/// Decides whether a signal may open a position under a mode.
///
/// Synchronous by construction: the caller holds the book lock for the whole
/// check-and-reserve, so concurrent admissions can never both pass a cap.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    limits: PortfolioLimits,
}

impl AdmissionController {
    pub fn new(limits: PortfolioLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> PortfolioLimits {
        self.limits
    }

    /// Check every cap in order and, if all pass, reserve capacity.
    ///
    /// `Err` only for a malformed signal. Capacity refusals are `Decision::Rejected`.
    pub fn try_admit(
        &self,
        modes: &mut ModeRegistry,
        ledger: &mut PortfolioLedger,
        signal: &Signal,
        mode_kind: ModeKind,
        equity: f64,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let Some(direction) = signal.direction() else {
            return Ok(Decision::Rejected(RejectionReason::NotActionable));
        };
        signal.validate()?;
        modes.roll_day(now);

        let mode = modes.get_mode(mode_kind);
        let cfg = &mode.config;

        if !cfg.enabled {
            return Ok(reject(RejectionReason::ModeDisabled { mode: mode_kind }));
        }
        if !cfg.is_eligible(&signal.symbol) {
            return Ok(reject(RejectionReason::SymbolNotEligible {
                mode: mode_kind,
                symbol: signal.symbol.clone(),
            }));
        }
        if signal.confidence < cfg.confidence_threshold {
            return Ok(reject(RejectionReason::ConfidenceBelowThreshold {
                confidence: signal.confidence,
                threshold: cfg.confidence_threshold,
            }));
        }
        if ledger.is_occupied(mode_kind, &signal.symbol) {
            return Ok(reject(RejectionReason::SymbolAlreadyOpen {
                mode: mode_kind,
                symbol: signal.symbol.clone(),
            }));
        }
        let open = ledger.occupancy(mode_kind);
        if open >= cfg.max_concurrent_positions {
            return Ok(reject(RejectionReason::MaxConcurrentPositions {
                mode: mode_kind,
                open,
                limit: cfg.max_concurrent_positions,
            }));
        }
        let count = mode.daily_trade_count + ledger.pending_for(mode_kind) as u32;
        if count >= cfg.max_daily_trades {
            return Ok(reject(RejectionReason::MaxDailyTrades {
                mode: mode_kind,
                count,
                limit: cfg.max_daily_trades,
            }));
        }
        let last_entry = mode.last_entry.max(ledger.latest_reservation(mode_kind));
        if let Some(last) = last_entry {
            let elapsed = (now - last).num_seconds();
            if elapsed < cfg.min_entry_interval_secs {
                return Ok(reject(RejectionReason::EntryCooldown {
                    mode: mode_kind,
                    remaining_secs: cfg.min_entry_interval_secs - elapsed,
                }));
            }
        }
        let total = ledger.total_occupancy();
        let ceiling = self.limits.effective_max_positions();
        if total >= ceiling {
            return Ok(reject(RejectionReason::PortfolioPositionCeiling { open: total, limit: ceiling }));
        }

        let stop_levels = build_stop_ladder(signal, direction, cfg);
        let profit_targets = build_profit_ladder(signal);
        let notional_fraction = signal.position_size_multiplier * cfg.position_size_pct;
        let risk_fraction =
            notional_fraction * protective_distance(direction, signal.entry_price, &stop_levels, None);

        let committed = ledger.committed_risk();
        let projected = committed + risk_fraction;
        if projected > ledger.max_portfolio_risk() + RISK_EPSILON {
            return Ok(reject(RejectionReason::RiskCeilingExceeded {
                utilization_pct: ledger.utilization_pct(committed),
                projected_pct: ledger.utilization_pct(projected),
            }));
        }

        let quantity = equity * notional_fraction / signal.entry_price;
        if !(quantity.is_finite() && quantity > 0.0) {
            return Ok(reject(RejectionReason::Other(format!(
                "cannot size position with equity {equity:.2}"
            ))));
        }

        let trailing_policy = cfg.trailing;
        let reservation = ledger.reserve(mode_kind, &signal.symbol, risk_fraction, now);
        debug!(
            %reservation,
            symbol = %signal.symbol,
            mode = %mode_kind,
            risk = risk_fraction,
            projected_pct = ledger.utilization_pct(projected),
            "Capacity reserved"
        );

        Ok(Decision::Admitted(Box::new(Admission {
            reservation,
            mode: mode_kind,
            signal: signal.clone(),
            direction,
            quantity,
            notional_fraction,
            risk_fraction,
            profit_targets,
            stop_levels,
            trailing_policy,
        })))
    }
}

fn reject(reason: RejectionReason) -> Decision {
    Decision::Rejected(reason)
}

/// Stop ladder attached at entry: signal stop, invalidation, mode max-loss,
/// time stop and an optional volatility stop.
pub fn build_stop_ladder(signal: &Signal, direction: Direction, cfg: &ModeConfig) -> Vec<StopLevel> {
    let entry = signal.entry_price;
    let mut ladder = vec![StopLevel {
        price: StopPrice::Price(signal.stop_loss),
        name: "initial".into(),
        triggers: vec![StopTrigger::PriceCross],
        priority: 1,
        description: format!("signal stop at {:.6}", signal.stop_loss),
    }];
    if (signal.invalidation_price - signal.stop_loss).abs() > f64::EPSILON * entry {
        ladder.push(StopLevel {
            price: StopPrice::Price(signal.invalidation_price),
            name: "invalidation".into(),
            triggers: vec![StopTrigger::PriceCross],
            priority: 2,
            description: format!("thesis void beyond {:.6}", signal.invalidation_price),
        });
    }
    let max_loss_price = direction.offset(entry, -cfg.stops.max_loss_pct);
    ladder.push(StopLevel {
        price: StopPrice::Price(max_loss_price),
        name: "max loss".into(),
        triggers: vec![StopTrigger::PriceCross],
        priority: 3,
        description: format!("{:.2}% hard stop", cfg.stops.max_loss_pct * 100.0),
    });
    ladder.push(StopLevel {
        price: StopPrice::Market,
        name: "time".into(),
        triggers: vec![StopTrigger::MaxHold { secs: cfg.stops.max_hold_secs }],
        priority: 4,
        description: format!("exit after {}s", cfg.stops.max_hold_secs),
    });
    if let Some(threshold) = cfg.stops.volatility_spike_pct {
        ladder.push(StopLevel {
            price: StopPrice::Market,
            name: "volatility".into(),
            triggers: vec![StopTrigger::VolatilitySpike { threshold }],
            priority: 5,
            description: format!("exit on {:.2}% range", threshold * 100.0),
        });
    }
    ladder
}

pub fn build_profit_ladder(signal: &Signal) -> Vec<ProfitTarget> {
    signal
        .take_profit_levels
        .iter()
        .enumerate()
        .map(|(i, level)| ProfitTarget {
            price: level.price,
            release_pct: level.release_pct,
            priority: i as u32 + 1,
            trigger: TargetTrigger::PriceReached,
            description: format!("TP{} releases {:.0}%", i + 1, level.release_pct * 100.0),
        })
        .collect()
}
