//! Per-tick evaluation of a position's trailing stop, profit ladder and stop ladder.
//!
//! `evaluate` is pure. The caller commits the tracking fields (`max_profit_seen`,
//! `trailing_stop`) right away, but quantity and target consumption only change
//! once the exchange confirms the resulting close.

use chrono::{DateTime, Utc};

use common::{
    CloseReason, Direction, LifecycleEvent, Position, StopLevel, StopPrice, StopTrigger, TrailingStop,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceTick {
    pub price: f64,
    pub at: DateTime<Utc>,
    /// Recent volatility as a fraction of price (e.g. candle range / close).
    pub volatility: Option<f64>,
}

impl PriceTick {
    pub fn new(price: f64, at: DateTime<Utc>) -> Self {
        Self { price, at, volatility: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub profit_pct: f64,
    pub max_profit_seen: f64,
    pub trailing_stop: Option<TrailingStop>,
    pub events: Vec<LifecycleEvent>,
}

impl TickOutcome {
    pub fn full_close(&self) -> Option<&LifecycleEvent> {
        self.events.iter().find(|e| matches!(e, LifecycleEvent::FullClose { .. }))
    }
}

pub fn evaluate(position: &Position, tick: &PriceTick) -> TickOutcome {
    let direction = position.direction;
    let price = tick.price;
    let profit_pct = direction.profit_fraction(position.entry_price, price);
    let max_profit_seen = position.max_profit_seen.max(profit_pct);
    let mut events = Vec::new();

    // Trailing stop: arm, then ratchet favorably only.
    let policy = position.trailing_policy;
    let candidate = direction.offset(price, -policy.distance_pct);
    let trailing_stop = match position.trailing_stop {
        Some(ts) if ts.active => {
            if direction.improves(ts.stop_price, candidate) {
                events.push(LifecycleEvent::TrailingAdvanced { from: ts.stop_price, to: candidate });
                Some(trailing(direction, position.entry_price, candidate))
            } else {
                Some(ts)
            }
        }
        other => {
            if profit_pct >= policy.activation_pct {
                events.push(LifecycleEvent::TrailingArmed { stop_price: candidate });
                Some(trailing(direction, position.entry_price, candidate))
            } else {
                other
            }
        }
    };

    // Profit ladder, in priority order, skipping consumed targets.
    let mut order: Vec<usize> = (0..position.profit_targets.len())
        .filter(|i| !position.consumed_targets.contains(i))
        .collect();
    order.sort_by_key(|&i| (position.profit_targets[i].priority, i));
    let partials: Vec<LifecycleEvent> = order
        .into_iter()
        .filter(|&i| reached(direction, price, position.profit_targets[i].price))
        .map(|i| {
            let target = &position.profit_targets[i];
            LifecycleEvent::PartialClose {
                target_index: i,
                release_pct: target.release_pct,
                trigger_price: target.price,
            }
        })
        .collect();

    // Stop ladder, then the trailing stop. Any hit supersedes partial closes.
    let stop_hit = first_triggered_stop(position, tick)
        .or_else(|| {
            trailing_stop
                .filter(|ts| ts.active && crossed(direction, price, ts.stop_price))
                .map(|ts| CloseReason::TrailingStop { stop_price: ts.stop_price })
        });

    match stop_hit {
        Some(reason) => events.push(LifecycleEvent::FullClose { reason, trigger_price: price }),
        None => events.extend(partials),
    }

    TickOutcome { profit_pct, max_profit_seen, trailing_stop, events }
}

/// Quantity the exchange must close for `event`. `None` for tracking-only events.
pub fn close_quantity(position: &Position, event: &LifecycleEvent) -> Option<f64> {
    match event {
        LifecycleEvent::PartialClose { release_pct, .. } => {
            Some((position.initial_quantity * release_pct).min(position.quantity))
        }
        LifecycleEvent::FullClose { .. } => Some(position.quantity),
        LifecycleEvent::TrailingArmed { .. } | LifecycleEvent::TrailingAdvanced { .. } => None,
    }
}

fn trailing(direction: Direction, entry: f64, stop_price: f64) -> TrailingStop {
    TrailingStop {
        active: true,
        stop_price,
        locked_profit_pct: direction.profit_fraction(entry, stop_price),
    }
}

fn first_triggered_stop(position: &Position, tick: &PriceTick) -> Option<CloseReason> {
    let mut stops: Vec<&StopLevel> = position.stop_levels.iter().collect();
    stops.sort_by_key(|s| s.priority);
    stops.into_iter().find_map(|stop| {
        stop.triggers
            .iter()
            .find(|t| triggered(position, stop, t, tick))
            .map(|t| CloseReason::StopLevel { name: stop.name.clone(), trigger: *t })
    })
}

fn triggered(position: &Position, stop: &StopLevel, trigger: &StopTrigger, tick: &PriceTick) -> bool {
    match (trigger, stop.price) {
        (StopTrigger::PriceCross, StopPrice::Price(level)) => {
            crossed(position.direction, tick.price, level)
        }
        // A market sentinel has no level to cross.
        (StopTrigger::PriceCross, StopPrice::Market) => false,
        (StopTrigger::MaxHold { secs }, _) => {
            (tick.at - position.entry_time).num_seconds() >= *secs
        }
        (StopTrigger::VolatilitySpike { threshold }, _) => {
            tick.volatility.is_some_and(|v| v >= *threshold)
        }
    }
}

/// Price has reached `level` on the profitable side.
fn reached(direction: Direction, price: f64, level: f64) -> bool {
    match direction {
        Direction::Long => price >= level,
        Direction::Short => price <= level,
    }
}

/// Price has crossed `level` on the adverse side.
fn crossed(direction: Direction, price: f64, level: f64) -> bool {
    match direction {
        Direction::Long => price <= level,
        Direction::Short => price >= level,
    }
}
