use common::{
    Direction, MarketSnapshot, RationaleEntry, ScoringResult, Signal, SignalAction, TakeProfitLevel,
};

use crate::config::GeneratorConfig;

/// Turns scorer output and the current price into a `Signal`.
///
/// Pure and deterministic: the same inputs always produce the same signal,
/// including its timestamp, which is taken from the snapshot.
#[derive(Debug, Clone, Default)]
pub struct SignalGenerator {
    cfg: GeneratorConfig,
}

impl SignalGenerator {
    pub fn new(cfg: GeneratorConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.cfg
    }

    pub fn generate(&self, symbol: &str, snapshot: &MarketSnapshot, scoring: &ScoringResult) -> Signal {
        let ts = snapshot.timestamp;
        let confidence = if scoring.confidence.is_finite() {
            scoring.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let entry = snapshot.price;

        if !(entry.is_finite() && entry > 0.0) {
            return Signal::wait(symbol, "no valid price", ts);
        }
        let Some(direction) = scoring.bias.direction() else {
            return Signal::wait(symbol, "no directional bias", ts);
        };

        let agreeing = scoring
            .factors
            .iter()
            .filter(|f| f.bias.direction() == Some(direction))
            .count();
        let opposing = scoring
            .factors
            .iter()
            .filter(|f| f.bias.direction() == Some(opposite(direction)))
            .count();
        if opposing > 0 && opposing >= agreeing {
            return Signal::wait(
                symbol,
                format!("contradictory sub-scores ({agreeing} for, {opposing} against)"),
                ts,
            );
        }

        if confidence < self.cfg.min_confidence {
            return Signal::wait(
                symbol,
                format!("confidence {confidence:.2} below {:.2}", self.cfg.min_confidence),
                ts,
            );
        }

        // Stop distance as a fraction of entry.
        let atr_pct = if snapshot.atr.is_finite() && snapshot.atr > 0.0 {
            snapshot.atr / entry
        } else {
            0.0
        };
        let stop_pct = if atr_pct > 0.0 {
            (atr_pct * self.cfg.stop_atr_multiple(scoring.regime))
                .clamp(self.cfg.min_stop_pct, self.cfg.max_stop_pct)
        } else {
            self.cfg.fallback_stop_pct.clamp(self.cfg.min_stop_pct, self.cfg.max_stop_pct)
        };
        let invalidation_pct = if atr_pct > 0.0 {
            (atr_pct * self.cfg.invalidation_atr).min(stop_pct)
        } else {
            stop_pct
        };

        let stop_loss = direction.offset(entry, -stop_pct);
        let invalidation_price = direction.offset(entry, -invalidation_pct);

        let mut rungs: Vec<_> = self
            .cfg
            .reward_ladder
            .iter()
            .filter(|r| r.r_multiple > 0.0 && r.release_pct > 0.0)
            .copied()
            .collect();
        rungs.sort_by(|a, b| a.r_multiple.total_cmp(&b.r_multiple));
        rungs.dedup_by(|b, a| (b.r_multiple - a.r_multiple).abs() < 1e-12);

        let take_profit_levels: Vec<TakeProfitLevel> = rungs
            .iter()
            .map(|r| TakeProfitLevel {
                price: direction.offset(entry, stop_pct * r.r_multiple),
                release_pct: r.release_pct,
            })
            .collect();
        let risk_reward_ratio = rungs.iter().map(|r| r.r_multiple * r.release_pct).sum();
        let position_size_multiplier = self.cfg.size_multiplier(confidence);

        let mut rationale = vec![RationaleEntry {
            factor: "regime".into(),
            score: confidence,
            description: format!("{} market, {direction} bias", scoring.regime),
        }];
        rationale.extend(scoring.factors.iter().map(|f| RationaleEntry {
            factor: f.factor.clone(),
            score: f.score,
            description: f.description.clone(),
        }));
        rationale.push(RationaleEntry {
            factor: "sizing".into(),
            score: position_size_multiplier,
            description: format!("stop {:.2}% from entry, size x{position_size_multiplier}", stop_pct * 100.0),
        });

        Signal {
            symbol: symbol.to_string(),
            action: match direction {
                Direction::Long => SignalAction::Buy,
                Direction::Short => SignalAction::Sell,
            },
            confidence,
            entry_price: entry,
            stop_loss,
            take_profit_levels,
            risk_reward_ratio,
            position_size_multiplier,
            invalidation_price,
            rationale,
            timestamp: ts,
        }
    }
}

fn opposite(direction: Direction) -> Direction {
    match direction {
        Direction::Long => Direction::Short,
        Direction::Short => Direction::Long,
    }
}
