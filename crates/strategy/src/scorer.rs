use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use common::{Bias, MarketEvent, MarketRegime, MarketSnapshot, Result, ScoringResult, SubScore};

use crate::config::ScorerConfig;
use crate::indicators::{ema, AtrIndicator, Candle, MacdCross, MacdIndicator, RsiIndicator};
use crate::MarketScorer;

#[derive(Debug, Default)]
struct SymbolHistory {
    candles: VecDeque<Candle>,
    last_event: Option<MarketEvent>,
}

/// Reference scorer built on RSI, MACD, EMA trend and ATR.
///
/// Closed candles feed the indicators; every event (closed or not) updates the
/// latest price used for snapshots.
pub struct IndicatorScorer {
    cfg: ScorerConfig,
    rsi: RsiIndicator,
    macd: MacdIndicator,
    atr: AtrIndicator,
    history: RwLock<HashMap<String, SymbolHistory>>,
}

impl IndicatorScorer {
    pub fn new(cfg: ScorerConfig) -> Self {
        Self {
            rsi: RsiIndicator::new(cfg.rsi_period, cfg.rsi_overbought, cfg.rsi_oversold),
            macd: MacdIndicator::new(cfg.macd_fast, cfg.macd_slow, cfg.macd_signal),
            atr: AtrIndicator::new(cfg.atr_period),
            cfg,
            history: RwLock::new(HashMap::new()),
        }
    }

    fn score_candles(&self, candles: &[Candle]) -> ScoringResult {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let Some(&price) = closes.last() else {
            return neutral();
        };
        let mut factors = Vec::new();

        if let Some(rsi) = self.rsi.compute(&closes) {
            let (bias, score) = self.rsi.vote(rsi);
            factors.push(SubScore {
                factor: "rsi".into(),
                score,
                bias,
                description: format!("RSI({}) = {rsi:.1}", self.rsi.period),
            });
        }

        if let Some(reading) = self.macd.compute(&closes) {
            let (bias, score) = match reading.cross {
                MacdCross::Bullish => (Bias::Bullish, 0.9),
                MacdCross::Bearish => (Bias::Bearish, 0.9),
                MacdCross::None if reading.histogram > 0.0 => (Bias::Bullish, 0.6),
                MacdCross::None if reading.histogram < 0.0 => (Bias::Bearish, 0.6),
                MacdCross::None => (Bias::Neutral, 0.0),
            };
            factors.push(SubScore {
                factor: "macd".into(),
                score,
                bias,
                description: format!("histogram {:.4}", reading.histogram),
            });
        }

        let mut spread_pct = 0.0;
        if closes.len() >= self.cfg.trend_slow {
            let fast = ema(&closes, self.cfg.trend_fast);
            let slow = ema(&closes, self.cfg.trend_slow);
            spread_pct = (fast - slow) / price;
            let bias = if spread_pct > 0.0 {
                Bias::Bullish
            } else if spread_pct < 0.0 {
                Bias::Bearish
            } else {
                Bias::Neutral
            };
            let score = (spread_pct.abs() / self.cfg.trend_spread_pct).min(1.0);
            factors.push(SubScore {
                factor: "trend".into(),
                score,
                bias,
                description: format!("EMA spread {:.3}%", spread_pct * 100.0),
            });
        }

        if factors.is_empty() {
            return neutral();
        }

        let atr_pct = self.atr.compute(candles).map(|a| a / price).unwrap_or(0.0);
        let regime = if atr_pct >= self.cfg.volatile_atr_pct {
            MarketRegime::Volatile
        } else if spread_pct.abs() >= self.cfg.trend_spread_pct {
            MarketRegime::StrongTrend
        } else if atr_pct > 0.0 && atr_pct < self.cfg.quiet_atr_pct {
            MarketRegime::Quiet
        } else {
            MarketRegime::Range
        };

        let weight = |b: Bias| -> f64 {
            factors.iter().filter(|f| f.bias == b).map(|f| f.score).sum()
        };
        let (bull, bear) = (weight(Bias::Bullish), weight(Bias::Bearish));
        let total = factors.len() as f64;
        let (bias, confidence) = if bull > bear {
            (Bias::Bullish, bull / total)
        } else if bear > bull {
            (Bias::Bearish, bear / total)
        } else {
            (Bias::Neutral, 0.0)
        };

        ScoringResult { regime, confidence, bias, factors }
    }
}

fn neutral() -> ScoringResult {
    ScoringResult {
        regime: MarketRegime::Quiet,
        confidence: 0.0,
        bias: Bias::Neutral,
        factors: Vec::new(),
    }
}

#[async_trait]
impl MarketScorer for IndicatorScorer {
    async fn observe(&self, event: &MarketEvent) {
        let mut history = self.history.write().await;
        let entry = history.entry(event.symbol.clone()).or_default();
        if event.is_candle_closed {
            entry.candles.push_back(Candle { high: event.high, low: event.low, close: event.price });
            while entry.candles.len() > self.cfg.max_history {
                entry.candles.pop_front();
            }
        }
        entry.last_event = Some(event.clone());
    }

    async fn score(&self, symbol: &str) -> Result<ScoringResult> {
        let history = self.history.read().await;
        let Some(h) = history.get(symbol) else {
            return Ok(neutral());
        };
        let candles: Vec<Candle> = h.candles.iter().copied().collect();
        let result = self.score_candles(&candles);
        debug!(
            symbol,
            regime = %result.regime,
            confidence = result.confidence,
            factors = result.factors.len(),
            "Scored"
        );
        Ok(result)
    }

    async fn snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        let history = self.history.read().await;
        let h = history.get(symbol)?;
        let last = h.last_event.as_ref()?;
        let candles: Vec<Candle> = h.candles.iter().copied().collect();
        Some(MarketSnapshot {
            symbol: symbol.to_string(),
            price: last.price,
            atr: self.atr.compute(&candles).unwrap_or(0.0),
            timestamp: last.timestamp,
        })
    }
}
