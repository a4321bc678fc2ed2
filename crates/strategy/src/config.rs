use common::{Error, MarketRegime, Result};
use serde::{Deserialize, Serialize};

/// Signal-generation config file (TOML). Every field has a default, so an
/// empty file or a missing path yields the stock behaviour.
///
/// Example `config/generator.toml`:
/// ```toml
/// [generator]
/// min_confidence = 0.55
///
/// [[generator.reward_ladder]]
/// r_multiple = 1.0
/// release_pct = 0.5
///
/// [scorer]
/// rsi_period = 14
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneratorFileConfig {
    pub generator: GeneratorConfig,
    pub scorer: ScorerConfig,
}

impl GeneratorFileConfig {
    /// Load from a TOML file. Panics with a clear message on any error.
    pub fn load(path: &str) -> Self {
        let content = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Failed to read generator config at '{path}': {e}"));
        let cfg: Self = toml::from_str(&content)
            .unwrap_or_else(|e| panic!("Failed to parse generator config at '{path}': {e}"));
        if let Err(e) = cfg.generator.validate() {
            panic!("Invalid generator config at '{path}': {e}");
        }
        cfg
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RewardRung {
    /// Target distance as a multiple of the stop distance (R).
    pub r_multiple: f64,
    /// Fraction of the original quantity released at this rung.
    pub release_pct: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Below this confidence the generator always waits.
    pub min_confidence: f64,
    pub strong_confidence: f64,
    pub normal_confidence: f64,
    pub strong_size_multiplier: f64,
    pub normal_size_multiplier: f64,
    pub weak_size_multiplier: f64,
    pub volatile_stop_atr: f64,
    pub trend_stop_atr: f64,
    pub default_stop_atr: f64,
    pub invalidation_atr: f64,
    /// Stop distance is clamped to `[min_stop_pct, max_stop_pct]` of entry.
    pub min_stop_pct: f64,
    pub max_stop_pct: f64,
    /// Used when the snapshot carries no ATR yet.
    pub fallback_stop_pct: f64,
    pub reward_ladder: Vec<RewardRung>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.50,
            strong_confidence: 0.80,
            normal_confidence: 0.65,
            strong_size_multiplier: 1.0,
            normal_size_multiplier: 0.5,
            weak_size_multiplier: 0.25,
            volatile_stop_atr: 2.5,
            trend_stop_atr: 2.0,
            default_stop_atr: 1.5,
            invalidation_atr: 1.0,
            min_stop_pct: 0.002,
            max_stop_pct: 0.05,
            fallback_stop_pct: 0.01,
            reward_ladder: vec![
                RewardRung { r_multiple: 1.0, release_pct: 0.5 },
                RewardRung { r_multiple: 2.0, release_pct: 0.3 },
                RewardRung { r_multiple: 3.0, release_pct: 0.2 },
            ],
        }
    }
}

impl GeneratorConfig {
    pub fn stop_atr_multiple(&self, regime: MarketRegime) -> f64 {
        match regime {
            MarketRegime::Volatile => self.volatile_stop_atr,
            MarketRegime::StrongTrend => self.trend_stop_atr,
            _ => self.default_stop_atr,
        }
    }

    pub fn size_multiplier(&self, confidence: f64) -> f64 {
        if confidence >= self.strong_confidence {
            self.strong_size_multiplier
        } else if confidence >= self.normal_confidence {
            self.normal_size_multiplier
        } else {
            self.weak_size_multiplier
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::Config(msg.to_string()));
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return fail("min_confidence must lie in [0, 1]");
        }
        if !(self.min_confidence <= self.normal_confidence
            && self.normal_confidence <= self.strong_confidence)
        {
            return fail("confidence tiers must be ordered min <= normal <= strong");
        }
        for m in [
            self.strong_size_multiplier,
            self.normal_size_multiplier,
            self.weak_size_multiplier,
            self.volatile_stop_atr,
            self.trend_stop_atr,
            self.default_stop_atr,
            self.invalidation_atr,
            self.fallback_stop_pct,
        ] {
            if !(m.is_finite() && m > 0.0) {
                return fail("multipliers and fallback stop must be positive");
            }
        }
        if !(0.0 < self.min_stop_pct && self.min_stop_pct <= self.max_stop_pct && self.max_stop_pct < 1.0) {
            return fail("stop bounds must satisfy 0 < min_stop_pct <= max_stop_pct < 1");
        }
        let released: f64 = self.reward_ladder.iter().map(|r| r.release_pct).sum();
        if self.reward_ladder.iter().any(|r| r.r_multiple <= 0.0 || r.release_pct <= 0.0) {
            return fail("reward rungs need positive r_multiple and release_pct");
        }
        if released > 1.0 + 1e-9 {
            return fail("reward ladder releases more than 100%");
        }
        Ok(())
    }
}

/// Parameters of the indicator-based reference scorer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub atr_period: usize,
    pub trend_fast: usize,
    pub trend_slow: usize,
    /// Rolling candle window kept per symbol.
    pub max_history: usize,
    /// ATR/price above this is a volatile regime.
    pub volatile_atr_pct: f64,
    /// ATR/price below this is a quiet regime.
    pub quiet_atr_pct: f64,
    /// |EMA spread|/price above this is a strong trend.
    pub trend_spread_pct: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            atr_period: 14,
            trend_fast: 9,
            trend_slow: 21,
            max_history: 200,
            volatile_atr_pct: 0.02,
            quiet_atr_pct: 0.001,
            trend_spread_pct: 0.004,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(GeneratorConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: GeneratorFileConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.generator.reward_ladder.len(), 3);
        assert_eq!(cfg.scorer.rsi_period, 14);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let cfg: GeneratorFileConfig = toml::from_str(
            r#"
            [generator]
            min_confidence = 0.6

            [scorer]
            atr_period = 7
            "#,
        )
        .unwrap();
        assert_eq!(cfg.generator.min_confidence, 0.6);
        assert_eq!(cfg.generator.strong_confidence, 0.80);
        assert_eq!(cfg.scorer.atr_period, 7);
    }

    #[test]
    fn over_released_ladder_is_invalid() {
        let mut cfg = GeneratorConfig::default();
        cfg.reward_ladder[0].release_pct = 0.9;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn size_tiers_follow_confidence() {
        let cfg = GeneratorConfig::default();
        assert_eq!(cfg.size_multiplier(0.9), 1.0);
        assert_eq!(cfg.size_multiplier(0.7), 0.5);
        assert_eq!(cfg.size_multiplier(0.55), 0.25);
    }
}
