use serde::{Deserialize, Serialize};

use common::{Error, ModeKind, Result, TrailingPolicy};

use crate::modes::{ModeConfig, StopPolicy};

/// Runtime risk configuration assembled from `config/risk.toml`.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Ceiling on committed worst-case loss, as a fraction of equity (0.10 = 10%).
    pub max_portfolio_risk: f64,
    pub max_open_positions: usize,
    pub daily_reset_hour_utc: u32,
    /// Sizing equity until the first `account_state()` refresh.
    pub initial_equity: f64,
    pub conservative: ModeConfig,
    pub scalping: ModeConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_portfolio_risk: 0.10,
            max_open_positions: 35,
            daily_reset_hour_utc: 0,
            initial_equity: 10_000.0,
            conservative: ModeConfig::defaults(ModeKind::Conservative),
            scalping: ModeConfig::defaults(ModeKind::Scalping),
        }
    }
}

/// Risk config file (TOML).
///
/// Example `config/risk.toml`:
/// ```toml
/// [portfolio]
/// max_portfolio_risk = 0.10
///
/// [[mode]]
/// kind = "scalping"
/// enabled = true
/// symbols = ["BTCUSDT", "ETHUSDT"]
///
/// [mode.trailing]
/// activation_pct = 0.0015
/// distance_pct = 0.0008
/// ```
///
/// Any field left out keeps the built-in default for that mode.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RiskFileConfig {
    #[serde(default)]
    pub portfolio: PortfolioSection,
    #[serde(default, rename = "mode")]
    pub modes: Vec<ModeSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PortfolioSection {
    pub max_portfolio_risk: f64,
    pub max_open_positions: usize,
    pub daily_reset_hour_utc: u32,
    pub initial_equity: f64,
}

impl Default for PortfolioSection {
    fn default() -> Self {
        let d = RiskConfig::default();
        Self {
            max_portfolio_risk: d.max_portfolio_risk,
            max_open_positions: d.max_open_positions,
            daily_reset_hour_utc: d.daily_reset_hour_utc,
            initial_equity: d.initial_equity,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModeSection {
    pub kind: ModeKind,
    pub enabled: Option<bool>,
    pub confidence_threshold: Option<f64>,
    pub max_concurrent_positions: Option<usize>,
    pub max_daily_trades: Option<u32>,
    pub position_size_pct: Option<f64>,
    pub min_entry_interval_secs: Option<i64>,
    pub symbols: Option<Vec<String>>,
    pub trailing: Option<TrailingPolicy>,
    pub stops: Option<StopSection>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StopSection {
    pub max_loss_pct: Option<f64>,
    pub max_hold_secs: Option<i64>,
    pub volatility_spike_pct: Option<f64>,
    /// Drop the mode's volatility stop, including a built-in one.
    #[serde(default)]
    pub disable_volatility_stop: bool,
}

impl StopSection {
    fn volatility_spike_pct(&self, base: Option<f64>) -> Option<f64> {
        if self.disable_volatility_stop {
            None
        } else {
            self.volatility_spike_pct.or(base)
        }
    }
}

impl ModeSection {
    fn apply(&self, base: ModeConfig) -> ModeConfig {
        let stops = self.stops.clone().unwrap_or_default();
        ModeConfig {
            enabled: self.enabled.unwrap_or(base.enabled),
            confidence_threshold: self.confidence_threshold.unwrap_or(base.confidence_threshold),
            max_concurrent_positions: self
                .max_concurrent_positions
                .unwrap_or(base.max_concurrent_positions),
            max_daily_trades: self.max_daily_trades.unwrap_or(base.max_daily_trades),
            position_size_pct: self.position_size_pct.unwrap_or(base.position_size_pct),
            min_entry_interval_secs: self
                .min_entry_interval_secs
                .unwrap_or(base.min_entry_interval_secs),
            symbols: self.symbols.clone().unwrap_or(base.symbols),
            trailing: self.trailing.unwrap_or(base.trailing),
            stops: StopPolicy {
                max_loss_pct: stops.max_loss_pct.unwrap_or(base.stops.max_loss_pct),
                max_hold_secs: stops.max_hold_secs.unwrap_or(base.stops.max_hold_secs),
                volatility_spike_pct: stops.volatility_spike_pct(base.stops.volatility_spike_pct),
            },
        }
    }
}

impl RiskFileConfig {
    /// Load from a TOML file. Panics with a clear message on any error.
    pub fn load(path: &str) -> RiskConfig {
        let content = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Failed to read risk config at '{path}': {e}"));
        let file: Self = toml::from_str(&content)
            .unwrap_or_else(|e| panic!("Failed to parse risk config at '{path}': {e}"));
        file.into_config()
            .unwrap_or_else(|e| panic!("Invalid risk config at '{path}': {e}"))
    }

    pub fn into_config(self) -> Result<RiskConfig> {
        let p = &self.portfolio;
        if !(p.max_portfolio_risk > 0.0 && p.max_portfolio_risk <= 1.0) {
            return Err(Error::Config(format!(
                "max_portfolio_risk {} outside (0, 1]",
                p.max_portfolio_risk
            )));
        }
        if p.max_open_positions == 0 {
            return Err(Error::Config("max_open_positions must be at least 1".into()));
        }
        if !(p.initial_equity.is_finite() && p.initial_equity >= 0.0) {
            return Err(Error::Config("initial_equity must be non-negative".into()));
        }

        let mut cfg = RiskConfig {
            max_portfolio_risk: p.max_portfolio_risk,
            max_open_positions: p.max_open_positions,
            daily_reset_hour_utc: p.daily_reset_hour_utc,
            initial_equity: p.initial_equity,
            ..RiskConfig::default()
        };
        for section in &self.modes {
            match section.kind {
                ModeKind::Conservative => cfg.conservative = section.apply(cfg.conservative),
                ModeKind::Scalping => cfg.scalping = section.apply(cfg.scalping),
            }
        }
        cfg.conservative.validate()?;
        cfg.scalping.validate()?;
        Ok(cfg)
    }
}
