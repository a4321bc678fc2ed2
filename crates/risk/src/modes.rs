use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use common::{Error, ModeKind, Result, TrailingPolicy};

/// Exit rules a mode attaches to every position it opens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopPolicy {
    /// Hard stop distance from entry (fraction).
    pub max_loss_pct: f64,
    /// Close at market once the position has been held this long.
    pub max_hold_secs: i64,
    /// Close at market when per-tick volatility (fraction of price) reaches this.
    pub volatility_spike_pct: Option<f64>,
}

/// Tunable limits and policies of one trading mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
    pub enabled: bool,
    /// Minimum signal confidence for automatic execution.
    pub confidence_threshold: f64,
    pub max_concurrent_positions: usize,
    pub max_daily_trades: u32,
    /// Base share of equity per position, before the signal's size multiplier.
    pub position_size_pct: f64,
    pub min_entry_interval_secs: i64,
    /// Eligible symbols. Empty means every symbol.
    pub symbols: Vec<String>,
    pub trailing: TrailingPolicy,
    pub stops: StopPolicy,
}

impl ModeConfig {
    /// Built-in defaults for each mode.
    pub fn defaults(kind: ModeKind) -> Self {
        match kind {
            ModeKind::Conservative => Self {
                enabled: true,
                confidence_threshold: 0.70,
                max_concurrent_positions: 5,
                max_daily_trades: 10,
                position_size_pct: 0.03,
                min_entry_interval_secs: 30 * 60,
                symbols: Vec::new(),
                trailing: TrailingPolicy { activation_pct: 0.005, distance_pct: 0.003 },
                stops: StopPolicy {
                    max_loss_pct: 0.03,
                    max_hold_secs: 24 * 60 * 60,
                    volatility_spike_pct: None,
                },
            },
            ModeKind::Scalping => Self {
                enabled: false,
                confidence_threshold: 0.45,
                max_concurrent_positions: 30,
                max_daily_trades: 100,
                position_size_pct: 0.05,
                min_entry_interval_secs: 60,
                symbols: Vec::new(),
                trailing: TrailingPolicy { activation_pct: 0.0015, distance_pct: 0.0008 },
                stops: StopPolicy {
                    max_loss_pct: 0.0025,
                    max_hold_secs: 20 * 60,
                    volatility_spike_pct: Some(0.01),
                },
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Config(msg));
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return fail(format!("confidence_threshold {} outside [0, 1]", self.confidence_threshold));
        }
        if !(self.position_size_pct > 0.0 && self.position_size_pct <= 1.0) {
            return fail(format!("position_size_pct {} outside (0, 1]", self.position_size_pct));
        }
        if self.max_concurrent_positions == 0 || self.max_daily_trades == 0 {
            return fail("position and daily trade caps must be at least 1".into());
        }
        if self.min_entry_interval_secs < 0 || self.stops.max_hold_secs <= 0 {
            return fail("intervals must be non-negative and max_hold_secs positive".into());
        }
        if !(self.trailing.activation_pct > 0.0 && self.trailing.distance_pct > 0.0) {
            return fail("trailing activation and distance must be positive".into());
        }
        if !(self.stops.max_loss_pct > 0.0 && self.stops.max_loss_pct < 1.0) {
            return fail(format!("max_loss_pct {} outside (0, 1)", self.stops.max_loss_pct));
        }
        if matches!(self.stops.volatility_spike_pct, Some(v) if v <= 0.0) {
            return fail("volatility_spike_pct must be positive".into());
        }
        Ok(())
    }

    pub fn is_eligible(&self, symbol: &str) -> bool {
        self.symbols.is_empty() || self.symbols.iter().any(|s| s.eq_ignore_ascii_case(symbol))
    }
}

/// A mode with its live counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mode {
    pub kind: ModeKind,
    pub config: ModeConfig,
    pub daily_trade_count: u32,
    pub last_entry: Option<DateTime<Utc>>,
    /// Trading day the counter belongs to.
    pub trading_day: NaiveDate,
}

impl Mode {
    fn new(kind: ModeKind, config: ModeConfig, trading_day: NaiveDate) -> Self {
        Self { kind, config, daily_trade_count: 0, last_entry: None, trading_day }
    }
}

/// Per-mode enablement, limits and daily counters.
///
/// The set of modes is closed, so every `ModeKind` always resolves.
#[derive(Debug, Clone)]
pub struct ModeRegistry {
    conservative: Mode,
    scalping: Mode,
    reset_hour_utc: u32,
}

impl ModeRegistry {
    pub fn new(
        conservative: ModeConfig,
        scalping: ModeConfig,
        reset_hour_utc: u32,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        conservative.validate()?;
        scalping.validate()?;
        if reset_hour_utc > 23 {
            return Err(Error::Config(format!("daily_reset_hour_utc {reset_hour_utc} > 23")));
        }
        let day = trading_day(now, reset_hour_utc);
        Ok(Self {
            conservative: Mode::new(ModeKind::Conservative, conservative, day),
            scalping: Mode::new(ModeKind::Scalping, scalping, day),
            reset_hour_utc,
        })
    }

    pub fn with_defaults(now: DateTime<Utc>) -> Self {
        let day = trading_day(now, 0);
        Self {
            conservative: Mode::new(
                ModeKind::Conservative,
                ModeConfig::defaults(ModeKind::Conservative),
                day,
            ),
            scalping: Mode::new(ModeKind::Scalping, ModeConfig::defaults(ModeKind::Scalping), day),
            reset_hour_utc: 0,
        }
    }

    pub fn get_mode(&self, kind: ModeKind) -> &Mode {
        match kind {
            ModeKind::Conservative => &self.conservative,
            ModeKind::Scalping => &self.scalping,
        }
    }

    fn mode_mut(&mut self, kind: ModeKind) -> &mut Mode {
        match kind {
            ModeKind::Conservative => &mut self.conservative,
            ModeKind::Scalping => &mut self.scalping,
        }
    }

    pub fn modes(&self) -> [&Mode; 2] {
        [&self.conservative, &self.scalping]
    }

    /// Idempotent. Returns true if the flag changed.
    pub fn set_enabled(&mut self, kind: ModeKind, enabled: bool) -> bool {
        let mode = self.mode_mut(kind);
        if mode.config.enabled == enabled {
            return false;
        }
        mode.config.enabled = enabled;
        info!(mode = %kind, enabled, "Mode toggled");
        true
    }

    /// Replace a mode's configuration. Counters are kept; open positions keep
    /// the policies captured when they were opened.
    pub fn configure(&mut self, kind: ModeKind, config: ModeConfig) -> Result<()> {
        config.validate()?;
        self.mode_mut(kind).config = config;
        info!(mode = %kind, "Mode reconfigured");
        Ok(())
    }

    /// Count one executed entry. Fails at the cap without changing the counter.
    pub fn record_daily_trade(&mut self, kind: ModeKind, at: DateTime<Utc>) -> Result<u32> {
        self.roll_day(at);
        let mode = self.mode_mut(kind);
        if mode.daily_trade_count >= mode.config.max_daily_trades {
            return Err(Error::CapacityExceeded { mode: kind, limit: mode.config.max_daily_trades });
        }
        mode.daily_trade_count += 1;
        mode.last_entry = Some(at);
        Ok(mode.daily_trade_count)
    }

    /// Administrative reset of every mode's daily counter, anchored to the
    /// trading day containing `as_of`.
    pub fn reset_daily_counters(&mut self, as_of: DateTime<Utc>) {
        let day = trading_day(as_of, self.reset_hour_utc);
        for mode in [&mut self.conservative, &mut self.scalping] {
            mode.daily_trade_count = 0;
            mode.trading_day = day;
        }
        info!(trading_day = %day, "Daily trade counters reset");
    }

    /// Reset counters if `now` falls in a later trading day. Returns true on reset.
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        let day = trading_day(now, self.reset_hour_utc);
        if day > self.conservative.trading_day || day > self.scalping.trading_day {
            self.reset_daily_counters(now);
            return true;
        }
        false
    }
}

/// Trading day of `ts` when days roll over at `reset_hour_utc`.
pub fn trading_day(ts: DateTime<Utc>, reset_hour_utc: u32) -> NaiveDate {
    (ts - Duration::hours(i64::from(reset_hour_utc))).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, h, m, 0).unwrap()
    }

    #[test]
    fn defaults_match_mode_profiles() {
        let reg = ModeRegistry::with_defaults(at(9, 0));
        let c = reg.get_mode(ModeKind::Conservative);
        assert_eq!(c.config.max_concurrent_positions, 5);
        assert_eq!(c.config.max_daily_trades, 10);
        let s = reg.get_mode(ModeKind::Scalping);
        assert_eq!(s.config.max_concurrent_positions, 30);
        assert!(!s.config.enabled);
    }

    #[test]
    fn set_enabled_is_idempotent() {
        let mut reg = ModeRegistry::with_defaults(at(9, 0));
        assert!(reg.set_enabled(ModeKind::Scalping, true));
        assert!(!reg.set_enabled(ModeKind::Scalping, true));
        assert!(reg.get_mode(ModeKind::Scalping).config.enabled);
    }

    #[test]
    fn record_daily_trade_fails_at_cap_without_incrementing() {
        let mut cfg = ModeConfig::defaults(ModeKind::Conservative);
        cfg.max_daily_trades = 2;
        let mut reg =
            ModeRegistry::new(cfg, ModeConfig::defaults(ModeKind::Scalping), 0, at(9, 0)).unwrap();

        assert_eq!(reg.record_daily_trade(ModeKind::Conservative, at(9, 1)).unwrap(), 1);
        assert_eq!(reg.record_daily_trade(ModeKind::Conservative, at(9, 2)).unwrap(), 2);
        let err = reg.record_daily_trade(ModeKind::Conservative, at(9, 3)).unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { limit: 2, .. }));
        assert_eq!(reg.get_mode(ModeKind::Conservative).daily_trade_count, 2);
    }

    #[test]
    fn counters_roll_at_reset_hour() {
        let mut reg = ModeRegistry::new(
            ModeConfig::defaults(ModeKind::Conservative),
            ModeConfig::defaults(ModeKind::Scalping),
            6,
            at(7, 0),
        )
        .unwrap();
        reg.record_daily_trade(ModeKind::Conservative, at(8, 0)).unwrap();

        let next_morning = Utc.with_ymd_and_hms(2024, 5, 11, 5, 59, 0).unwrap();
        assert!(!reg.roll_day(next_morning));
        assert_eq!(reg.get_mode(ModeKind::Conservative).daily_trade_count, 1);

        let after_reset = Utc.with_ymd_and_hms(2024, 5, 11, 6, 0, 0).unwrap();
        assert!(reg.roll_day(after_reset));
        assert_eq!(reg.get_mode(ModeKind::Conservative).daily_trade_count, 0);
    }

    #[test]
    fn configure_rejects_invalid_config() {
        let mut reg = ModeRegistry::with_defaults(at(9, 0));
        let mut cfg = ModeConfig::defaults(ModeKind::Conservative);
        cfg.position_size_pct = 0.0;
        assert!(matches!(reg.configure(ModeKind::Conservative, cfg), Err(Error::Config(_))));
    }

    #[test]
    fn empty_universe_accepts_every_symbol() {
        let mut cfg = ModeConfig::defaults(ModeKind::Conservative);
        assert!(cfg.is_eligible("DOGEUSDT"));
        cfg.symbols = vec!["BTCUSDT".into()];
        assert!(cfg.is_eligible("btcusdt"));
        assert!(!cfg.is_eligible("DOGEUSDT"));
    }
}
