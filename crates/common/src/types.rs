use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Live market data event from the exchange stream.
/// Emitted on every kline update (1-minute candles).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEvent {
    pub symbol: String,
    /// Latest close price of the current candle.
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    /// True when the candle has closed (finalized). Indicators should only
    /// process events where `is_candle_closed == true`.
    pub is_candle_closed: bool,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time market view handed to the signal generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: f64,
    /// Average true range in price units. Zero when not enough candles are known.
    pub atr: f64,
    pub timestamp: DateTime<Utc>,
}

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    /// Profit of a move from `entry` to `price` as a fraction of `entry`.
    pub fn profit_fraction(self, entry: f64, price: f64) -> f64 {
        if entry <= 0.0 {
            return 0.0;
        }
        self.sign() * (price - entry) / entry
    }

    /// True if `candidate` is strictly better than `current` for this direction.
    pub fn improves(self, current: f64, candidate: f64) -> bool {
        match self {
            Direction::Long => candidate > current,
            Direction::Short => candidate < current,
        }
    }

    /// Shift `price` by `fraction` towards profit (positive) or loss (negative).
    pub fn offset(self, price: f64, fraction: f64) -> f64 {
        price * (1.0 + self.sign() * fraction)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

// ─── Signals ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Wait,
}

impl SignalAction {
    pub fn direction(self) -> Option<Direction> {
        match self {
            SignalAction::Buy => Some(Direction::Long),
            SignalAction::Sell => Some(Direction::Short),
            SignalAction::Wait => None,
        }
    }
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "BUY"),
            SignalAction::Sell => write!(f, "SELL"),
            SignalAction::Wait => write!(f, "WAIT"),
        }
    }
}

/// One rung of the take-profit ladder carried by a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    pub price: f64,
    /// Fraction of the original quantity released at this level (0.5 = 50%).
    pub release_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RationaleEntry {
    pub factor: String,
    pub score: f64,
    pub description: String,
}

/// A point-in-time recommendation to enter a position, or to wait.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub action: SignalAction,
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    /// Ordered by increasing distance from `entry_price`.
    pub take_profit_levels: Vec<TakeProfitLevel>,
    pub risk_reward_ratio: f64,
    /// Scales the mode's base position size.
    pub position_size_multiplier: f64,
    /// Price beyond which the thesis is void, even before the stop-loss.
    pub invalidation_price: f64,
    pub rationale: Vec<RationaleEntry>,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn wait(symbol: impl Into<String>, reason: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            action: SignalAction::Wait,
            confidence: 0.0,
            entry_price: 0.0,
            stop_loss: 0.0,
            take_profit_levels: Vec::new(),
            risk_reward_ratio: 0.0,
            position_size_multiplier: 0.0,
            invalidation_price: 0.0,
            rationale: vec![RationaleEntry {
                factor: "wait".into(),
                score: 0.0,
                description: reason.into(),
            }],
            timestamp,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.action != SignalAction::Wait
    }

    pub fn direction(&self) -> Option<Direction> {
        self.action.direction()
    }

    /// Adverse distance from entry to the stop-loss, as a fraction of entry.
    pub fn stop_distance(&self) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (self.entry_price - self.stop_loss).abs() / self.entry_price
    }

    /// Structural checks on an actionable signal. `Wait` signals always pass;
    /// their price fields are advisory.
    pub fn validate(&self) -> Result<()> {
        let Some(direction) = self.direction() else {
            return Ok(());
        };
        let invalid = |msg: String| Err(Error::Validation(format!("{}: {msg}", self.symbol)));

        if !(0.0..=1.0).contains(&self.confidence) {
            return invalid(format!("confidence {} outside [0, 1]", self.confidence));
        }
        for (name, value) in [
            ("entry_price", self.entry_price),
            ("stop_loss", self.stop_loss),
            ("invalidation_price", self.invalidation_price),
            ("position_size_multiplier", self.position_size_multiplier),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return invalid(format!("{name} must be positive, got {value}"));
            }
        }
        if direction.profit_fraction(self.entry_price, self.stop_loss) >= 0.0 {
            return invalid(format!(
                "stop_loss {} is not on the adverse side of entry {}",
                self.stop_loss, self.entry_price
            ));
        }
        let inv = direction.profit_fraction(self.entry_price, self.invalidation_price);
        let stop = direction.profit_fraction(self.entry_price, self.stop_loss);
        if inv >= 0.0 || inv < stop {
            return invalid(format!(
                "invalidation_price {} must lie between stop_loss and entry",
                self.invalidation_price
            ));
        }

        let mut last_distance = 0.0;
        let mut released = 0.0;
        for level in &self.take_profit_levels {
            let distance = direction.profit_fraction(self.entry_price, level.price);
            if !level.price.is_finite() || distance <= last_distance {
                return invalid(format!(
                    "take-profit {} is not strictly beyond the previous level",
                    level.price
                ));
            }
            if !(level.release_pct > 0.0 && level.release_pct <= 1.0) {
                return invalid(format!("release {} outside (0, 1]", level.release_pct));
            }
            last_distance = distance;
            released += level.release_pct;
        }
        if released > 1.0 + 1e-9 {
            return invalid(format!("take-profit releases sum to {released:.3} > 1"));
        }
        Ok(())
    }
}

// ─── Scoring collaborator output ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    StrongTrend,
    Range,
    Breakout,
    Volatile,
    Quiet,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketRegime::StrongTrend => "strong trend",
            MarketRegime::Range => "range",
            MarketRegime::Breakout => "breakout",
            MarketRegime::Volatile => "volatile",
            MarketRegime::Quiet => "quiet",
        };
        write!(f, "{s}")
    }
}

/// Directional lean reported by the scorer or one of its sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

impl Bias {
    pub fn direction(self) -> Option<Direction> {
        match self {
            Bias::Bullish => Some(Direction::Long),
            Bias::Bearish => Some(Direction::Short),
            Bias::Neutral => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubScore {
    pub factor: String,
    pub score: f64,
    pub bias: Bias,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResult {
    pub regime: MarketRegime,
    /// Overall directional confidence. Not guaranteed to lie in [0, 1].
    pub confidence: f64,
    pub bias: Bias,
    pub factors: Vec<SubScore>,
}

// ─── Modes ────────────────────────────────────────────────────────────────────

/// The closed set of trading modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeKind {
    Conservative,
    Scalping,
}

impl ModeKind {
    pub const ALL: [ModeKind; 2] = [ModeKind::Conservative, ModeKind::Scalping];

    pub fn as_str(self) -> &'static str {
        match self {
            ModeKind::Conservative => "conservative",
            ModeKind::Scalping => "scalping",
        }
    }
}

impl std::fmt::Display for ModeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ModeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "conservative" => Ok(ModeKind::Conservative),
            "scalping" => Ok(ModeKind::Scalping),
            other => Err(Error::UnknownMode(other.to_string())),
        }
    }
}

/// Trailing-stop policy captured on a position at entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingPolicy {
    /// Unrealized profit (fraction) that arms the trailing stop.
    pub activation_pct: f64,
    /// Distance of the stop behind the price (fraction).
    pub distance_pct: f64,
}

// ─── Ladders ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetTrigger {
    PriceReached,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitTarget {
    pub price: f64,
    /// Fraction of the original quantity closed when this target fills.
    pub release_pct: f64,
    /// Lower value is evaluated first.
    pub priority: u32,
    pub trigger: TargetTrigger,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StopPrice {
    Price(f64),
    /// Close immediately at the best available price.
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopTrigger {
    /// Price crosses the level in the adverse direction.
    PriceCross,
    /// Position has been held for at least `secs`.
    MaxHold { secs: i64 },
    /// Observed volatility (fraction of price) reaches `threshold`.
    VolatilitySpike { threshold: f64 },
}

impl std::fmt::Display for StopTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopTrigger::PriceCross => write!(f, "price cross"),
            StopTrigger::MaxHold { secs } => write!(f, "held {secs}s"),
            StopTrigger::VolatilitySpike { threshold } => {
                write!(f, "volatility >= {:.2}%", threshold * 100.0)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLevel {
    pub price: StopPrice,
    pub name: String,
    pub triggers: Vec<StopTrigger>,
    pub priority: u32,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingStop {
    pub active: bool,
    pub stop_price: f64,
    /// Profit (fraction of entry) secured if the stop fills at `stop_price`.
    pub locked_profit_pct: f64,
}

/// Adverse distance (fraction of entry) to the nearest protective price among the
/// price-cross stops and an armed trailing stop. Falls back to 1.0 (whole notional)
/// when nothing protects the position. Never negative.
pub fn protective_distance(
    direction: Direction,
    entry: f64,
    stops: &[StopLevel],
    trailing: Option<&TrailingStop>,
) -> f64 {
    let stop_prices = stops.iter().filter_map(|s| match s.price {
        StopPrice::Price(p) if s.triggers.contains(&StopTrigger::PriceCross) => Some(p),
        _ => None,
    });
    let trailing_price = trailing.filter(|t| t.active).map(|t| t.stop_price);

    stop_prices
        .chain(trailing_price)
        .map(|p| (-direction.profit_fraction(entry, p)).max(0.0))
        .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.min(d))))
        .unwrap_or(1.0)
}

// ─── Positions ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(pub String);

impl PositionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for PositionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PositionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exchange-side handle for an opened position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangePositionRef(pub String);

impl std::fmt::Display for ExchangePositionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An open position tracked by the portfolio ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub initial_quantity: f64,
    /// Remaining quantity. Always > 0 while the position is in the ledger.
    pub quantity: f64,
    pub mode: ModeKind,
    pub confidence: f64,
    pub entry_time: DateTime<Utc>,
    pub exchange_ref: ExchangePositionRef,
    /// Share of account equity committed at entry (size multiplier × mode size).
    pub notional_fraction: f64,
    pub profit_targets: Vec<ProfitTarget>,
    /// Indices into `profit_targets` whose partial close has been filled.
    pub consumed_targets: BTreeSet<usize>,
    pub stop_levels: Vec<StopLevel>,
    pub trailing_policy: TrailingPolicy,
    pub trailing_stop: Option<TrailingStop>,
    /// Highest unrealized profit fraction seen. Never decreases.
    pub max_profit_seen: f64,
    pub last_price: f64,
    /// Realized PnL from partial closes so far.
    pub realized_pnl: f64,
}

impl Position {
    pub fn unrealized_pnl(&self) -> f64 {
        self.direction.sign() * (self.last_price - self.entry_price) * self.quantity
    }

    pub fn remaining_ratio(&self) -> f64 {
        if self.initial_quantity <= 0.0 {
            return 0.0;
        }
        (self.quantity / self.initial_quantity).clamp(0.0, 1.0)
    }

    /// Worst-case loss contribution as a fraction of account equity.
    pub fn worst_case_loss(&self) -> f64 {
        self.notional_fraction
            * self.remaining_ratio()
            * protective_distance(
                self.direction,
                self.entry_price,
                &self.stop_levels,
                self.trailing_stop.as_ref(),
            )
    }
}

/// Derived portfolio view. Always recomputed from the live position set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub total_positions: usize,
    pub active_symbols: BTreeSet<String>,
    pub total_unrealized_pnl: f64,
    pub total_realized_pnl: f64,
    /// Worst-case loss of open positions plus pending reservations (fraction of equity).
    pub committed_risk: f64,
    pub risk_ceiling: f64,
    pub risk_utilization_pct: f64,
    pub pending_reservations: usize,
}

// ─── Gateway types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    pub equity: f64,
    pub available: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectiveLevels {
    pub stop_loss: f64,
    pub take_profits: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRequest {
    pub symbol: String,
    pub direction: Direction,
    pub quantity: f64,
    pub reference_price: f64,
    pub protective: ProtectiveLevels,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenConfirmation {
    pub position_ref: ExchangePositionRef,
    pub fill_price: f64,
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
}

/// Confirmation of a (partial) close returned by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub position_ref: ExchangePositionRef,
    pub fill_price: f64,
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
}

/// Position as the exchange reports it, used for reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub position_ref: ExchangePositionRef,
    pub symbol: String,
    pub direction: Direction,
    pub quantity: f64,
}

// ─── Admission ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReservationId(pub u64);

impl std::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Sizing and ladders fixed at admission, carried to the execution coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Admission {
    pub reservation: ReservationId,
    pub mode: ModeKind,
    pub signal: Signal,
    pub direction: Direction,
    pub quantity: f64,
    pub notional_fraction: f64,
    pub risk_fraction: f64,
    pub profit_targets: Vec<ProfitTarget>,
    pub stop_levels: Vec<StopLevel>,
    pub trailing_policy: TrailingPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Decision {
    Admitted(Box<Admission>),
    Rejected(RejectionReason),
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted(_))
    }
}

/// Why an admission request was refused. Always names the limiting cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectionReason {
    NotActionable,
    ModeDisabled { mode: ModeKind },
    SymbolNotEligible { mode: ModeKind, symbol: String },
    ConfidenceBelowThreshold { confidence: f64, threshold: f64 },
    SymbolAlreadyOpen { mode: ModeKind, symbol: String },
    MaxConcurrentPositions { mode: ModeKind, open: usize, limit: usize },
    MaxDailyTrades { mode: ModeKind, count: u32, limit: u32 },
    EntryCooldown { mode: ModeKind, remaining_secs: i64 },
    PortfolioPositionCeiling { open: usize, limit: usize },
    RiskCeilingExceeded { utilization_pct: f64, projected_pct: f64 },
    Other(String),
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::NotActionable => write!(f, "signal is not actionable (wait)"),
            RejectionReason::ModeDisabled { mode } => write!(f, "mode {mode} is disabled"),
            RejectionReason::SymbolNotEligible { mode, symbol } => {
                write!(f, "{symbol} is not in the {mode} universe")
            }
            RejectionReason::ConfidenceBelowThreshold { confidence, threshold } => write!(
                f,
                "signal confidence {confidence:.2} below threshold {threshold:.2}"
            ),
            RejectionReason::SymbolAlreadyOpen { mode, symbol } => {
                write!(f, "{symbol} already has an open {mode} position")
            }
            RejectionReason::MaxConcurrentPositions { mode, open, limit } => write!(
                f,
                "max concurrent positions reached ({mode}: {open}/{limit})"
            ),
            RejectionReason::MaxDailyTrades { mode, count, limit } => {
                write!(f, "max daily trades reached ({mode}: {count}/{limit})")
            }
            RejectionReason::EntryCooldown { mode, remaining_secs } => {
                write!(f, "{mode} entry interval not elapsed ({remaining_secs}s remaining)")
            }
            RejectionReason::PortfolioPositionCeiling { open, limit } => {
                write!(f, "portfolio position ceiling reached ({open}/{limit})")
            }
            RejectionReason::RiskCeilingExceeded { utilization_pct, projected_pct } => write!(
                f,
                "portfolio risk ceiling exceeded (utilization {utilization_pct:.1}%, projected {projected_pct:.1}%)"
            ),
            RejectionReason::Other(s) => write!(f, "{s}"),
        }
    }
}

// ─── Lifecycle ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CloseReason {
    StopLevel { name: String, trigger: StopTrigger },
    TrailingStop { stop_price: f64 },
    /// The last profit target released the remaining quantity.
    ProfitLadder,
    /// Trimmed right after entry to fit under the portfolio risk ceiling.
    RiskCeiling,
    Manual,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::StopLevel { name, trigger } => write!(f, "stop '{name}' ({trigger})"),
            CloseReason::TrailingStop { stop_price } => write!(f, "trailing stop at {stop_price:.4}"),
            CloseReason::ProfitLadder => write!(f, "profit ladder completed"),
            CloseReason::RiskCeiling => write!(f, "risk ceiling trim"),
            CloseReason::Manual => write!(f, "manual close"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    TrailingArmed { stop_price: f64 },
    TrailingAdvanced { from: f64, to: f64 },
    PartialClose { target_index: usize, release_pct: f64, trigger_price: f64 },
    FullClose { reason: CloseReason, trigger_price: f64 },
}

impl LifecycleEvent {
    /// True for events that require an exchange action.
    pub fn needs_execution(&self) -> bool {
        matches!(self, LifecycleEvent::PartialClose { .. } | LifecycleEvent::FullClose { .. })
    }
}

// ─── Engine ───────────────────────────────────────────────────────────────────

/// Whether the bot is running against the real exchange or simulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

/// Current state of the trading engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Running => write!(f, "running"),
            EngineState::Paused => write!(f, "paused"),
        }
    }
}

/// Commands sent to the engine via the command channel.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Start,
    Stop,
    /// Suppress new entries; open positions keep being managed.
    Pause,
    Resume,
    SetModeEnabled { mode: ModeKind, enabled: bool },
    ResetDailyCounters,
    ResetPortfolio,
    Reconcile,
}

/// Events emitted by the risk and execution layers.
#[derive(Debug, Clone)]
pub enum RiskEvent {
    AdmissionRejected {
        symbol: String,
        mode: ModeKind,
        reason: RejectionReason,
    },
    PositionOpened {
        id: PositionId,
        symbol: String,
        mode: ModeKind,
        direction: Direction,
        quantity: f64,
        price: f64,
    },
    PositionReduced {
        id: PositionId,
        symbol: String,
        closed_quantity: f64,
        remaining: f64,
        realized_pnl: f64,
    },
    PositionClosed {
        id: PositionId,
        symbol: String,
        reason: CloseReason,
        realized_pnl: f64,
    },
    ExecutionFailed {
        symbol: String,
        error: String,
    },
    ReconciliationConflict {
        detail: String,
    },
}
