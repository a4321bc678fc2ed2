pub mod config;
pub mod generator;
pub mod indicators;
pub mod scorer;

pub use config::{GeneratorConfig, GeneratorFileConfig, RewardRung, ScorerConfig};
pub use generator::SignalGenerator;
pub use scorer::IndicatorScorer;

use async_trait::async_trait;
use common::{MarketEvent, MarketSnapshot, Result, ScoringResult};

/// Market data collaborator: regime, directional confidence and supporting
/// factors per symbol, plus the latest price view.
///
/// Scoring research lives behind this trait; `IndicatorScorer` is the
/// in-tree reference implementation.
#[async_trait]
pub trait MarketScorer: Send + Sync {
    /// Feed a market event. Scorers that pull their own data can ignore this.
    async fn observe(&self, _event: &MarketEvent) {}

    async fn score(&self, symbol: &str) -> Result<ScoringResult>;

    /// Latest price and volatility. `None` until the symbol has been seen.
    async fn snapshot(&self, symbol: &str) -> Option<MarketSnapshot>;
}
