use async_trait::async_trait;

use crate::{Balances, ExchangePosition, ExchangePositionRef, Fill, OpenConfirmation, OpenRequest, Result};

/// Narrow interface to the exchange.
///
/// `PaperGateway` implements this for simulation. The gateway translates
/// abstract sizing into exchange-native orders; the core never issues raw orders.
///
/// Only `ExecutionCoordinator` in `crates/engine` should call the mutating
/// methods. Every opening request must be admitted by the `RiskManager` first.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Open a position with the given protective levels attached.
    async fn open_position(&self, request: &OpenRequest) -> Result<OpenConfirmation>;

    /// Close `quantity` of an existing exchange position.
    async fn close_position(&self, position_ref: &ExchangePositionRef, quantity: f64) -> Result<Fill>;

    /// Current account balances.
    async fn account_state(&self) -> Result<Balances>;

    /// Positions the exchange currently holds. Used only for reconciliation.
    async fn open_positions(&self) -> Result<Vec<ExchangePosition>>;
}
