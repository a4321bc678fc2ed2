use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    Balances, Direction, Error, ExchangePosition, ExchangePositionRef, ExecutionGateway, Fill,
    OpenConfirmation, OpenRequest, Result,
};

#[derive(Debug, Clone)]
struct PaperPosition {
    symbol: String,
    direction: Direction,
    entry_price: f64,
    quantity: f64,
}

/// Simulated execution gateway for paper trading.
///
/// Fills are simulated at the latest known price with configurable slippage.
/// Positions are fully collateralized: opening one locks its notional out of
/// the available balance until it is closed. No real orders are ever sent.
pub struct PaperGateway {
    /// Cash balance in USDT, including realized PnL.
    balance_usd: Arc<RwLock<f64>>,
    positions: Arc<RwLock<HashMap<ExchangePositionRef, PaperPosition>>>,
    /// Latest known price per symbol, updated via `update_price`.
    prices: Arc<RwLock<HashMap<String, f64>>>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
}

impl PaperGateway {
    pub fn new(initial_balance_usd: f64, slippage_bps: f64) -> Self {
        info!(
            balance = initial_balance_usd,
            slippage_bps = slippage_bps,
            "PaperGateway initialized"
        );
        Self {
            balance_usd: Arc::new(RwLock::new(initial_balance_usd)),
            positions: Arc::new(RwLock::new(HashMap::new())),
            prices: Arc::new(RwLock::new(HashMap::new())),
            slippage_bps,
        }
    }

    /// Update the latest price for a symbol (called by the market event loop).
    pub async fn update_price(&self, symbol: &str, price: f64) {
        if price.is_finite() && price > 0.0 {
            self.prices.write().await.insert(symbol.to_string(), price);
        }
    }

    /// Buys pay more, sells receive less.
    fn slipped(&self, mid: f64, buying: bool) -> f64 {
        let s = self.slippage_bps / 10_000.0;
        if buying {
            mid * (1.0 + s)
        } else {
            mid * (1.0 - s)
        }
    }

    async fn mid_price(&self, symbol: &str) -> Option<f64> {
        self.prices.read().await.get(symbol).copied()
    }

    async fn locked_notional(&self) -> f64 {
        self.positions
            .read()
            .await
            .values()
            .map(|p| p.entry_price * p.quantity)
            .sum()
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn open_position(&self, request: &OpenRequest) -> Result<OpenConfirmation> {
        if !(request.quantity.is_finite() && request.quantity > 0.0) {
            return Err(Error::GatewayRejected(format!(
                "invalid quantity {} for {}",
                request.quantity, request.symbol
            )));
        }
        // Before the first tick arrives, the signal's entry price is the best we know.
        let mid = match self.mid_price(&request.symbol).await {
            Some(p) => p,
            None if request.reference_price > 0.0 => request.reference_price,
            None => {
                return Err(Error::GatewayRejected(format!(
                    "PaperGateway has no price for '{}'. Ensure market events are flowing.",
                    request.symbol
                )))
            }
        };
        let fill_price = self.slipped(mid, request.direction == Direction::Long);

        let notional = fill_price * request.quantity;
        let available = *self.balance_usd.read().await - self.locked_notional().await;
        if notional > available {
            return Err(Error::GatewayRejected(format!(
                "insufficient balance: need {notional:.2}, available {available:.2}"
            )));
        }

        let position_ref = ExchangePositionRef(format!("paper-{}", uuid::Uuid::new_v4()));
        self.positions.write().await.insert(
            position_ref.clone(),
            PaperPosition {
                symbol: request.symbol.clone(),
                direction: request.direction,
                entry_price: fill_price,
                quantity: request.quantity,
            },
        );

        debug!(
            symbol = %request.symbol,
            direction = %request.direction,
            mid = mid,
            fill = fill_price,
            qty = request.quantity,
            stop = request.protective.stop_loss,
            "Paper open simulated"
        );

        Ok(OpenConfirmation {
            position_ref,
            fill_price,
            quantity: request.quantity,
            timestamp: Utc::now(),
        })
    }

    async fn close_position(&self, position_ref: &ExchangePositionRef, quantity: f64) -> Result<Fill> {
        let mut positions = self.positions.write().await;
        let position = positions
            .get_mut(position_ref)
            .ok_or_else(|| Error::GatewayRejected(format!("unknown position {position_ref}")))?;
        if !(quantity.is_finite() && quantity > 0.0) || quantity > position.quantity * (1.0 + 1e-9) {
            return Err(Error::GatewayRejected(format!(
                "cannot close {quantity} of {position_ref}, holding {}",
                position.quantity
            )));
        }

        let mid = self
            .prices
            .read()
            .await
            .get(&position.symbol)
            .copied()
            .unwrap_or(position.entry_price);
        // Closing a long sells, closing a short buys.
        let fill_price = self.slipped(mid, position.direction == Direction::Short);
        let closed = quantity.min(position.quantity);
        let pnl = position.direction.sign() * (fill_price - position.entry_price) * closed;

        position.quantity -= closed;
        if position.quantity <= 1e-12 {
            positions.remove(position_ref);
        }
        drop(positions);
        *self.balance_usd.write().await += pnl;

        debug!(%position_ref, fill = fill_price, qty = closed, pnl, "Paper close simulated");

        Ok(Fill {
            position_ref: position_ref.clone(),
            fill_price,
            quantity: closed,
            timestamp: Utc::now(),
        })
    }

    async fn account_state(&self) -> Result<Balances> {
        let balance = *self.balance_usd.read().await;
        // Same lock order as close_position: positions, then prices.
        let positions = self.positions.read().await;
        let prices = self.prices.read().await;

        let unrealized: f64 = positions
            .values()
            .map(|p| {
                let mark = prices.get(&p.symbol).copied().unwrap_or(p.entry_price);
                p.direction.sign() * (mark - p.entry_price) * p.quantity
            })
            .sum();
        let locked: f64 = positions.values().map(|p| p.entry_price * p.quantity).sum();

        Ok(Balances { equity: balance + unrealized, available: balance - locked })
    }

    async fn open_positions(&self) -> Result<Vec<ExchangePosition>> {
        Ok(self
            .positions
            .read()
            .await
            .iter()
            .map(|(r, p)| ExchangePosition {
                position_ref: r.clone(),
                symbol: p.symbol.clone(),
                direction: p.direction,
                quantity: p.quantity,
            })
            .collect())
    }
}
