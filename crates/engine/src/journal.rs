use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use common::{CloseReason, Position, PositionId, Result, TradingMode};

/// Row of the `trades` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TradeRecord {
    pub id: String,
    pub symbol: String,
    pub mode: String,
    pub direction: String,
    pub trading_mode: String,
    pub exchange_ref: String,
    pub entry_price: f64,
    pub initial_quantity: f64,
    pub quantity: f64,
    pub confidence: f64,
    pub realized_pnl: f64,
    pub exit_price: Option<f64>,
    pub close_reason: Option<String>,
    pub status: String,
    pub opened_at: String,
    pub closed_at: Option<String>,
}

/// Apply the workspace migrations to `db`.
pub async fn migrate(db: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(db)
        .await
        .map_err(|e| common::Error::Database(e.into()))
}

/// Persists opened and closed trades to SQLite.
///
/// Journal writes never gate trading: callers log failures and move on.
#[derive(Clone)]
pub struct TradeJournal {
    db: SqlitePool,
    mode: TradingMode,
}

impl TradeJournal {
    pub fn new(db: SqlitePool, mode: TradingMode) -> Self {
        Self { db, mode }
    }

    pub async fn record_open(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (id, symbol, mode, direction, trading_mode, exchange_ref,
                                entry_price, initial_quantity, quantity, confidence, opened_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&position.id.0)
        .bind(&position.symbol)
        .bind(position.mode.as_str())
        .bind(position.direction.to_string())
        .bind(self.mode.to_string())
        .bind(&position.exchange_ref.0)
        .bind(position.entry_price)
        .bind(position.initial_quantity)
        .bind(position.quantity)
        .bind(position.confidence)
        .bind(position.entry_time.to_rfc3339())
        .execute(&self.db)
        .await?;

        debug!(id = %position.id, symbol = %position.symbol, "Trade opened in journal");
        Ok(())
    }

    /// Record a close fill. `reason` is set when the fill closed the position.
    pub async fn record_fill(
        &self,
        id: &PositionId,
        remaining: f64,
        fill_price: f64,
        realized_pnl: f64,
        at: DateTime<Utc>,
        reason: Option<&CloseReason>,
    ) -> Result<()> {
        let closed = reason.is_some();
        sqlx::query(
            r#"
            UPDATE trades
            SET quantity     = ?2,
                realized_pnl = realized_pnl + ?3,
                exit_price   = ?4,
                close_reason = COALESCE(?5, close_reason),
                status       = CASE WHEN ?6 THEN 'closed' ELSE 'partial' END,
                closed_at    = CASE WHEN ?6 THEN ?7 ELSE closed_at END
            WHERE id = ?1
            "#,
        )
        .bind(&id.0)
        .bind(remaining)
        .bind(realized_pnl)
        .bind(fill_price)
        .bind(reason.map(|r| r.to_string()))
        .bind(closed)
        .bind(at.to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Mark every non-closed trade as abandoned after a portfolio reset.
    pub async fn abandon_open(&self, at: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query(
            "UPDATE trades SET status = 'abandoned', closed_at = ?1 WHERE status != 'closed'",
        )
        .bind(at.to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected())
    }

    pub async fn trade(&self, id: &PositionId) -> Result<Option<TradeRecord>> {
        let row = sqlx::query_as::<_, TradeRecord>("SELECT * FROM trades WHERE id = ?1")
            .bind(&id.0)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Direction, ExchangePositionRef, ModeKind, TrailingPolicy};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::BTreeSet;

    async fn journal() -> TradeJournal {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate(&db).await.unwrap();
        TradeJournal::new(db, TradingMode::Paper)
    }

    fn position() -> Position {
        Position {
            id: PositionId::new(),
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            entry_price: 100.0,
            initial_quantity: 2.0,
            quantity: 2.0,
            mode: ModeKind::Conservative,
            confidence: 0.8,
            entry_time: Utc::now(),
            exchange_ref: ExchangePositionRef("paper-1".into()),
            notional_fraction: 0.03,
            profit_targets: Vec::new(),
            consumed_targets: BTreeSet::new(),
            stop_levels: Vec::new(),
            trailing_policy: TrailingPolicy { activation_pct: 0.005, distance_pct: 0.003 },
            trailing_stop: None,
            max_profit_seen: 0.0,
            last_price: 100.0,
            realized_pnl: 0.0,
        }
    }

    #[tokio::test]
    async fn open_then_partial_then_close() {
        let j = journal().await;
        let pos = position();
        j.record_open(&pos).await.unwrap();
        // Duplicate inserts are ignored.
        j.record_open(&pos).await.unwrap();

        j.record_fill(&pos.id, 1.0, 102.0, 2.0, Utc::now(), None).await.unwrap();
        let row = j.trade(&pos.id).await.unwrap().unwrap();
        assert_eq!(row.status, "partial");
        assert_eq!(row.quantity, 1.0);
        assert_eq!(row.mode, "conservative");
        assert_eq!(row.direction, "LONG");

        j.record_fill(&pos.id, 0.0, 99.0, -1.0, Utc::now(), Some(&CloseReason::Manual))
            .await
            .unwrap();
        let row = j.trade(&pos.id).await.unwrap().unwrap();
        assert_eq!(row.status, "closed");
        assert!((row.realized_pnl - 1.0).abs() < 1e-9);
        assert_eq!(row.close_reason.as_deref(), Some("manual close"));
        assert!(row.closed_at.is_some());
    }

    #[tokio::test]
    async fn abandon_marks_only_unclosed_trades() {
        let j = journal().await;
        let open = position();
        let closed = position();
        j.record_open(&open).await.unwrap();
        j.record_open(&closed).await.unwrap();
        j.record_fill(&closed.id, 0.0, 101.0, 2.0, Utc::now(), Some(&CloseReason::ProfitLadder))
            .await
            .unwrap();

        assert_eq!(j.abandon_open(Utc::now()).await.unwrap(), 1);
        assert_eq!(j.trade(&open.id).await.unwrap().unwrap().status, "abandoned");
        assert_eq!(j.trade(&closed.id).await.unwrap().unwrap().status, "closed");
    }
}
