use crate::domain::market::Market;
use crate::domain::repositories::TradeRepository;
use crate::domain::signal::Side;
use crate::domain::trade::{OrderType, Trade};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::DateTime;
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::str::FromStr;

pub struct SqliteTradeRepository {
    database: Database,
}

impl SqliteTradeRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn row_to_trade(row: &SqliteRow) -> Result<Trade> {
    let market: String = row.get("market");
    let side: String = row.get("side");
    let order_type: String = row.get("order_type");
    let price: String = row.get("price");
    let quantity: String = row.get("quantity");
    let total: String = row.get("total");
    let fee: String = row.get("fee");
    let pnl: Option<String> = row.get("pnl");
    let created_at: i64 = row.get("created_at");

    Ok(Trade {
        id: row.get("id"),
        order_id: row.get("order_id"),
        market: Market::parse(&market).map_err(anyhow::Error::from)?,
        side: match side.as_str() {
            "BUY" => Side::Buy,
            "SELL" => Side::Sell,
            other => bail!("unknown trade side '{}'", other),
        },
        order_type: match order_type.as_str() {
            "MARKET" => OrderType::Market,
            "LIMIT" => OrderType::Limit,
            other => bail!("unknown order type '{}'", other),
        },
        price: Decimal::from_str(&price).unwrap_or_default(),
        quantity: Decimal::from_str(&quantity).unwrap_or_default(),
        total: Decimal::from_str(&total).unwrap_or_default(),
        fee: Decimal::from_str(&fee).unwrap_or_default(),
        slippage_percent: row.get("slippage_percent"),
        is_partial_fill: row.get("is_partial_fill"),
        pnl: pnl.and_then(|p| Decimal::from_str(&p).ok()),
        pnl_percent: row.get("pnl_percent"),
        strategy: row.get("strategy"),
        regime: row.get("regime"),
        confidence: row.get("confidence"),
        reason: row.get("reason"),
        simulated: row.get("simulated"),
        created_at: DateTime::from_timestamp_millis(created_at)
            .context("invalid trade timestamp")?,
    })
}

#[async_trait]
impl TradeRepository for SqliteTradeRepository {
    async fn insert(&self, trade: &Trade) -> Result<()> {
        // Defensive re-check of the persistence invariant; the constructors
        // already enforce it.
        if trade.price <= Decimal::ZERO || trade.quantity <= Decimal::ZERO {
            bail!(
                "refusing to persist trade {} with price {} / quantity {}",
                trade.id,
                trade.price,
                trade.quantity
            );
        }

        sqlx::query(
            r#"
            INSERT INTO trades (
                id, order_id, market, side, order_type, price, quantity, total,
                fee, slippage_percent, is_partial_fill, pnl, pnl_percent,
                strategy, regime, confidence, reason, simulated, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.order_id)
        .bind(trade.market.as_str())
        .bind(trade.side.to_string())
        .bind(trade.order_type.to_string())
        .bind(trade.price.to_string())
        .bind(trade.quantity.to_string())
        .bind(trade.total.to_string())
        .bind(trade.fee.to_string())
        .bind(trade.slippage_percent)
        .bind(trade.is_partial_fill)
        .bind(trade.pnl.map(|p| p.to_string()))
        .bind(trade.pnl_percent)
        .bind(&trade.strategy)
        .bind(&trade.regime)
        .bind(trade.confidence)
        .bind(&trade.reason)
        .bind(trade.simulated)
        .bind(trade.created_at.timestamp_millis())
        .execute(&self.database.pool)
        .await
        .context("Failed to insert trade")?;

        Ok(())
    }

    async fn find_by_market(&self, market: &Market, simulated: bool) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM trades
            WHERE market = $1 AND simulated = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(market.as_str())
        .bind(simulated)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load trades by market")?;

        rows.iter().map(row_to_trade).collect()
    }

    async fn find_recent(&self, limit: usize) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM trades
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load recent trades")?;

        rows.iter().map(row_to_trade).collect()
    }

    async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trades")
            .fetch_one(&self.database.pool)
            .await
            .context("Failed to count trades")?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(side: Side, price: Decimal, quantity: Decimal) -> Trade {
        Trade::new(
            "order-1",
            Market::parse("KRW-BTC").unwrap(),
            side,
            OrderType::Market,
            price,
            quantity,
            dec!(4),
        )
        .unwrap()
        .with_signal_context("MEME_SCALPER", Some("BULL"), 90.0, "surge entry")
    }

    #[tokio::test]
    async fn test_insert_and_round_trip() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteTradeRepository::new(db);
        let original = trade(Side::Buy, dec!(100000000), dec!(0.0001));
        repo.insert(&original).await.unwrap();

        let loaded = repo
            .find_by_market(&Market::parse("KRW-BTC").unwrap(), false)
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1);
        let t = &loaded[0];
        assert_eq!(t.id, original.id);
        assert_eq!(t.price, original.price);
        assert_eq!(t.quantity, original.quantity);
        assert_eq!(t.side, Side::Buy);
        assert_eq!(t.strategy, "MEME_SCALPER");
        assert_eq!(t.regime.as_deref(), Some("BULL"));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_by_market_orders_oldest_first() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteTradeRepository::new(db);
        let mut first = trade(Side::Buy, dec!(100), dec!(1));
        first.created_at = DateTime::from_timestamp_millis(1_000).unwrap();
        let mut second = trade(Side::Buy, dec!(200), dec!(1));
        second.created_at = DateTime::from_timestamp_millis(2_000).unwrap();

        // Insert newest first to prove ordering comes from the query
        repo.insert(&second).await.unwrap();
        repo.insert(&first).await.unwrap();

        let loaded = repo
            .find_by_market(&Market::parse("KRW-BTC").unwrap(), false)
            .await
            .unwrap();
        assert_eq!(loaded[0].price, dec!(100));
        assert_eq!(loaded[1].price, dec!(200));
    }

    #[tokio::test]
    async fn test_simulated_flag_partitions_history() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteTradeRepository::new(db);
        let mut sim = trade(Side::Buy, dec!(100), dec!(1));
        sim.simulated = true;
        repo.insert(&sim).await.unwrap();
        repo.insert(&trade(Side::Buy, dec!(200), dec!(1)))
            .await
            .unwrap();

        let market = Market::parse("KRW-BTC").unwrap();
        assert_eq!(repo.find_by_market(&market, true).await.unwrap().len(), 1);
        assert_eq!(repo.find_by_market(&market, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_price_rejected_at_the_repo_too() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteTradeRepository::new(db);
        let mut bad = trade(Side::Buy, dec!(100), dec!(1));
        bad.price = Decimal::ZERO;
        assert!(repo.insert(&bad).await.is_err());
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
