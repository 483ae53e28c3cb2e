use crate::domain::market::Market;
use crate::domain::position::{CloseFill, CloseReason, Position, PositionStatus};
use crate::domain::repositories::PositionRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::DateTime;
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::str::FromStr;

pub struct SqlitePositionRepository {
    database: Database,
}

impl SqlitePositionRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn status_from_str(s: &str) -> Result<PositionStatus> {
    Ok(match s {
        "OPEN" => PositionStatus::Open,
        "CLOSED" => PositionStatus::Closed,
        "ABANDONED" => PositionStatus::Abandoned,
        other => bail!("unknown position status '{}'", other),
    })
}

fn row_to_position(row: &SqliteRow) -> Result<Position> {
    let market: String = row.get("market");
    let entry_price: String = row.get("entry_price");
    let quantity: String = row.get("quantity");
    let entry_time: i64 = row.get("entry_time");
    let status: String = row.get("status");
    let exit_price: Option<String> = row.get("exit_price");
    let exit_time: Option<i64> = row.get("exit_time");
    let exit_reason: Option<String> = row.get("exit_reason");
    let pnl_amount: Option<String> = row.get("pnl_amount");

    Ok(Position {
        id: row.get("id"),
        market: Market::parse(&market).map_err(anyhow::Error::from)?,
        strategy: row.get("strategy"),
        entry_price: Decimal::from_str(&entry_price).unwrap_or_default(),
        quantity: Decimal::from_str(&quantity).unwrap_or_default(),
        entry_time: DateTime::from_timestamp_millis(entry_time)
            .context("invalid position entry time")?,
        status: status_from_str(&status)?,
        exit_price: exit_price.and_then(|p| Decimal::from_str(&p).ok()),
        exit_time: exit_time.and_then(DateTime::from_timestamp_millis),
        exit_reason: exit_reason.as_deref().and_then(CloseReason::parse),
        pnl_amount: pnl_amount.and_then(|p| Decimal::from_str(&p).ok()),
        pnl_percent: row.get("pnl_percent"),
    })
}

#[async_trait]
impl PositionRepository for SqlitePositionRepository {
    async fn insert(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, market, strategy, entry_price, quantity, entry_time, status,
                exit_price, exit_time, exit_reason, pnl_amount, pnl_percent
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&position.id)
        .bind(position.market.as_str())
        .bind(&position.strategy)
        .bind(position.entry_price.to_string())
        .bind(position.quantity.to_string())
        .bind(position.entry_time.timestamp_millis())
        .bind(position.status.to_string())
        .bind(position.exit_price.map(|p| p.to_string()))
        .bind(position.exit_time.map(|t| t.timestamp_millis()))
        .bind(position.exit_reason.map(|r| r.to_string()))
        .bind(position.pnl_amount.map(|p| p.to_string()))
        .bind(position.pnl_percent)
        .execute(&self.database.pool)
        .await
        .context("Failed to insert position")?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load position")?;
        row.as_ref().map(row_to_position).transpose()
    }

    async fn find_open(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            "SELECT * FROM positions WHERE status = 'OPEN' ORDER BY entry_time ASC",
        )
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load open positions")?;
        rows.iter().map(row_to_position).collect()
    }

    async fn find_open_by_market(&self, market: &Market) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM positions
            WHERE status = 'OPEN' AND market = $1
            ORDER BY entry_time ASC
            "#,
        )
        .bind(market.as_str())
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load open positions by market")?;
        rows.iter().map(row_to_position).collect()
    }

    async fn close(&self, id: &str, fill: &CloseFill) -> Result<bool> {
        // Conditional update on OPEN: this is where close-at-most-once lives.
        let result = sqlx::query(
            r#"
            UPDATE positions SET
                status = 'CLOSED',
                exit_price = $2,
                exit_time = $3,
                exit_reason = $4,
                pnl_amount = $5,
                pnl_percent = $6
            WHERE id = $1 AND status = 'OPEN'
            "#,
        )
        .bind(id)
        .bind(fill.exit_price.to_string())
        .bind(fill.exit_time.timestamp_millis())
        .bind(fill.reason.to_string())
        .bind(fill.pnl_amount.to_string())
        .bind(fill.pnl_percent)
        .execute(&self.database.pool)
        .await
        .context("Failed to close position")?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn position() -> Position {
        Position::open(Market::parse("KRW-XRP").unwrap(), "DCA", dec!(500), dec!(20))
    }

    #[tokio::test]
    async fn test_insert_and_find_open() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqlitePositionRepository::new(db);
        let p = position();
        repo.insert(&p).await.unwrap();

        let open = repo.find_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, p.id);
        assert_eq!(open[0].entry_price, dec!(500));
        assert!(open[0].is_open());

        let by_market = repo
            .find_open_by_market(&Market::parse("KRW-XRP").unwrap())
            .await
            .unwrap();
        assert_eq!(by_market.len(), 1);
        assert!(
            repo.find_open_by_market(&Market::parse("KRW-BTC").unwrap())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_close_happens_at_most_once() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqlitePositionRepository::new(db);
        let p = position();
        repo.insert(&p).await.unwrap();

        let fill = CloseFill::from_prices(
            dec!(500),
            dec!(20),
            dec!(550),
            Utc::now(),
            CloseReason::SyncConfirmed,
        );
        assert!(repo.close(&p.id, &fill).await.unwrap());
        // Second close is a no-op
        assert!(!repo.close(&p.id, &fill).await.unwrap());

        let loaded = repo.find_by_id(&p.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PositionStatus::Closed);
        assert_eq!(loaded.exit_price, Some(dec!(550)));
        assert_eq!(loaded.exit_reason, Some(CloseReason::SyncConfirmed));
        assert!((loaded.pnl_percent.unwrap() - 10.0).abs() < 1e-9);
        assert!(repo.find_open().await.unwrap().is_empty());
    }
}
