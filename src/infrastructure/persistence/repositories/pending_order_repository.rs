use crate::domain::market::Market;
use crate::domain::pending::{CancelReason, PendingOrder, PendingStatus, SubmitSnapshot};
use crate::domain::repositories::PendingOrderRepository;
use crate::domain::signal::Side;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Duration};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::str::FromStr;

pub struct SqlitePendingOrderRepository {
    database: Database,
}

impl SqlitePendingOrderRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn status_to_str(status: PendingStatus) -> String {
    status.to_string()
}

fn status_from_str(s: &str) -> Result<PendingStatus> {
    Ok(match s {
        "PENDING" => PendingStatus::Pending,
        "PARTIALLY_FILLED" => PendingStatus::PartiallyFilled,
        "FILLED" => PendingStatus::Filled,
        "CANCELLED" => PendingStatus::Cancelled,
        "REPLACED" => PendingStatus::Replaced,
        "EXPIRED" => PendingStatus::Expired,
        other => bail!("unknown pending status '{}'", other),
    })
}

fn cancel_reason_from_str(s: &str) -> Option<CancelReason> {
    match s {
        "TIMEOUT" => Some(CancelReason::Timeout),
        "PARTIAL_TIMEOUT" => Some(CancelReason::PartialTimeout),
        "PRICE_DRIFT" => Some(CancelReason::PriceDrift),
        "SPREAD_WIDENED" => Some(CancelReason::SpreadWidened),
        "MARKET_CONDITION" => Some(CancelReason::MarketCondition),
        "EXPIRED" => Some(CancelReason::Expired),
        "MANUAL" => Some(CancelReason::Manual),
        _ => None,
    }
}

fn row_to_pending(row: &SqliteRow) -> Result<PendingOrder> {
    let market: String = row.get("market");
    let side: String = row.get("side");
    let limit_price: String = row.get("limit_price");
    let quantity: String = row.get("quantity");
    let mid: String = row.get("snapshot_mid_price");
    let status: String = row.get("status");
    let filled: String = row.get("filled_quantity");
    let avg: String = row.get("avg_fill_price");
    let cancel_reason: Option<String> = row.get("cancel_reason");
    let created_at: i64 = row.get("created_at");
    let expires_at: i64 = row.get("expires_at");
    let last_checked_at: i64 = row.get("last_checked_at");

    let mut order = PendingOrder::new(
        row.get::<String, _>("order_id"),
        Market::parse(&market).map_err(anyhow::Error::from)?,
        match side.as_str() {
            "BUY" => Side::Buy,
            "SELL" => Side::Sell,
            other => bail!("unknown pending side '{}'", other),
        },
        Decimal::from_str(&limit_price).unwrap_or_default(),
        Decimal::from_str(&quantity).unwrap_or_default(),
        SubmitSnapshot {
            mid_price: Decimal::from_str(&mid).unwrap_or_default(),
            spread_percent: row.get("snapshot_spread_percent"),
            volatility_percent: row.get("snapshot_volatility_percent"),
            orderbook_imbalance: row.get("snapshot_imbalance"),
        },
        row.get::<String, _>("strategy"),
        row.get("confidence"),
        Duration::zero(),
    );

    order.restore_status(status_from_str(&status)?);
    order.filled_quantity = Decimal::from_str(&filled).unwrap_or_default();
    order.avg_fill_price = Decimal::from_str(&avg).unwrap_or_default();
    order.fill_duration_ms = row.get("fill_duration_ms");
    order.slippage_percent = row.get("slippage_percent");
    order.cancel_reason = cancel_reason.as_deref().and_then(cancel_reason_from_str);
    order.note = row.get("note");
    order.created_at =
        DateTime::from_timestamp_millis(created_at).context("invalid created_at")?;
    order.expires_at =
        DateTime::from_timestamp_millis(expires_at).context("invalid expires_at")?;
    order.last_checked_at =
        DateTime::from_timestamp_millis(last_checked_at).context("invalid last_checked_at")?;
    order.check_count = row.get::<i64, _>("check_count") as u32;
    Ok(order)
}

#[async_trait]
impl PendingOrderRepository for SqlitePendingOrderRepository {
    async fn insert(&self, order: &PendingOrder) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_orders (
                order_id, market, side, limit_price, quantity, notional,
                snapshot_mid_price, snapshot_spread_percent,
                snapshot_volatility_percent, snapshot_imbalance,
                strategy, confidence, status, filled_quantity, avg_fill_price,
                fill_duration_ms, slippage_percent, cancel_reason, note,
                created_at, expires_at, last_checked_at, check_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(&order.order_id)
        .bind(order.market.as_str())
        .bind(order.side.to_string())
        .bind(order.limit_price.to_string())
        .bind(order.quantity.to_string())
        .bind(order.notional.to_string())
        .bind(order.snapshot.mid_price.to_string())
        .bind(order.snapshot.spread_percent)
        .bind(order.snapshot.volatility_percent)
        .bind(order.snapshot.orderbook_imbalance)
        .bind(&order.strategy)
        .bind(order.confidence)
        .bind(status_to_str(order.status()))
        .bind(order.filled_quantity.to_string())
        .bind(order.avg_fill_price.to_string())
        .bind(order.fill_duration_ms)
        .bind(order.slippage_percent)
        .bind(order.cancel_reason.map(|r| r.to_string()))
        .bind(&order.note)
        .bind(order.created_at.timestamp_millis())
        .bind(order.expires_at.timestamp_millis())
        .bind(order.last_checked_at.timestamp_millis())
        .bind(order.check_count as i64)
        .execute(&self.database.pool)
        .await
        .context("Failed to insert pending order")?;
        Ok(())
    }

    async fn update(&self, order: &PendingOrder) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE pending_orders SET
                status = $2,
                filled_quantity = $3,
                avg_fill_price = $4,
                fill_duration_ms = $5,
                slippage_percent = $6,
                cancel_reason = $7,
                note = $8,
                expires_at = $9,
                last_checked_at = $10,
                check_count = $11
            WHERE order_id = $1
            "#,
        )
        .bind(&order.order_id)
        .bind(status_to_str(order.status()))
        .bind(order.filled_quantity.to_string())
        .bind(order.avg_fill_price.to_string())
        .bind(order.fill_duration_ms)
        .bind(order.slippage_percent)
        .bind(order.cancel_reason.map(|r| r.to_string()))
        .bind(&order.note)
        .bind(order.expires_at.timestamp_millis())
        .bind(order.last_checked_at.timestamp_millis())
        .bind(order.check_count as i64)
        .execute(&self.database.pool)
        .await
        .context("Failed to update pending order")?;
        Ok(())
    }

    async fn find_active(&self) -> Result<Vec<PendingOrder>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM pending_orders
            WHERE status IN ('PENDING', 'PARTIALLY_FILLED')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load active pending orders")?;
        rows.iter().map(row_to_pending).collect()
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<PendingOrder>> {
        let row = sqlx::query("SELECT * FROM pending_orders WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load pending order")?;
        row.as_ref().map(row_to_pending).transpose()
    }
}
