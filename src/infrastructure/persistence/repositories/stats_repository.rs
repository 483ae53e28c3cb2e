use crate::domain::market::Market;
use crate::domain::repositories::{AuditLogRepository, DailyStatsRepository, DailyStats};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

pub struct SqliteDailyStatsRepository {
    database: Database,
}

impl SqliteDailyStatsRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl DailyStatsRepository for SqliteDailyStatsRepository {
    async fn apply_trade(&self, day: NaiveDate, realized_pnl: Decimal, fee: Decimal) -> Result<()> {
        // Read-modify-write keeps the Decimal arithmetic in one place; the
        // single-writer pool makes this safe enough for a rollup row.
        let current = self.get(day).await?;
        let updated = DailyStats {
            realized_pnl: current.realized_pnl + realized_pnl,
            fees: current.fees + fee,
            trade_count: current.trade_count + 1,
        };

        sqlx::query(
            r#"
            INSERT INTO daily_stats (day, realized_pnl, fees, trade_count)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT(day) DO UPDATE SET
                realized_pnl = excluded.realized_pnl,
                fees = excluded.fees,
                trade_count = excluded.trade_count
            "#,
        )
        .bind(day)
        .bind(updated.realized_pnl.to_string())
        .bind(updated.fees.to_string())
        .bind(updated.trade_count as i64)
        .execute(&self.database.pool)
        .await
        .context("Failed to upsert daily stats")?;
        Ok(())
    }

    async fn get(&self, day: NaiveDate) -> Result<DailyStats> {
        let row = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT realized_pnl, fees, trade_count FROM daily_stats WHERE day = $1",
        )
        .bind(day)
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load daily stats")?;

        Ok(match row {
            Some((pnl, fees, count)) => DailyStats {
                realized_pnl: Decimal::from_str(&pnl).unwrap_or_default(),
                fees: Decimal::from_str(&fees).unwrap_or_default(),
                trade_count: count as u64,
            },
            None => DailyStats::default(),
        })
    }
}

pub struct SqliteAuditLogRepository {
    database: Database,
}

impl SqliteAuditLogRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl AuditLogRepository for SqliteAuditLogRepository {
    async fn append(&self, kind: &str, market: Option<&Market>, detail: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (kind, market, detail, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(kind)
        .bind(market.map(|m| m.as_str().to_string()))
        .bind(detail)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.database.pool)
        .await
        .context("Failed to append audit log")?;
        Ok(())
    }
}
