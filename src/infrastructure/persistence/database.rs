use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared SQLite handle. All monetary columns are stored as TEXT-encoded
/// decimals; all timestamps as UTC epoch milliseconds.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL,
                market TEXT NOT NULL,
                side TEXT NOT NULL,
                order_type TEXT NOT NULL,
                price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                total TEXT NOT NULL,
                fee TEXT NOT NULL,
                slippage_percent REAL NOT NULL DEFAULT 0,
                is_partial_fill BOOLEAN NOT NULL DEFAULT 0,
                pnl TEXT,
                pnl_percent REAL,
                strategy TEXT NOT NULL DEFAULT '',
                regime TEXT,
                confidence REAL NOT NULL DEFAULT 0,
                reason TEXT NOT NULL DEFAULT '',
                simulated BOOLEAN NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_market_sim_time
            ON trades (market, simulated, created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create trades table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pending_orders (
                order_id TEXT PRIMARY KEY,
                market TEXT NOT NULL,
                side TEXT NOT NULL,
                limit_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                notional TEXT NOT NULL,
                snapshot_mid_price TEXT NOT NULL,
                snapshot_spread_percent REAL NOT NULL,
                snapshot_volatility_percent REAL NOT NULL,
                snapshot_imbalance REAL NOT NULL,
                strategy TEXT NOT NULL DEFAULT '',
                confidence REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                filled_quantity TEXT NOT NULL,
                avg_fill_price TEXT NOT NULL,
                fill_duration_ms INTEGER,
                slippage_percent REAL,
                cancel_reason TEXT,
                note TEXT,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                last_checked_at INTEGER NOT NULL,
                check_count INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_pending_orders_status
            ON pending_orders (status);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create pending_orders table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                market TEXT NOT NULL,
                strategy TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                entry_time INTEGER NOT NULL,
                status TEXT NOT NULL,
                exit_price TEXT,
                exit_time INTEGER,
                exit_reason TEXT,
                pnl_amount TEXT,
                pnl_percent REAL
            );
            CREATE INDEX IF NOT EXISTS idx_positions_status_market
            ON positions (status, market);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create positions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recovery_tasks (
                id TEXT PRIMARY KEY,
                strategy TEXT NOT NULL,
                position_id TEXT NOT NULL,
                market TEXT NOT NULL,
                target_quantity TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                last_known_price TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                next_attempt_at INTEGER NOT NULL,
                status TEXT NOT NULL,
                reason TEXT NOT NULL DEFAULT '',
                last_error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_recovery_tasks_status_due
            ON recovery_tasks (status, next_attempt_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create recovery_tasks table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_stats (
                day DATE PRIMARY KEY,
                realized_pnl TEXT NOT NULL,
                fees TEXT NOT NULL,
                trade_count INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create daily_stats table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                market TEXT,
                detail TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_log_kind_time
            ON audit_log (kind, created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create audit_log table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
