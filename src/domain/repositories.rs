//! Repository traits separating the services from storage. SQLite
//! implementations live in `infrastructure::persistence`; in-memory
//! implementations back the tests and the simulated mode.

use crate::domain::market::Market;
use crate::domain::pending::PendingOrder;
use crate::domain::position::{CloseFill, Position};
use crate::domain::recovery::CloseRecoveryTask;
use crate::domain::trade::Trade;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

/// Append-only store of execution records.
#[async_trait]
pub trait TradeRepository: Send + Sync {
    /// Insert a record. Implementations reject price <= 0 or quantity <= 0.
    async fn insert(&self, trade: &Trade) -> Result<()>;

    /// All trades for a market with the given simulation flag, oldest first.
    /// This ordering is what the FIFO PnL reconstruction depends on.
    async fn find_by_market(&self, market: &Market, simulated: bool) -> Result<Vec<Trade>>;

    async fn find_recent(&self, limit: usize) -> Result<Vec<Trade>>;

    async fn count(&self) -> Result<u64>;
}

/// Durable records of limit orders under supervision.
#[async_trait]
pub trait PendingOrderRepository: Send + Sync {
    async fn insert(&self, order: &PendingOrder) -> Result<()>;

    async fn update(&self, order: &PendingOrder) -> Result<()>;

    /// All non-terminal records.
    async fn find_active(&self) -> Result<Vec<PendingOrder>>;

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<PendingOrder>>;
}

/// Per-strategy position store; the source of truth for position existence.
#[async_trait]
pub trait PositionRepository: Send + Sync {
    async fn insert(&self, position: &Position) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Position>>;

    async fn find_open(&self) -> Result<Vec<Position>>;

    async fn find_open_by_market(&self, market: &Market) -> Result<Vec<Position>>;

    /// Close a position. Returns false when the position was not OPEN (the
    /// close-at-most-once invariant lives here as a conditional update).
    async fn close(&self, id: &str, fill: &CloseFill) -> Result<bool>;
}

/// Close-recovery task queue.
#[async_trait]
pub trait RecoveryTaskRepository: Send + Sync {
    /// Enqueue with upsert semantics: an existing active task for the same
    /// (strategy, position_id) is refreshed in place. Returns the stored task.
    async fn enqueue(&self, task: CloseRecoveryTask) -> Result<CloseRecoveryTask>;

    async fn update(&self, task: &CloseRecoveryTask) -> Result<()>;

    async fn find_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CloseRecoveryTask>>;

    async fn find_active_by_position(
        &self,
        strategy: &str,
        position_id: &str,
    ) -> Result<Option<CloseRecoveryTask>>;
}

/// One realized-PnL rollup row per Asia/Seoul calendar day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyStats {
    pub realized_pnl: Decimal,
    pub fees: Decimal,
    pub trade_count: u64,
}

#[async_trait]
pub trait DailyStatsRepository: Send + Sync {
    async fn apply_trade(&self, day: NaiveDate, realized_pnl: Decimal, fee: Decimal) -> Result<()>;

    async fn get(&self, day: NaiveDate) -> Result<DailyStats>;
}

/// Append-only operational event log (breaker trips, reconciliation actions,
/// recovery completions, manual interventions).
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, kind: &str, market: Option<&Market>, detail: &str) -> Result<()>;
}
