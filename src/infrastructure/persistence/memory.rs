//! Thread-safe in-memory repository implementations. They back the test
//! suites and key-less simulated runs; the SQLite implementations are the
//! production path.

use crate::domain::market::Market;
use crate::domain::pending::PendingOrder;
use crate::domain::position::{CloseFill, Position};
use crate::domain::recovery::CloseRecoveryTask;
use crate::domain::repositories::{
    AuditLogRepository, DailyStats, DailyStatsRepository, PendingOrderRepository,
    PositionRepository, RecoveryTaskRepository, TradeRepository,
};
use crate::domain::trade::Trade;
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryTradeRepository {
    trades: RwLock<Vec<Trade>>,
}

impl InMemoryTradeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradeRepository for InMemoryTradeRepository {
    async fn insert(&self, trade: &Trade) -> Result<()> {
        if trade.price <= Decimal::ZERO || trade.quantity <= Decimal::ZERO {
            bail!(
                "refusing to persist trade {} with price {} / quantity {}",
                trade.id,
                trade.price,
                trade.quantity
            );
        }
        self.trades.write().await.push(trade.clone());
        Ok(())
    }

    async fn find_by_market(&self, market: &Market, simulated: bool) -> Result<Vec<Trade>> {
        let mut trades: Vec<Trade> = self
            .trades
            .read()
            .await
            .iter()
            .filter(|t| t.market == *market && t.simulated == simulated)
            .cloned()
            .collect();
        trades.sort_by_key(|t| t.created_at);
        Ok(trades)
    }

    async fn find_recent(&self, limit: usize) -> Result<Vec<Trade>> {
        let mut trades: Vec<Trade> = self.trades.read().await.clone();
        trades.sort_by_key(|t| std::cmp::Reverse(t.created_at));
        trades.truncate(limit);
        Ok(trades)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.trades.read().await.len() as u64)
    }
}

#[derive(Default)]
pub struct InMemoryPendingOrderRepository {
    orders: RwLock<HashMap<String, PendingOrder>>,
}

impl InMemoryPendingOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingOrderRepository for InMemoryPendingOrderRepository {
    async fn insert(&self, order: &PendingOrder) -> Result<()> {
        self.orders
            .write()
            .await
            .insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    async fn update(&self, order: &PendingOrder) -> Result<()> {
        let mut orders = self.orders.write().await;
        if !orders.contains_key(&order.order_id) {
            bail!("pending order {} not found", order.order_id);
        }
        orders.insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    async fn find_active(&self) -> Result<Vec<PendingOrder>> {
        let mut active: Vec<PendingOrder> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| !o.is_terminal())
            .cloned()
            .collect();
        active.sort_by_key(|o| o.created_at);
        Ok(active)
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<PendingOrder>> {
        Ok(self.orders.read().await.get(order_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryPositionRepository {
    positions: RwLock<HashMap<String, Position>>,
}

impl InMemoryPositionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionRepository for InMemoryPositionRepository {
    async fn insert(&self, position: &Position) -> Result<()> {
        self.positions
            .write()
            .await
            .insert(position.id.clone(), position.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Position>> {
        Ok(self.positions.read().await.get(id).cloned())
    }

    async fn find_open(&self) -> Result<Vec<Position>> {
        let mut open: Vec<Position> = self
            .positions
            .read()
            .await
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|p| p.entry_time);
        Ok(open)
    }

    async fn find_open_by_market(&self, market: &Market) -> Result<Vec<Position>> {
        Ok(self
            .find_open()
            .await?
            .into_iter()
            .filter(|p| p.market == *market)
            .collect())
    }

    async fn close(&self, id: &str, fill: &CloseFill) -> Result<bool> {
        let mut positions = self.positions.write().await;
        match positions.get_mut(id) {
            Some(position) if position.is_open() => {
                position.apply_close(fill);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryRecoveryTaskRepository {
    tasks: RwLock<HashMap<String, CloseRecoveryTask>>,
}

impl InMemoryRecoveryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecoveryTaskRepository for InMemoryRecoveryTaskRepository {
    async fn enqueue(&self, task: CloseRecoveryTask) -> Result<CloseRecoveryTask> {
        let mut tasks = self.tasks.write().await;
        if let Some(existing) = tasks
            .values_mut()
            .find(|t| {
                t.strategy == task.strategy
                    && t.position_id == task.position_id
                    && t.status.is_active()
            })
        {
            existing.refresh(task.target_quantity, task.last_known_price, &task.reason);
            return Ok(existing.clone());
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn update(&self, task: &CloseRecoveryTask) -> Result<()> {
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn find_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CloseRecoveryTask>> {
        let mut due: Vec<CloseRecoveryTask> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|t| t.next_attempt_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn find_active_by_position(
        &self,
        strategy: &str,
        position_id: &str,
    ) -> Result<Option<CloseRecoveryTask>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .find(|t| {
                t.strategy == strategy && t.position_id == position_id && t.status.is_active()
            })
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryDailyStatsRepository {
    days: RwLock<HashMap<NaiveDate, DailyStats>>,
}

impl InMemoryDailyStatsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DailyStatsRepository for InMemoryDailyStatsRepository {
    async fn apply_trade(&self, day: NaiveDate, realized_pnl: Decimal, fee: Decimal) -> Result<()> {
        let mut days = self.days.write().await;
        let stats = days.entry(day).or_default();
        stats.realized_pnl += realized_pnl;
        stats.fees += fee;
        stats.trade_count += 1;
        Ok(())
    }

    async fn get(&self, day: NaiveDate) -> Result<DailyStats> {
        Ok(self.days.read().await.get(&day).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub kind: String,
    pub market: Option<String>,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryAuditLogRepository {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl AuditLogRepository for InMemoryAuditLogRepository {
    async fn append(&self, kind: &str, market: Option<&Market>, detail: &str) -> Result<()> {
        self.entries.write().await.push(AuditEntry {
            kind: kind.to_string(),
            market: market.map(|m| m.as_str().to_string()),
            detail: detail.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }
}
