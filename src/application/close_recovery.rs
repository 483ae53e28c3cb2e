use crate::application::execution::executor::OrderExecutor;
use crate::application::market_locks::MarketLocks;
use crate::application::position_registry::PositionRegistry;
use crate::config::WorkerEnvConfig;
use crate::domain::errors::ExecutionError;
use crate::domain::market::Market;
use crate::domain::ports::{AlertLevel, ExchangeGateway, Notifier};
use crate::domain::position::{CloseFill, CloseReason, Position};
use crate::domain::recovery::{CloseRecoveryTask, RecoveryStatus};
use crate::domain::repositories::{
    AuditLogRepository, PositionRepository, RecoveryTaskRepository,
};
use crate::domain::signal::{Side, TradingSignal};
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Due tasks taken per poll.
const POLL_BATCH: usize = 20;

/// Coin amounts below this count as no balance.
const BALANCE_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 8);

/// Retries exits that failed at the strategy level: sell rejected, no
/// balance, API error. Tasks back off exponentially and resolve either by
/// executing the exit or by closing the position with an explanatory reason.
pub struct CloseRecoveryQueue {
    tasks: Arc<dyn RecoveryTaskRepository>,
    positions: Arc<dyn PositionRepository>,
    gateway: Arc<dyn ExchangeGateway>,
    executor: Arc<OrderExecutor>,
    registry: Arc<PositionRegistry>,
    locks: Arc<MarketLocks>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditLogRepository>,
    config: WorkerEnvConfig,
    min_order_krw: Decimal,
}

impl CloseRecoveryQueue {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<dyn RecoveryTaskRepository>,
        positions: Arc<dyn PositionRepository>,
        gateway: Arc<dyn ExchangeGateway>,
        executor: Arc<OrderExecutor>,
        registry: Arc<PositionRegistry>,
        locks: Arc<MarketLocks>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLogRepository>,
        config: WorkerEnvConfig,
        min_order_krw: Decimal,
    ) -> Self {
        Self {
            tasks,
            positions,
            gateway,
            executor,
            registry,
            locks,
            notifier,
            audit,
            config,
            min_order_krw,
        }
    }

    /// Register a failed exit for retry. One active task per
    /// (strategy, position_id): a duplicate enqueue refreshes the existing
    /// task instead of stacking a second one.
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue(
        &self,
        strategy: &str,
        position_id: &str,
        market: Market,
        target_quantity: Decimal,
        entry_price: Decimal,
        last_known_price: Decimal,
        reason: &str,
    ) -> Result<CloseRecoveryTask> {
        let task = CloseRecoveryTask::new(
            strategy,
            position_id,
            market,
            target_quantity,
            entry_price,
            last_known_price,
            reason,
        );
        let stored = self.tasks.enqueue(task).await?;
        info!(
            "CloseRecovery [{}]: task {} enqueued for position {} ({})",
            stored.market, stored.id, stored.position_id, stored.reason
        );
        Ok(stored)
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = time::interval(Duration::from_secs(self.config.recovery_poll_secs));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "CloseRecoveryQueue started (poll every {}s)",
            self.config.recovery_poll_secs
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!("CloseRecovery poll failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    info!("CloseRecoveryQueue shutting down");
                    break;
                }
            }
        }
    }

    /// Process all currently due tasks.
    pub async fn poll_once(&self) -> Result<()> {
        let due = self.tasks.find_due(Utc::now(), POLL_BATCH).await?;
        for task in due {
            if let Err(e) = self.process_task(task).await {
                error!("CloseRecovery: task processing failed: {}", e);
            }
        }
        Ok(())
    }

    async fn process_task(&self, mut task: CloseRecoveryTask) -> Result<()> {
        let market = task.market.clone();

        // Skip when the market is busy elsewhere (pending cancel, another
        // recovery); the task stays due and is picked up next poll.
        let Some(_guard) = self.locks.try_lock(&market) else {
            debug!("CloseRecovery [{}]: market busy, task {} deferred", market, task.id);
            return Ok(());
        };

        task.status = RecoveryStatus::Processing;
        self.tasks.update(&task).await?;

        // Already closed elsewhere (reconciliation, manual): nothing to do.
        let position = self.positions.find_by_id(&task.position_id).await?;
        let Some(position) = position.filter(|p| p.is_open()) else {
            info!(
                "CloseRecovery [{}]: position {} already closed, completing task {}",
                market, task.position_id, task.id
            );
            task.complete();
            return self.tasks.update(&task).await;
        };

        // No balance left: the exit happened outside our books.
        let coin_balance = self.coin_balance(&market).await;
        if let Some(balance) = coin_balance
            && balance <= BALANCE_EPSILON
        {
            let last_price = task.last_known_price;
            return self
                .close_and_complete(&mut task, &position, last_price, CloseReason::RecoveryNoBalance)
                .await;
        }

        let price = match self.gateway.get_current_price(&market).await {
            Ok(price) if price > Decimal::ZERO => price,
            Ok(_) | Err(_) => {
                self.fail_task(&mut task, "no current price available").await?;
                return Ok(());
            }
        };

        // Dust: a sub-minimum remainder cannot be sold; close and warn.
        let quantity = coin_balance
            .map(|b| b.min(task.target_quantity))
            .unwrap_or(task.target_quantity);
        let notional = (quantity * price).round_dp(0);
        if notional < self.min_order_krw {
            self.notifier
                .notify(
                    AlertLevel::Warning,
                    "Dust position closed",
                    &format!(
                        "{}: remaining {} worth {} KRW is below the {} KRW minimum",
                        market, quantity, notional, self.min_order_krw
                    ),
                )
                .await;
            return self
                .close_and_complete(&mut task, &position, price, CloseReason::RecoveryDust)
                .await;
        }

        // Attempt the exit through the normal execution pipeline.
        let signal = TradingSignal::new(market.clone(), Side::Sell, price, 100.0)
            .with_strategy(task.strategy.clone())
            .with_reason(format!(
                "close recovery attempt {} for position {}",
                task.attempt_count + 1,
                task.position_id
            ));

        match self.executor.execute(&signal, notional).await {
            Ok(report) if !report.is_pending => {
                let exit_price = if report.executed_price > Decimal::ZERO {
                    report.executed_price
                } else {
                    price
                };
                self.close_and_complete(&mut task, &position, exit_price, CloseReason::RecoveryExecuted)
                    .await
            }
            Ok(_) => {
                // The exit went to the pending manager; retry later and let
                // the balance check conclude the task once the fill lands.
                self.fail_task(&mut task, "exit order pending").await
            }
            Err(ExecutionError::NoBalance { .. }) => {
                let last_price = task.last_known_price;
                self.close_and_complete(&mut task, &position, last_price, CloseReason::RecoveryNoBalance)
                    .await
            }
            Err(ExecutionError::BelowMinOrderAmount { .. }) => {
                self.close_and_complete(&mut task, &position, price, CloseReason::RecoveryDust)
                    .await
            }
            Err(e) => self.fail_task(&mut task, &e.to_string()).await,
        }
    }

    async fn coin_balance(&self, market: &Market) -> Option<Decimal> {
        match self.gateway.get_balances().await {
            Ok(balances) => Some(
                balances
                    .iter()
                    .find(|b| b.currency == market.coin())
                    .map(|b| b.total())
                    .unwrap_or(Decimal::ZERO),
            ),
            Err(e) => {
                warn!("CloseRecovery [{}]: balance fetch failed: {}", market, e);
                None
            }
        }
    }

    async fn close_and_complete(
        &self,
        task: &mut CloseRecoveryTask,
        position: &Position,
        exit_price: Decimal,
        reason: CloseReason,
    ) -> Result<()> {
        let fill = CloseFill::from_prices(
            position.entry_price,
            position.quantity,
            exit_price,
            Utc::now(),
            reason,
        );
        self.positions.close(&position.id, &fill).await?;
        self.registry.invalidate(&task.market);
        task.complete();
        self.tasks.update(task).await?;

        info!(
            "CloseRecovery [{}]: position {} closed ({}, exit {}, pnl {:.2}%)",
            task.market, position.id, reason, exit_price, fill.pnl_percent
        );
        if let Err(e) = self
            .audit
            .append(
                "RECOVERY",
                Some(&task.market),
                &format!("position {} closed: {}", position.id, reason),
            )
            .await
        {
            error!("CloseRecovery [{}]: audit append failed: {}", task.market, e);
        }
        Ok(())
    }

    async fn fail_task(&self, task: &mut CloseRecoveryTask, error: &str) -> Result<()> {
        task.record_failure(
            error,
            ChronoDuration::seconds(self.config.recovery_backoff_base_secs as i64),
            ChronoDuration::seconds(self.config.recovery_backoff_cap_secs as i64),
        );
        self.tasks.update(task).await?;
        warn!(
            "CloseRecovery [{}]: attempt {} for position {} failed ({}); next try {}",
            task.market, task.attempt_count, task.position_id, error, task.next_attempt_at
        );

        if task.attempt_count % self.config.recovery_warn_every == 0 {
            self.notifier
                .notify(
                    AlertLevel::Warning,
                    "Close recovery keeps failing",
                    &format!(
                        "{}: {} attempts to exit position {} ({})",
                        task.market, task.attempt_count, task.position_id, error
                    ),
                )
                .await;
        }
        Ok(())
    }
}
