use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::execution::analysis::slippage_percent;
use crate::application::market_condition::MarketConditionChecker;
use crate::application::market_locks::MarketLocks;
use crate::config::WorkerEnvConfig;
use crate::domain::exchange::{ExchangeOrder, OrderState};
use crate::domain::market::Market;
use crate::domain::pending::{CancelReason, PendingOrder, PendingStatus};
use crate::domain::ports::{AlertLevel, ExchangeGateway, Notifier};
use crate::domain::repositories::{PendingOrderRepository, TradeRepository};
use crate::domain::signal::{Side, TradingSignal};
use crate::domain::trade::{OrderType, Trade};
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

/// Transient status-fetch retries within one tick.
const FETCH_RETRIES: u32 = 3;

/// A cancel-and-replace request emitted toward the execution loop. The
/// manager never calls the executor directly; the wiring layer consumes these.
#[derive(Debug, Clone)]
pub struct ReplaceRequest {
    pub signal: TradingSignal,
    pub notional: Decimal,
}

struct Tracked {
    record: PendingOrder,
    fetch_failures: u32,
}

/// Supervises live limit orders on a fixed tick: updates fills, finalizes
/// filled orders, and applies the cancel/replace policy. Operations for one
/// market are serialized through the shared market locks so a cancel and a
/// tick check cannot interleave.
pub struct PendingOrderManager {
    gateway: Arc<dyn ExchangeGateway>,
    repo: Arc<dyn PendingOrderRepository>,
    trades: Arc<dyn TradeRepository>,
    breaker: Arc<CircuitBreaker>,
    checker: Arc<MarketConditionChecker>,
    notifier: Arc<dyn Notifier>,
    locks: Arc<MarketLocks>,
    replace_tx: mpsc::Sender<ReplaceRequest>,
    config: WorkerEnvConfig,
    fill_threshold: f64,
    active: Mutex<HashMap<String, Tracked>>,
}

impl PendingOrderManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        repo: Arc<dyn PendingOrderRepository>,
        trades: Arc<dyn TradeRepository>,
        breaker: Arc<CircuitBreaker>,
        checker: Arc<MarketConditionChecker>,
        notifier: Arc<dyn Notifier>,
        locks: Arc<MarketLocks>,
        replace_tx: mpsc::Sender<ReplaceRequest>,
        config: WorkerEnvConfig,
        fill_threshold: f64,
    ) -> Self {
        Self {
            gateway,
            repo,
            trades,
            breaker,
            checker,
            notifier,
            locks,
            replace_tx,
            config,
            fill_threshold,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// The configured limit-order lifetime.
    pub fn order_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.pending_timeout_secs as i64)
    }

    /// Put a freshly submitted limit order under supervision.
    pub async fn track(&self, record: PendingOrder) -> Result<()> {
        self.repo.insert(&record).await?;
        info!(
            "PendingManager [{}]: tracking {} {} @ {} (expires {})",
            record.market, record.side, record.order_id, record.limit_price, record.expires_at
        );
        self.active.lock().await.insert(
            record.order_id.clone(),
            Tracked {
                record,
                fetch_failures: 0,
            },
        );
        Ok(())
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Reload non-terminal records after a restart, re-arming their expiry and
    /// stamping a restart marker into the note field.
    pub async fn recover_on_startup(&self) -> Result<usize> {
        let records = self.repo.find_active().await?;
        let mut active = self.active.lock().await;
        let mut recovered = 0;
        for mut record in records {
            record.expires_at = Utc::now() + self.order_timeout();
            record.append_note("recovered after restart; expiry re-armed");
            self.repo.update(&record).await?;
            info!(
                "PendingManager [{}]: recovered pending order {} ({})",
                record.market,
                record.order_id,
                record.status()
            );
            active.insert(
                record.order_id.clone(),
                Tracked {
                    record,
                    fetch_failures: 0,
                },
            );
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Timer loop; cancellation is cooperative via the shutdown signal.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = time::interval(Duration::from_millis(self.config.pending_tick_ms));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "PendingOrderManager started (tick {}ms, timeout {}s)",
            self.config.pending_tick_ms, self.config.pending_timeout_secs
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.tick_once().await;
                }
                _ = shutdown.changed() => {
                    info!("PendingOrderManager shutting down");
                    break;
                }
            }
        }
    }

    /// One supervision pass over every active record.
    pub async fn tick_once(&self) {
        let order_ids: Vec<String> = self.active.lock().await.keys().cloned().collect();
        for order_id in order_ids {
            if let Err(e) = self.check_order(&order_id).await {
                error!("PendingManager: check of {} failed: {}", order_id, e);
            }
        }
    }

    async fn check_order(&self, order_id: &str) -> Result<()> {
        // Snapshot the record under the map lock, then serialize per market.
        let Some((market, notional)) = self
            .active
            .lock()
            .await
            .get(order_id)
            .map(|t| (t.record.market.clone(), t.record.notional))
        else {
            return Ok(());
        };
        let _guard = self.locks.lock(&market).await;

        // Step 1: fetch the exchange state, with bounded retries.
        let fetched = self.fetch_with_retry(order_id).await;
        let order = match fetched {
            Ok(order) => {
                if let Some(tracked) = self.active.lock().await.get_mut(order_id) {
                    tracked.fetch_failures = 0;
                }
                order
            }
            Err(e) => {
                return self.note_fetch_failure(order_id, &market, e).await;
            }
        };

        // Step 2: update fills.
        let (fill_rate, is_done) = {
            let mut active = self.active.lock().await;
            let Some(tracked) = active.get_mut(order_id) else {
                return Ok(());
            };
            let record = &mut tracked.record;
            record.touch_check(Utc::now());
            if let Some(order) = &order {
                let avg = order
                    .average_fill_price()
                    .unwrap_or(record.limit_price);
                record.record_fill(order.executed_volume, avg)?;
            }
            self.repo.update(record).await?;
            (
                record.fill_rate(),
                order.as_ref().is_some_and(|o| o.state == OrderState::Done),
            )
        };

        // Step 3: finalize when filled enough.
        if is_done || fill_rate >= self.fill_threshold {
            return self.finalize_filled(order_id, &market).await;
        }

        // Step 4: cancel/replace policy.
        let snapshot = self.checker.check(&market, notional).await;
        let decision = {
            let active = self.active.lock().await;
            let Some(tracked) = active.get(order_id) else {
                return Ok(());
            };
            self.evaluate_policy(&tracked.record, &snapshot)
        };

        if let Some((reason, replace)) = decision {
            self.cancel_order(order_id, &market, reason, replace).await?;
        }
        Ok(())
    }

    async fn fetch_with_retry(
        &self,
        order_id: &str,
    ) -> Result<Option<ExchangeOrder>, String> {
        let mut last_error = String::new();
        for attempt in 1..=FETCH_RETRIES {
            match self.gateway.get_order(order_id).await {
                Ok(order) => return Ok(order),
                Err(e) if e.is_transient() && attempt < FETCH_RETRIES => {
                    last_error = e.to_string();
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(e) => return Err(e.to_string()),
            }
        }
        Err(last_error)
    }

    async fn note_fetch_failure(
        &self,
        order_id: &str,
        market: &Market,
        error: String,
    ) -> Result<()> {
        let failures = {
            let mut active = self.active.lock().await;
            let Some(tracked) = active.get_mut(order_id) else {
                return Ok(());
            };
            tracked.fetch_failures += 1;
            tracked.fetch_failures
        };
        warn!(
            "PendingManager [{}]: status fetch for {} failed ({} consecutive): {}",
            market, order_id, failures, error
        );
        if failures >= self.config.max_fetch_failures {
            self.notifier
                .notify(
                    AlertLevel::Warning,
                    "Pending order needs manual verification",
                    &format!(
                        "{}: {} status checks failed in a row for order {}",
                        market, failures, order_id
                    ),
                )
                .await;
            if let Some(tracked) = self.active.lock().await.get_mut(order_id) {
                tracked.fetch_failures = 0;
            }
        }
        Ok(())
    }

    /// Policy order: timeout, unfavorable drift, spread widening, market
    /// condition. First match wins; `(reason, replace)` is returned.
    fn evaluate_policy(
        &self,
        record: &PendingOrder,
        snapshot: &crate::domain::condition::MarketSnapshot,
    ) -> Option<(CancelReason, bool)> {
        let now = Utc::now();
        let has_partial = record.filled_quantity > Decimal::ZERO;

        if record.is_expired(now) {
            if has_partial {
                // The position is already partial; replacing would overshoot.
                return Some((CancelReason::PartialTimeout, false));
            }
            if record.confidence > self.config.replace_confidence_threshold {
                return Some((CancelReason::Timeout, true));
            }
            return Some((CancelReason::Expired, false));
        }

        // Live-market checks need an observable book.
        if snapshot.mid_price > Decimal::ZERO {
            if record.side == Side::Buy {
                use rust_decimal::prelude::ToPrimitive;
                let drift = ((snapshot.mid_price - record.limit_price) / record.limit_price
                    * Decimal::ONE_HUNDRED)
                    .to_f64()
                    .unwrap_or(0.0);
                if drift > self.config.price_drift_urgent_percent {
                    return Some((CancelReason::PriceDrift, true));
                }
            }

            if record.snapshot.spread_percent > 0.0
                && snapshot.spread_percent
                    >= record.snapshot.spread_percent * self.config.spread_widen_factor
            {
                return Some((CancelReason::SpreadWidened, false));
            }
        }

        if !snapshot.can_trade {
            return Some((CancelReason::MarketCondition, false));
        }

        None
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        market: &Market,
        reason: CancelReason,
        replace: bool,
    ) -> Result<()> {
        info!(
            "PendingManager [{}]: cancelling {} ({}, replace={})",
            market, order_id, reason, replace
        );

        if let Err(e) = self.gateway.cancel_order(order_id).await {
            // Cancel can race a fill. Refetch; a completed order finalizes as
            // FILLED instead of erroring out.
            warn!(
                "PendingManager [{}]: cancel of {} failed ({}), refetching",
                market, order_id, e
            );
            if let Ok(Some(order)) = self.gateway.get_order(order_id).await
                && (order.state == OrderState::Done || order.fill_rate() >= self.fill_threshold)
            {
                let avg = order.average_fill_price();
                let mut active = self.active.lock().await;
                if let Some(tracked) = active.get_mut(order_id) {
                    let fallback = tracked.record.limit_price;
                    tracked
                        .record
                        .record_fill(order.executed_volume, avg.unwrap_or(fallback))?;
                }
                drop(active);
                return self.finalize_filled(order_id, market).await;
            }
            // Leave the record for the next tick.
            return Ok(());
        }

        // Capture last-moment fills reported after the cancel.
        if let Ok(Some(order)) = self.gateway.get_order(order_id).await {
            let avg = order.average_fill_price();
            let mut active = self.active.lock().await;
            if let Some(tracked) = active.get_mut(order_id) {
                let fallback = tracked.record.limit_price;
                tracked
                    .record
                    .record_fill(order.executed_volume, avg.unwrap_or(fallback))?;
            }
        }

        let Some(mut tracked) = self.active.lock().await.remove(order_id) else {
            return Ok(());
        };
        let record = &mut tracked.record;

        let status = if replace {
            PendingStatus::Replaced
        } else if reason == CancelReason::Expired {
            PendingStatus::Expired
        } else {
            PendingStatus::Cancelled
        };
        record.transition(status)?;
        record.cancel_reason = Some(reason);
        self.repo.update(record).await?;

        if record.filled_quantity > Decimal::ZERO {
            self.record_partial_trade(record).await;
        }

        if replace {
            let remaining = (record.quantity - record.filled_quantity) * record.limit_price;
            let signal = TradingSignal::new(
                record.market.clone(),
                record.side,
                Decimal::ZERO,
                record.confidence,
            )
            .with_strategy(record.strategy.clone())
            .with_reason(format!("replace {} after {}", order_id, reason));
            if let Err(e) = self
                .replace_tx
                .send(ReplaceRequest {
                    signal,
                    notional: remaining.round_dp(0),
                })
                .await
            {
                error!(
                    "PendingManager [{}]: replace signal send failed: {}",
                    market, e
                );
            }
        }

        Ok(())
    }

    async fn finalize_filled(&self, order_id: &str, market: &Market) -> Result<()> {
        let Some(mut tracked) = self.active.lock().await.remove(order_id) else {
            return Ok(());
        };
        let record = &mut tracked.record;
        let now = Utc::now();

        record.transition(PendingStatus::Filled)?;
        record.fill_duration_ms = Some(record.age_ms(now));
        let fill_price = if record.avg_fill_price > Decimal::ZERO {
            record.avg_fill_price
        } else {
            record.limit_price
        };
        let slippage = slippage_percent(record.side, fill_price, record.snapshot.mid_price);
        record.slippage_percent = Some(slippage);
        self.repo.update(record).await?;

        info!(
            "PendingManager [{}]: {} FILLED ({:.0}% in {}ms, slippage {:.3}%)",
            market,
            order_id,
            record.fill_rate() * 100.0,
            record.fill_duration_ms.unwrap_or(0),
            slippage
        );

        self.append_trade(record, fill_price, slippage).await;

        self.breaker.record_success(market);
        if slippage > 0.0 {
            self.breaker.record_slippage(market, slippage);
        }
        Ok(())
    }

    /// A cancelled order with a partial fill still produced a position; the
    /// trade store must reflect the partial amount.
    async fn record_partial_trade(&self, record: &PendingOrder) {
        let fill_price = if record.avg_fill_price > Decimal::ZERO {
            record.avg_fill_price
        } else {
            record.limit_price
        };
        let slippage = slippage_percent(record.side, fill_price, record.snapshot.mid_price);
        self.append_trade(record, fill_price, slippage).await;

        if record.fill_rate() < self.config.partial_warn_fill_rate {
            self.notifier
                .notify(
                    AlertLevel::Warning,
                    "Low partial fill cancelled",
                    &format!(
                        "{}: order {} cancelled at {:.0}% fill; manual follow-up advised",
                        record.market,
                        record.order_id,
                        record.fill_rate() * 100.0
                    ),
                )
                .await;
        }
    }

    async fn append_trade(&self, record: &PendingOrder, fill_price: Decimal, slippage: f64) {
        let trade = match Trade::new(
            &record.order_id,
            record.market.clone(),
            record.side,
            OrderType::Limit,
            fill_price,
            record.filled_quantity,
            Decimal::ZERO,
        ) {
            Ok(trade) => trade
                .with_signal_context(&record.strategy, None, record.confidence, "limit fill")
                .with_slippage(slippage)
                .with_partial_fill(record.fill_rate() < 1.0),
            Err(e) => {
                error!(
                    "PendingManager [{}]: refusing to persist invalid trade for {}: {}",
                    record.market, record.order_id, e
                );
                return;
            }
        };
        if let Err(e) = self.trades.insert(&trade).await {
            error!(
                "PendingManager [{}]: trade persistence failed for {}: {}",
                record.market, record.order_id, e
            );
        }
    }
}
