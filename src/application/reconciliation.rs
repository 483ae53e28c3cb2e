use crate::application::position_registry::PositionRegistry;
use crate::config::WorkerEnvConfig;
use crate::domain::exchange::{ExchangeOrder, ExchangeSide, OrderState};
use crate::domain::market::Market;
use crate::domain::ports::{AlertLevel, ExchangeGateway, Notifier};
use crate::domain::position::{CloseFill, CloseReason, Position};
use crate::domain::repositories::{AuditLogRepository, PositionRepository};
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Balances below this are treated as zero (exchange dust representation).
const BALANCE_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 8);

/// Absolute floor of the quantity-mismatch tolerance.
const MISMATCH_FLOOR: Decimal = Decimal::from_parts(1, 0, 0, false, 4);

/// Fill-window page size for the recent-sell search.
const FILL_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Serialize)]
pub enum ReconcileAction {
    ClosedConfirmed {
        position_id: String,
        market: String,
        exit_price: String,
        pnl_percent: f64,
    },
    ClosedNoBalance {
        position_id: String,
        market: String,
        estimated_price: String,
    },
    QuantityMismatch {
        coin: String,
        db_quantity: String,
        exchange_quantity: String,
    },
}

/// Output of one reconciliation pass, shaped for both the operator surface
/// and the scheduler log.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub fixed: u32,
    pub verified: u32,
    pub actions: Vec<ReconcileAction>,
}

/// Periodically squares persisted OPEN positions with the exchange's
/// authoritative balances and fill history. Never deletes: positions only
/// transition OPEN -> CLOSED with an explanatory reason.
pub struct ReconciliationService {
    gateway: Arc<dyn ExchangeGateway>,
    positions: Arc<dyn PositionRepository>,
    audit: Arc<dyn AuditLogRepository>,
    registry: Arc<PositionRegistry>,
    notifier: Arc<dyn Notifier>,
    config: WorkerEnvConfig,
}

impl ReconciliationService {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        positions: Arc<dyn PositionRepository>,
        audit: Arc<dyn AuditLogRepository>,
        registry: Arc<PositionRegistry>,
        notifier: Arc<dyn Notifier>,
        config: WorkerEnvConfig,
    ) -> Self {
        Self {
            gateway,
            positions,
            audit,
            registry,
            notifier,
            config,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = time::interval(Duration::from_secs(self.config.reconcile_interval_secs));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "ReconciliationService started (every {}s)",
            self.config.reconcile_interval_secs
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.reconcile_once().await {
                        Ok(report) => {
                            if report.fixed > 0 || !report.actions.is_empty() {
                                info!(
                                    "Reconciliation: fixed={} verified={} actions={}",
                                    report.fixed,
                                    report.verified,
                                    report.actions.len()
                                );
                            }
                        }
                        Err(e) => error!("Reconciliation pass failed: {}", e),
                    }
                }
                _ = shutdown.changed() => {
                    info!("ReconciliationService shutting down");
                    break;
                }
            }
        }
    }

    /// One full pass over every OPEN position. Idempotent: a second pass with
    /// no intervening events changes nothing.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let open_positions = self.positions.find_open().await?;
        if open_positions.is_empty() {
            return Ok(report);
        }

        let balances = self.gateway.get_balances().await?;
        let balance_by_coin: HashMap<String, Decimal> = balances
            .iter()
            .map(|b| (b.currency.clone(), b.total()))
            .collect();

        // Group positions per coin: the exchange balance is per currency, not
        // per (market, strategy).
        let mut by_coin: HashMap<String, Vec<Position>> = HashMap::new();
        for position in open_positions {
            by_coin
                .entry(position.market.coin().to_string())
                .or_default()
                .push(position);
        }

        for (coin, positions) in by_coin {
            let exchange_total = balance_by_coin
                .get(&coin)
                .copied()
                .unwrap_or(Decimal::ZERO);

            if exchange_total <= BALANCE_EPSILON {
                for position in positions {
                    self.close_missing_position(&position, &mut report).await?;
                }
            } else {
                self.verify_quantities(&coin, exchange_total, &positions, &mut report)
                    .await?;
            }
        }

        Ok(report)
    }

    /// The coin is gone from the exchange: find out whether a sell fill
    /// explains it, then close the position either way.
    async fn close_missing_position(
        &self,
        position: &Position,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let market = &position.market;
        let matched_fill = self.find_matching_sell_fill(market, position).await;

        let fill = match matched_fill {
            Some(sell) => {
                let exit_price = sell
                    .average_fill_price()
                    .unwrap_or(position.entry_price);
                CloseFill::from_prices(
                    position.entry_price,
                    position.quantity,
                    exit_price,
                    sell.created_at,
                    CloseReason::SyncConfirmed,
                )
            }
            None => {
                let estimate = match self.gateway.get_current_price(market).await {
                    Ok(price) if price > Decimal::ZERO => price,
                    _ => position.entry_price,
                };
                CloseFill::from_prices(
                    position.entry_price,
                    position.quantity,
                    estimate,
                    Utc::now(),
                    CloseReason::SyncNoBalance,
                )
            }
        };

        if !self.positions.close(&position.id, &fill).await? {
            // Already closed by someone else between the scan and now.
            return Ok(());
        }
        self.registry.invalidate(market);
        report.fixed += 1;

        info!(
            "Reconciliation [{}]: position {} closed ({}, exit {}, pnl {:.2}%)",
            market,
            position.id,
            fill.reason,
            fill.exit_price,
            fill.pnl_percent
        );
        let action = match fill.reason {
            CloseReason::SyncConfirmed => ReconcileAction::ClosedConfirmed {
                position_id: position.id.clone(),
                market: market.as_str().to_string(),
                exit_price: fill.exit_price.to_string(),
                pnl_percent: fill.pnl_percent,
            },
            _ => ReconcileAction::ClosedNoBalance {
                position_id: position.id.clone(),
                market: market.as_str().to_string(),
                estimated_price: fill.exit_price.to_string(),
            },
        };
        self.append_audit(market, &format!("position {} closed: {}", position.id, fill.reason))
            .await;
        report.actions.push(action);
        Ok(())
    }

    /// Search the recent done orders of the market for a sell whose quantity
    /// matches the position within tolerance and which happened at or after
    /// the entry time (minus slack).
    async fn find_matching_sell_fill(
        &self,
        market: &Market,
        position: &Position,
    ) -> Option<ExchangeOrder> {
        let slack = ChronoDuration::seconds(self.config.reconcile_time_slack_secs);
        let earliest = position.entry_time - slack;
        let tolerance = position.quantity
            * Decimal::try_from(self.config.reconcile_qty_tolerance).unwrap_or(Decimal::ZERO);

        let max_pages = self.config.reconcile_fill_window.div_ceil(FILL_PAGE_SIZE);
        for page in 1..=max_pages {
            let orders = match self
                .gateway
                .get_orders(Some(market), OrderState::Done, page, FILL_PAGE_SIZE)
                .await
            {
                Ok(orders) => orders,
                Err(e) => {
                    warn!(
                        "Reconciliation [{}]: fill search page {} failed: {}",
                        market, page, e
                    );
                    return None;
                }
            };
            let last_page = (orders.len() as u32) < FILL_PAGE_SIZE;

            for order in orders {
                if order.side != ExchangeSide::Ask {
                    continue;
                }
                if order.created_at < earliest {
                    // Orders come newest first; everything after this is older.
                    debug!(
                        "Reconciliation [{}]: fill search reached entries before {}",
                        market, earliest
                    );
                    return None;
                }
                if (order.executed_volume - position.quantity).abs() <= tolerance {
                    return Some(order);
                }
            }

            if last_page {
                break;
            }
        }
        debug!(
            "Reconciliation [{}]: no matching sell within the last {} orders",
            market, self.config.reconcile_fill_window
        );
        None
    }

    /// Balance exists: the per-coin sum of OPEN positions must agree with it
    /// within max(0.1% of the larger side, 0.0001).
    async fn verify_quantities(
        &self,
        coin: &str,
        exchange_total: Decimal,
        positions: &[Position],
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let db_total: Decimal = positions.iter().map(|p| p.quantity).sum();
        let larger = exchange_total.max(db_total);
        let tolerance = (larger * Decimal::new(1, 3)).max(MISMATCH_FLOOR);
        let diff = (exchange_total - db_total).abs();

        if diff > tolerance {
            warn!(
                "Reconciliation [{}]: quantity mismatch db={} exchange={} (tolerance {})",
                coin, db_total, exchange_total, tolerance
            );
            report.actions.push(ReconcileAction::QuantityMismatch {
                coin: coin.to_string(),
                db_quantity: db_total.to_string(),
                exchange_quantity: exchange_total.to_string(),
            });
            self.notifier
                .notify(
                    AlertLevel::Warning,
                    "Position quantity mismatch",
                    &format!(
                        "{}: DB holds {} but exchange reports {}",
                        coin, db_total, exchange_total
                    ),
                )
                .await;
            if let Some(first) = positions.first() {
                self.append_audit(
                    &first.market,
                    &format!("quantity mismatch db={} exchange={}", db_total, exchange_total),
                )
                .await;
            }
        } else {
            report.verified += positions.len() as u32;
        }
        Ok(())
    }

    async fn append_audit(&self, market: &Market, detail: &str) {
        if let Err(e) = self.audit.append("RECONCILE", Some(market), detail).await {
            error!("Reconciliation [{}]: audit append failed: {}", market, e);
        }
    }
}
