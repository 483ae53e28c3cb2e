use crate::application::circuit_breaker::{CircuitBreaker, seoul_day};
use crate::application::execution::analysis::{FillAnalysis, analyze_fill};
use crate::application::execution::fifo::{RealizedPnl, realized_pnl_fifo};
use crate::application::execution::order_type;
use crate::application::market_condition::MarketConditionChecker;
use crate::application::pending_manager::PendingOrderManager;
use crate::application::risk_throttle::RiskThrottle;
use crate::config::ExecutionEnvConfig;
use crate::domain::condition::MarketSnapshot;
use crate::domain::errors::ExecutionError;
use crate::domain::exchange::{ExchangeOrder, OrderState};
use crate::domain::market::Market;
use crate::domain::pending::{PendingOrder, SubmitSnapshot};
use crate::domain::ports::{AlertLevel, ExchangeGateway, Notifier};
use crate::domain::repositories::{DailyStatsRepository, TradeRepository};
use crate::domain::signal::{Side, TradingSignal};
use crate::domain::trade::{OrderType, Trade};
use anyhow::anyhow;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Coin quantities are quoted to 8 decimal places.
const QUANTITY_SCALE: u32 = 8;

/// Outcome of a successful (or pending) execution, consumed by strategies.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub order_id: String,
    pub market: Market,
    pub side: Side,
    pub order_type: OrderType,
    pub requested_notional: Decimal,
    pub executed_price: Decimal,
    pub executed_volume: Decimal,
    pub executed_notional: Decimal,
    pub fee: Decimal,
    pub fill_rate: f64,
    pub slippage_percent: f64,
    /// FIFO-realized PnL; sells only.
    pub realized_pnl: Option<RealizedPnl>,
    /// True when the limit order was handed to the pending-order manager.
    pub is_pending: bool,
    pub simulated: bool,
}

/// The execution spine: gate, decide, submit, verify, analyze, persist.
///
/// The executor knows nothing about strategies; they hold a handle and call
/// [`OrderExecutor::execute`].
pub struct OrderExecutor {
    gateway: Arc<dyn ExchangeGateway>,
    trades: Arc<dyn TradeRepository>,
    stats: Arc<dyn DailyStatsRepository>,
    checker: Arc<MarketConditionChecker>,
    breaker: Arc<CircuitBreaker>,
    throttle: Arc<RiskThrottle>,
    pending: Arc<PendingOrderManager>,
    notifier: Arc<dyn Notifier>,
    config: ExecutionEnvConfig,
}

impl OrderExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        trades: Arc<dyn TradeRepository>,
        stats: Arc<dyn DailyStatsRepository>,
        checker: Arc<MarketConditionChecker>,
        breaker: Arc<CircuitBreaker>,
        throttle: Arc<RiskThrottle>,
        pending: Arc<PendingOrderManager>,
        notifier: Arc<dyn Notifier>,
        config: ExecutionEnvConfig,
    ) -> Self {
        Self {
            gateway,
            trades,
            stats,
            checker,
            breaker,
            throttle,
            pending,
            notifier,
            config,
        }
    }

    /// Run the full pipeline for one signal. Failures that involved the
    /// exchange are reported to the circuit breaker; business-rule rejections
    /// are not.
    pub async fn execute(
        &self,
        signal: &TradingSignal,
        requested_notional: Decimal,
    ) -> Result<ExecutionReport, ExecutionError> {
        let result = self.execute_inner(signal, requested_notional).await;
        if let Err(e) = &result
            && e.counts_as_execution_failure()
        {
            self.breaker.record_failure(&signal.market, e.code());
        }
        result
    }

    async fn execute_inner(
        &self,
        signal: &TradingSignal,
        requested_notional: Decimal,
    ) -> Result<ExecutionReport, ExecutionError> {
        let market = signal.market.clone();

        // Phase 1: side
        let side = match signal.side {
            Side::Buy => Side::Buy,
            Side::Sell => Side::Sell,
            Side::Hold => {
                return Err(ExecutionError::Exception(anyhow!(
                    "HOLD signal routed to executor for {}",
                    market
                )));
            }
        };

        // Phases 2-3 (buys): breaker gate, then risk throttle with a
        // minimum-notional clamp.
        let mut notional = requested_notional;
        if side == Side::Buy {
            self.breaker
                .check_entry(&market)
                .map_err(|reason| ExecutionError::CircuitBreaker {
                    market: market.clone(),
                    reason,
                })?;

            let decision = self.throttle.decide(&market, &signal.strategy);
            if decision.multiplier < 1.0 {
                let factor = Decimal::from_f64(decision.multiplier)
                    .ok_or_else(|| anyhow!("invalid throttle multiplier"))?;
                let throttled = (requested_notional * factor).round_dp(0);
                notional = if throttled < self.config.min_order_krw
                    && requested_notional >= self.config.min_order_krw
                {
                    self.config.min_order_krw
                } else {
                    throttled
                };
                info!(
                    "Executor [{}]: throttled notional {} -> {} ({})",
                    market, requested_notional, notional, decision.reason
                );
            }
        }

        // Phase 3: minimum-notional gate
        if notional < self.config.min_order_krw {
            return Err(ExecutionError::BelowMinOrderAmount {
                notional,
                minimum: self.config.min_order_krw,
            });
        }

        // Phase 4: simulation short-circuit
        if !self.config.trading_enabled {
            return self.simulate(signal, side, notional).await;
        }

        // Phase 5: market-condition gate
        let snapshot = self.checker.check(&market, notional).await;
        if !snapshot.can_trade {
            warn!(
                "Executor [{}]: blocked by market conditions ({})",
                market,
                snapshot.issue_summary()
            );
            return Err(ExecutionError::MarketCondition {
                issues: snapshot.issues,
            });
        }

        let reference_price = if signal.price > Decimal::ZERO {
            signal.price
        } else {
            snapshot.mid_price
        };

        // Phase 6: order-type decision
        let decision = order_type::decide(signal, &snapshot, &self.config);
        info!(
            "Executor [{}]: {} {} as {} ({})",
            market,
            side,
            notional,
            decision.order_type,
            decision.reason_summary()
        );

        // Sell sizing against the actual coin balance
        let quantity = match side {
            Side::Buy => (notional / reference_price).round_dp(QUANTITY_SCALE),
            Side::Sell => self.resolve_sell_quantity(&market, notional, reference_price).await?,
            Side::Hold => unreachable!(),
        };

        // Phase 7: submit (market submission failure falls back to limit)
        let (order, submitted_type) = self
            .submit(&market, side, decision.order_type, notional, quantity, &snapshot)
            .await?;

        // Phase 8: verify
        let order_id = order.uuid.clone();
        let verified = if submitted_type == OrderType::Limit {
            match self.quick_check_limit(&market, order).await? {
                Some(filled) => filled,
                None => {
                    // Hand the live order to the pending manager.
                    let record = self.build_pending_record(signal, side, quantity, &snapshot, &order_id);
                    self.pending
                        .track(record)
                        .await
                        .map_err(ExecutionError::Exception)?;
                    info!(
                        "Executor [{}]: limit order {} handed to pending manager",
                        market, order_id
                    );
                    return Ok(ExecutionReport {
                        order_id,
                        market,
                        side,
                        order_type: OrderType::Limit,
                        requested_notional: notional,
                        executed_price: Decimal::ZERO,
                        executed_volume: Decimal::ZERO,
                        executed_notional: Decimal::ZERO,
                        fee: Decimal::ZERO,
                        fill_rate: 0.0,
                        slippage_percent: 0.0,
                        realized_pnl: None,
                        is_pending: true,
                        simulated: false,
                    });
                }
            }
        } else {
            self.verify_order(&market, &order_id).await?
        };

        if verified.executed_volume <= Decimal::ZERO {
            return Err(ExecutionError::NoFill { order_id });
        }

        // Phase 9: analyze
        let analysis = analyze_fill(side, &verified, notional, reference_price);
        self.emit_fill_warnings(&market, &analysis).await;

        // Phase 10: record
        let realized = self
            .record_trade(signal, side, submitted_type, &analysis, &order_id, false)
            .await;

        // Phase 11: report to breaker and throttle
        self.breaker.record_success(&market);
        self.breaker.record_slippage(&market, analysis.slippage_percent);
        if let Some(pnl) = &realized {
            self.breaker.record_trade_result(&market, pnl.percent, pnl.amount);
            self.throttle.record_trade(&market, &signal.strategy, pnl.percent);
        }

        Ok(ExecutionReport {
            order_id,
            market,
            side,
            order_type: submitted_type,
            requested_notional: notional,
            executed_price: analysis.executed_price,
            executed_volume: analysis.executed_volume,
            executed_notional: analysis.executed_notional,
            fee: analysis.fee,
            fill_rate: analysis.fill_rate,
            slippage_percent: analysis.slippage_percent,
            realized_pnl: realized,
            is_pending: false,
            simulated: false,
        })
    }

    /// Resolve how much coin a sell can actually move: the full balance when
    /// the request exceeds it, a failure when nothing is there.
    async fn resolve_sell_quantity(
        &self,
        market: &Market,
        notional: Decimal,
        reference_price: Decimal,
    ) -> Result<Decimal, ExecutionError> {
        let coin = market.coin();
        let balances = self
            .gateway
            .get_balances()
            .await
            .map_err(|e| ExecutionError::from_exchange(e, market))?;
        let available = balances
            .iter()
            .find(|b| b.currency == coin)
            .map(|b| b.balance)
            .unwrap_or(Decimal::ZERO);

        if available <= Decimal::ZERO {
            return Err(ExecutionError::NoBalance {
                currency: coin.to_string(),
            });
        }

        let requested = (notional / reference_price).round_dp(QUANTITY_SCALE);
        let quantity = if available < requested {
            warn!(
                "Executor [{}]: balance {} below requested {}, selling full balance",
                market, available, requested
            );
            available
        } else {
            requested
        };

        if quantity * reference_price < self.config.min_order_krw {
            return Err(ExecutionError::BelowMinOrderAmount {
                notional: quantity * reference_price,
                minimum: self.config.min_order_krw,
            });
        }
        Ok(quantity)
    }

    async fn submit(
        &self,
        market: &Market,
        side: Side,
        order_type: OrderType,
        notional: Decimal,
        quantity: Decimal,
        snapshot: &MarketSnapshot,
    ) -> Result<(ExchangeOrder, OrderType), ExecutionError> {
        match (side, order_type) {
            (Side::Buy, OrderType::Market) => {
                match self.gateway.buy_market_order(market, notional).await {
                    Ok(order) => Ok((order, OrderType::Market)),
                    Err(e) if e.is_market_suspended() => {
                        Err(ExecutionError::MarketSuspended(market.clone()))
                    }
                    Err(e) => {
                        warn!(
                            "Executor [{}]: market buy failed ({}), falling back to limit",
                            market, e
                        );
                        let price = snapshot.best_ask;
                        let qty = (notional / price).round_dp(QUANTITY_SCALE);
                        let order = self
                            .gateway
                            .buy_limit_order(market, price, qty)
                            .await
                            .map_err(|e| ExecutionError::from_exchange(e, market))?;
                        Ok((order, OrderType::Limit))
                    }
                }
            }
            (Side::Buy, OrderType::Limit) => {
                // Priced at the opposite best quote so it crosses immediately
                // under stable conditions.
                let price = snapshot.best_ask;
                let qty = (notional / price).round_dp(QUANTITY_SCALE);
                let order = self
                    .gateway
                    .buy_limit_order(market, price, qty)
                    .await
                    .map_err(|e| ExecutionError::from_exchange(e, market))?;
                Ok((order, OrderType::Limit))
            }
            (Side::Sell, OrderType::Market) => {
                match self.gateway.sell_market_order(market, quantity).await {
                    Ok(order) => Ok((order, OrderType::Market)),
                    Err(e) if e.is_market_suspended() => {
                        Err(ExecutionError::MarketSuspended(market.clone()))
                    }
                    Err(e) => {
                        warn!(
                            "Executor [{}]: market sell failed ({}), falling back to limit",
                            market, e
                        );
                        let order = self
                            .gateway
                            .sell_limit_order(market, snapshot.best_bid, quantity)
                            .await
                            .map_err(|e| ExecutionError::from_exchange(e, market))?;
                        Ok((order, OrderType::Limit))
                    }
                }
            }
            (Side::Sell, OrderType::Limit) => {
                let order = self
                    .gateway
                    .sell_limit_order(market, snapshot.best_bid, quantity)
                    .await
                    .map_err(|e| ExecutionError::from_exchange(e, market))?;
                Ok((order, OrderType::Limit))
            }
            (Side::Hold, _) => unreachable!(),
        }
    }

    /// Quick fill checks for a freshly submitted limit order. `Ok(Some)` means
    /// filled enough to analyze now; `Ok(None)` hands off to the pending
    /// manager.
    async fn quick_check_limit(
        &self,
        market: &Market,
        submitted: ExchangeOrder,
    ) -> Result<Option<ExchangeOrder>, ExecutionError> {
        if submitted.state == OrderState::Done
            || submitted.fill_rate() >= self.config.fill_threshold
        {
            return Ok(Some(submitted));
        }

        let delay = Duration::from_millis(self.config.quick_check_delay_ms);
        for _ in 0..self.config.quick_check_attempts {
            tokio::time::sleep(delay).await;
            match self.gateway.get_order(&submitted.uuid).await {
                Ok(Some(order)) => {
                    if order.state == OrderState::Done
                        || order.fill_rate() >= self.config.fill_threshold
                    {
                        return Ok(Some(order));
                    }
                }
                Ok(None) => {}
                Err(e) if !e.is_transient() => {
                    return Err(ExecutionError::from_exchange(e, market));
                }
                Err(e) => {
                    warn!("Executor [{}]: quick check fetch failed: {}", market, e);
                }
            }
        }
        Ok(None)
    }

    /// Poll order status with exponential back-off until a terminal state or a
    /// near-complete fill. Accepts DONE, CANCELLED, or WAIT with a fill at the
    /// threshold.
    async fn verify_order(
        &self,
        market: &Market,
        order_id: &str,
    ) -> Result<ExchangeOrder, ExecutionError> {
        let mut delay = Duration::from_millis(self.config.verify_initial_delay_ms);
        let max_delay = Duration::from_millis(self.config.verify_max_delay_ms);
        let attempts = self.config.verify_max_attempts;

        for attempt in 1..=attempts {
            match self.gateway.get_order(order_id).await {
                Ok(Some(order)) => match order.state {
                    OrderState::Done | OrderState::Cancel => return Ok(order),
                    OrderState::Wait if order.fill_rate() >= self.config.fill_threshold => {
                        return Ok(order);
                    }
                    OrderState::Wait => {}
                },
                Ok(None) => {
                    warn!(
                        "Executor [{}]: order {} not yet visible (attempt {})",
                        market, order_id, attempt
                    );
                }
                Err(e) if !e.is_transient() => {
                    return Err(ExecutionError::from_exchange(e, market));
                }
                Err(e) => {
                    warn!("Executor [{}]: verification fetch failed: {}", market, e);
                }
            }

            if attempt < attempts {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }

        Err(ExecutionError::VerificationFailed {
            order_id: order_id.to_string(),
            attempts,
        })
    }

    async fn emit_fill_warnings(&self, market: &Market, analysis: &FillAnalysis) {
        let slippage = analysis.slippage_percent;
        if slippage >= self.config.slippage_critical_percent {
            self.notifier
                .notify(
                    AlertLevel::Critical,
                    "Critical slippage",
                    &format!("{}: executed {:.2}% worse than reference", market, slippage),
                )
                .await;
        } else if slippage >= self.config.slippage_warn_percent {
            warn!(
                "Executor [{}]: slippage {:.2}% above warning threshold",
                market, slippage
            );
        }

        if analysis.fill_rate < self.config.fill_threshold {
            warn!(
                "Executor [{}]: partial fill {:.0}% below threshold",
                market,
                analysis.fill_rate * 100.0
            );
        }
    }

    /// Append the trade record (best effort) and return the realized PnL for
    /// sells. Records with a non-positive price are never written: the price
    /// falls back to the snapshot mid, and failing that the record is dropped
    /// with an error log.
    async fn record_trade(
        &self,
        signal: &TradingSignal,
        side: Side,
        order_type: OrderType,
        analysis: &FillAnalysis,
        order_id: &str,
        simulated: bool,
    ) -> Option<RealizedPnl> {
        let market = &signal.market;
        let realized = if side == Side::Sell {
            let history = match self.trades.find_by_market(market, simulated).await {
                Ok(h) => h,
                Err(e) => {
                    error!("Executor [{}]: trade history fetch failed: {}", market, e);
                    Vec::new()
                }
            };
            realized_pnl_fifo(&history, analysis.executed_price, analysis.executed_volume)
        } else {
            None
        };

        let trade = match Trade::new(
            order_id,
            market.clone(),
            side,
            order_type,
            analysis.executed_price,
            analysis.executed_volume,
            analysis.fee,
        ) {
            Ok(trade) => trade,
            Err(e) => {
                error!(
                    "Executor [{}]: refusing to persist invalid trade ({})",
                    market, e
                );
                return realized;
            }
        };

        let mut trade = trade
            .with_signal_context(
                &signal.strategy,
                signal.regime.as_deref(),
                signal.confidence,
                &signal.reason,
            )
            .with_slippage(analysis.slippage_percent)
            .with_partial_fill(analysis.fill_rate < 1.0);
        if simulated {
            trade = trade.simulated();
        }
        if let Some(pnl) = &realized {
            trade = trade.with_pnl(pnl.amount, pnl.percent);
        }

        if let Err(e) = self.trades.insert(&trade).await {
            error!("Executor [{}]: trade persistence failed: {}", market, e);
        }

        let day = seoul_day(Utc::now());
        let pnl_amount = realized.as_ref().map(|p| p.amount).unwrap_or(Decimal::ZERO);
        if let Err(e) = self.stats.apply_trade(day, pnl_amount, analysis.fee).await {
            error!("Executor [{}]: daily stats update failed: {}", market, e);
        }

        realized
    }

    /// Trading disabled: synthesize a fill at the resolved price and persist a
    /// simulated record.
    async fn simulate(
        &self,
        signal: &TradingSignal,
        side: Side,
        notional: Decimal,
    ) -> Result<ExecutionReport, ExecutionError> {
        let market = &signal.market;
        let price = if signal.price > Decimal::ZERO {
            signal.price
        } else {
            self.gateway
                .get_current_price(market)
                .await
                .map_err(|e| ExecutionError::from_exchange(e, market))?
        };
        if price <= Decimal::ZERO {
            return Err(ExecutionError::Exception(anyhow!(
                "no price available to simulate {} on {}",
                side,
                market
            )));
        }

        let quantity = (notional / price).round_dp(QUANTITY_SCALE);
        let fee = (notional * self.config.fee_rate).round_dp(QUANTITY_SCALE);
        let order_id = format!("SIM-{}", Utc::now().timestamp_millis());

        let analysis = FillAnalysis {
            executed_price: price,
            executed_volume: quantity,
            executed_notional: notional,
            fee,
            fill_rate: 1.0,
            slippage_percent: 0.0,
        };
        let realized = self
            .record_trade(signal, side, OrderType::Market, &analysis, &order_id, true)
            .await;
        self.breaker.record_success(market);
        if let Some(pnl) = &realized {
            self.throttle.record_trade(market, &signal.strategy, pnl.percent);
        }

        info!(
            "Executor [{}]: simulated {} {} KRW @ {} ({})",
            market, side, notional, price, order_id
        );

        Ok(ExecutionReport {
            order_id,
            market: market.clone(),
            side,
            order_type: OrderType::Market,
            requested_notional: notional,
            executed_price: price,
            executed_volume: quantity,
            executed_notional: notional,
            fee,
            fill_rate: 1.0,
            slippage_percent: 0.0,
            realized_pnl: realized,
            is_pending: false,
            simulated: true,
        })
    }

    fn build_pending_record(
        &self,
        signal: &TradingSignal,
        side: Side,
        quantity: Decimal,
        snapshot: &MarketSnapshot,
        order_id: &str,
    ) -> PendingOrder {
        PendingOrder::new(
            order_id,
            signal.market.clone(),
            side,
            match side {
                Side::Sell => snapshot.best_bid,
                _ => snapshot.best_ask,
            },
            quantity,
            SubmitSnapshot {
                mid_price: snapshot.mid_price,
                spread_percent: snapshot.spread_percent,
                volatility_percent: snapshot.volatility_percent,
                orderbook_imbalance: snapshot.orderbook_imbalance,
            },
            signal.strategy.clone(),
            signal.confidence,
            self.pending.order_timeout(),
        )
    }
}
