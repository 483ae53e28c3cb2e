use crate::config::ExecutionEnvConfig;
use crate::domain::condition::{ConditionIssue, MarketSnapshot};
use crate::domain::market::Market;
use crate::domain::ports::ExchangeGateway;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Order-book levels considered for imbalance and depth.
const TOP_LEVELS: usize = 5;

/// Mid-price sample retention for the short-window volatility estimate.
const VOLATILITY_WINDOW: Duration = Duration::from_secs(60);

/// Snapshots a market's tradability for a given order notional.
///
/// Failure is never fatal: any gateway error yields `can_trade=false` with an
/// `OrderbookUnavailable` issue and callers decide what to do with it.
pub struct MarketConditionChecker {
    gateway: Arc<dyn ExchangeGateway>,
    config: ExecutionEnvConfig,
    mid_history: Mutex<HashMap<String, VecDeque<(Instant, Decimal)>>>,
}

impl MarketConditionChecker {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, config: ExecutionEnvConfig) -> Self {
        Self {
            gateway,
            config,
            mid_history: Mutex::new(HashMap::new()),
        }
    }

    pub async fn check(&self, market: &Market, intended_notional: Decimal) -> MarketSnapshot {
        let orderbook = match self.gateway.get_orderbook(market).await {
            Ok(book) if !book.units.is_empty() => book,
            Ok(_) => {
                return MarketSnapshot::unavailable(market.clone(), "empty orderbook");
            }
            Err(e) => {
                debug!("ConditionChecker: orderbook fetch failed for {}: {}", market, e);
                return MarketSnapshot::unavailable(market.clone(), e.to_string());
            }
        };

        let top = &orderbook.units[0];
        let best_ask = top.ask_price;
        let best_bid = top.bid_price;
        let mid = (best_ask + best_bid) / Decimal::TWO;
        if mid <= Decimal::ZERO {
            return MarketSnapshot::unavailable(market.clone(), "non-positive mid price");
        }

        let spread_percent = ((best_ask - best_bid) / mid * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0);

        let mut bid_volume = Decimal::ZERO;
        let mut ask_volume = Decimal::ZERO;
        let mut depth_notional = Decimal::ZERO;
        for unit in orderbook.units.iter().take(TOP_LEVELS) {
            bid_volume += unit.bid_size;
            ask_volume += unit.ask_size;
            depth_notional += unit.bid_size * unit.bid_price + unit.ask_size * unit.ask_price;
        }

        let total_volume = bid_volume + ask_volume;
        let orderbook_imbalance = if total_volume > Decimal::ZERO {
            ((bid_volume - ask_volume) / total_volume)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };

        let liquidity_ratio = if intended_notional > Decimal::ZERO {
            (depth_notional / intended_notional).to_f64().unwrap_or(0.0)
        } else {
            f64::MAX
        };

        let volatility_percent = self.record_and_measure_volatility(market, mid).await;

        let mut issues = Vec::new();
        if spread_percent > self.config.max_spread_percent {
            issues.push(ConditionIssue::SpreadTooWide {
                spread_percent,
                limit: self.config.max_spread_percent,
            });
        }
        if volatility_percent > self.config.max_volatility_percent {
            issues.push(ConditionIssue::ExcessiveVolatility {
                volatility_percent,
                limit: self.config.max_volatility_percent,
            });
        }
        if liquidity_ratio < self.config.min_liquidity_ratio {
            issues.push(ConditionIssue::InsufficientLiquidity {
                liquidity_ratio,
                minimum: self.config.min_liquidity_ratio,
            });
        }

        MarketSnapshot {
            market: market.clone(),
            mid_price: mid,
            best_ask,
            best_bid,
            spread_percent,
            volatility_percent,
            liquidity_ratio,
            orderbook_imbalance,
            can_trade: issues.is_empty(),
            issues,
        }
    }

    /// Record a mid-price sample and return the 1-minute range as a percent of
    /// the latest mid. With fewer than two samples the estimate is 0.
    async fn record_and_measure_volatility(&self, market: &Market, mid: Decimal) -> f64 {
        let now = Instant::now();
        let mut history = self.mid_history.lock().await;
        let samples = history.entry(market.as_str().to_string()).or_default();
        samples.push_back((now, mid));
        while let Some(&(ts, _)) = samples.front() {
            if now.duration_since(ts) > VOLATILITY_WINDOW {
                samples.pop_front();
            } else {
                break;
            }
        }

        if samples.len() < 2 {
            return 0.0;
        }
        let mut min = mid;
        let mut max = mid;
        for &(_, sample) in samples.iter() {
            min = min.min(sample);
            max = max.max(sample);
        }
        ((max - min) / mid * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0)
    }
}
