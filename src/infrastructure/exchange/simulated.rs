//! In-process exchange used by the test suites and key-less runs. Fill
//! behavior, prices, balances and failures are all scriptable so the
//! execution pipeline can be driven end to end without a network.

use crate::domain::exchange::{
    Balance, ExchangeError, ExchangeOrder, ExchangeSide, Orderbook, OrderbookUnit, OrderState,
};
use crate::domain::market::Market;
use crate::domain::ports::ExchangeGateway;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

/// How limit orders behave at submission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillMode {
    /// Fill completely at the limit price.
    Immediate,
    /// Rest on the book with no fill.
    Resting,
    /// Fill the given fraction, then rest.
    Partial(Decimal),
}

/// Failure injected into the next order submission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimFailure {
    Transport,
    Suspended,
    Rejected,
}

#[derive(Default)]
struct SimState {
    prices: HashMap<String, Decimal>,
    orderbooks: HashMap<String, Orderbook>,
    balances: HashMap<String, Balance>,
    orders: HashMap<String, ExchangeOrder>,
    /// Completed orders also kept in submission order for `get_orders`.
    history: Vec<String>,
    fill_modes: HashMap<String, FillMode>,
    suspended: HashSet<String>,
    next_order_failure: Option<SimFailure>,
    submitted_orders: u32,
    cancelled_orders: u32,
    fee_rate: Decimal,
}

pub struct SimulatedExchange {
    state: Mutex<SimState>,
}

impl SimulatedExchange {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                fee_rate: Decimal::new(4, 4),
                ..SimState::default()
            }),
        }
    }

    /// Set the trade price and a tight default orderbook around it.
    pub fn set_price(&self, market: &Market, price: Decimal) {
        let spread = price * Decimal::new(1, 3); // 0.1%
        self.set_orderbook(
            market,
            price + spread / Decimal::TWO,
            price - spread / Decimal::TWO,
            Decimal::from(100),
            Decimal::from(100),
        );
        let mut state = self.lock();
        state.prices.insert(market.as_str().to_string(), price);
    }

    pub fn set_orderbook(
        &self,
        market: &Market,
        ask: Decimal,
        bid: Decimal,
        ask_size: Decimal,
        bid_size: Decimal,
    ) {
        let mut state = self.lock();
        state.prices.insert(
            market.as_str().to_string(),
            (ask + bid) / Decimal::TWO,
        );
        state.orderbooks.insert(
            market.as_str().to_string(),
            Orderbook {
                market: market.clone(),
                units: vec![OrderbookUnit {
                    ask_price: ask,
                    bid_price: bid,
                    ask_size,
                    bid_size,
                }],
            },
        );
    }

    pub fn set_balance(&self, currency: &str, balance: Decimal) {
        let mut state = self.lock();
        state.balances.insert(
            currency.to_string(),
            Balance {
                currency: currency.to_string(),
                balance,
                locked: Decimal::ZERO,
                avg_buy_price: Decimal::ZERO,
            },
        );
    }

    pub fn set_fill_mode(&self, market: &Market, mode: FillMode) {
        self.lock()
            .fill_modes
            .insert(market.as_str().to_string(), mode);
    }

    pub fn fail_next_order(&self, failure: SimFailure) {
        self.lock().next_order_failure = Some(failure);
    }

    pub fn suspend_market(&self, market: &Market) {
        self.lock().suspended.insert(market.as_str().to_string());
    }

    /// Complete a resting order at its limit price.
    pub fn fill_order(&self, uuid: &str) {
        let mut state = self.lock();
        if let Some(order) = state.orders.get_mut(uuid) {
            order.executed_volume = order.volume.unwrap_or(order.executed_volume);
            order.state = OrderState::Done;
        }
    }

    /// Inject a historical done order (e.g. an external sell fill for
    /// reconciliation to discover).
    pub fn push_done_order(&self, order: ExchangeOrder) {
        let mut state = self.lock();
        state.history.push(order.uuid.clone());
        state.orders.insert(order.uuid.clone(), order);
    }

    pub fn order(&self, uuid: &str) -> Option<ExchangeOrder> {
        self.lock().orders.get(uuid).cloned()
    }

    pub fn submitted_order_count(&self) -> u32 {
        self.lock().submitted_orders
    }

    pub fn cancelled_order_count(&self) -> u32 {
        self.lock().cancelled_orders
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("simulated exchange lock poisoned")
    }

    fn check_submission(&self, market: &Market) -> Result<(), ExchangeError> {
        let mut state = self.lock();
        if state.suspended.contains(market.as_str()) {
            return Err(ExchangeError::MarketSuspended(market.clone()));
        }
        if let Some(failure) = state.next_order_failure.take() {
            return Err(match failure {
                SimFailure::Transport => {
                    ExchangeError::Transport("injected transport failure".to_string())
                }
                SimFailure::Suspended => ExchangeError::MarketSuspended(market.clone()),
                SimFailure::Rejected => ExchangeError::Api {
                    code: "injected_rejection".to_string(),
                    message: "order rejected by script".to_string(),
                },
            });
        }
        Ok(())
    }

    fn current_price(&self, market: &Market) -> Result<Decimal, ExchangeError> {
        self.lock()
            .prices
            .get(market.as_str())
            .copied()
            .ok_or_else(|| ExchangeError::Decode(format!("no scripted price for {}", market)))
    }

    fn adjust_coin_balance(state: &mut SimState, coin: &str, delta: Decimal) {
        let entry = state
            .balances
            .entry(coin.to_string())
            .or_insert_with(|| Balance {
                currency: coin.to_string(),
                balance: Decimal::ZERO,
                locked: Decimal::ZERO,
                avg_buy_price: Decimal::ZERO,
            });
        entry.balance = (entry.balance + delta).max(Decimal::ZERO);
    }

    fn store_order(&self, order: ExchangeOrder) -> ExchangeOrder {
        let mut state = self.lock();
        state.submitted_orders += 1;
        state.history.push(order.uuid.clone());

        // Settle balances for completed fills.
        if order.state == OrderState::Done {
            let coin = order.market.coin().to_string();
            match order.side {
                ExchangeSide::Bid => {
                    Self::adjust_coin_balance(&mut state, &coin, order.executed_volume)
                }
                ExchangeSide::Ask => {
                    Self::adjust_coin_balance(&mut state, &coin, -order.executed_volume)
                }
            }
        }

        state.orders.insert(order.uuid.clone(), order.clone());
        order
    }

    fn fill_mode(&self, market: &Market) -> FillMode {
        self.lock()
            .fill_modes
            .get(market.as_str())
            .copied()
            .unwrap_or(FillMode::Immediate)
    }

    fn fee(&self, notional: Decimal) -> Decimal {
        (notional * self.lock().fee_rate).round_dp(8)
    }
}

impl Default for SimulatedExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeGateway for SimulatedExchange {
    async fn buy_market_order(
        &self,
        market: &Market,
        krw_notional: Decimal,
    ) -> Result<ExchangeOrder, ExchangeError> {
        self.check_submission(market)?;
        let price = self.current_price(market)?;
        let executed = (krw_notional / price).round_dp(8);
        Ok(self.store_order(ExchangeOrder {
            uuid: Uuid::new_v4().to_string(),
            market: market.clone(),
            side: ExchangeSide::Bid,
            state: OrderState::Done,
            price: None,
            volume: None,
            executed_volume: executed,
            locked: krw_notional,
            paid_fee: self.fee(krw_notional),
            created_at: Utc::now(),
        }))
    }

    async fn sell_market_order(
        &self,
        market: &Market,
        quantity: Decimal,
    ) -> Result<ExchangeOrder, ExchangeError> {
        self.check_submission(market)?;
        let price = self.current_price(market)?;
        Ok(self.store_order(ExchangeOrder {
            uuid: Uuid::new_v4().to_string(),
            market: market.clone(),
            side: ExchangeSide::Ask,
            state: OrderState::Done,
            price: Some(price),
            volume: Some(quantity),
            executed_volume: quantity,
            locked: Decimal::ZERO,
            paid_fee: self.fee(price * quantity),
            created_at: Utc::now(),
        }))
    }

    async fn buy_limit_order(
        &self,
        market: &Market,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<ExchangeOrder, ExchangeError> {
        self.check_submission(market)?;
        let (state, executed) = match self.fill_mode(market) {
            FillMode::Immediate => (OrderState::Done, quantity),
            FillMode::Resting => (OrderState::Wait, Decimal::ZERO),
            FillMode::Partial(rate) => (OrderState::Wait, (quantity * rate).round_dp(8)),
        };
        Ok(self.store_order(ExchangeOrder {
            uuid: Uuid::new_v4().to_string(),
            market: market.clone(),
            side: ExchangeSide::Bid,
            state,
            price: Some(price),
            volume: Some(quantity),
            executed_volume: executed,
            // Settlement-style reporting: locked carries the KRW consumed by
            // the fills, mirroring how the live adapter surfaces it.
            locked: price * executed,
            paid_fee: self.fee(price * executed),
            created_at: Utc::now(),
        }))
    }

    async fn sell_limit_order(
        &self,
        market: &Market,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<ExchangeOrder, ExchangeError> {
        self.check_submission(market)?;
        let (state, executed) = match self.fill_mode(market) {
            FillMode::Immediate => (OrderState::Done, quantity),
            FillMode::Resting => (OrderState::Wait, Decimal::ZERO),
            FillMode::Partial(rate) => (OrderState::Wait, (quantity * rate).round_dp(8)),
        };
        Ok(self.store_order(ExchangeOrder {
            uuid: Uuid::new_v4().to_string(),
            market: market.clone(),
            side: ExchangeSide::Ask,
            state,
            price: Some(price),
            volume: Some(quantity),
            executed_volume: executed,
            locked: quantity - executed,
            paid_fee: self.fee(price * executed),
            created_at: Utc::now(),
        }))
    }

    async fn get_order(&self, uuid: &str) -> Result<Option<ExchangeOrder>, ExchangeError> {
        Ok(self.lock().orders.get(uuid).cloned())
    }

    async fn cancel_order(&self, uuid: &str) -> Result<(), ExchangeError> {
        let mut state = self.lock();
        match state.orders.get_mut(uuid) {
            Some(order) if order.state == OrderState::Wait => {
                order.state = OrderState::Cancel;
                // Partial fills settle on cancel.
                if order.side == ExchangeSide::Bid && order.executed_volume > Decimal::ZERO {
                    let coin = order.market.coin().to_string();
                    let executed = order.executed_volume;
                    Self::adjust_coin_balance(&mut state, &coin, executed);
                }
                state.cancelled_orders += 1;
                Ok(())
            }
            Some(_) => Err(ExchangeError::Api {
                code: "invalid_state".to_string(),
                message: "order already completed".to_string(),
            }),
            None => Err(ExchangeError::OrderNotFound(uuid.to_string())),
        }
    }

    async fn get_orders(
        &self,
        market: Option<&Market>,
        state_filter: OrderState,
        page: u32,
        limit: u32,
    ) -> Result<Vec<ExchangeOrder>, ExchangeError> {
        let state = self.lock();
        let mut matches: Vec<ExchangeOrder> = state
            .history
            .iter()
            .rev() // newest first
            .filter_map(|uuid| state.orders.get(uuid))
            .filter(|o| o.state == state_filter)
            .filter(|o| market.is_none_or(|m| o.market == *m))
            .cloned()
            .collect();
        let start = ((page.max(1) - 1) * limit) as usize;
        if start >= matches.len() {
            return Ok(Vec::new());
        }
        matches = matches.split_off(start);
        matches.truncate(limit as usize);
        Ok(matches)
    }

    async fn get_balances(&self) -> Result<Vec<Balance>, ExchangeError> {
        Ok(self.lock().balances.values().cloned().collect())
    }

    async fn get_current_price(&self, market: &Market) -> Result<Decimal, ExchangeError> {
        self.current_price(market)
    }

    async fn get_orderbook(&self, market: &Market) -> Result<Orderbook, ExchangeError> {
        if self.lock().suspended.contains(market.as_str()) {
            return Err(ExchangeError::MarketSuspended(market.clone()));
        }
        self.lock()
            .orderbooks
            .get(market.as_str())
            .cloned()
            .ok_or_else(|| ExchangeError::Decode(format!("no scripted orderbook for {}", market)))
    }
}
