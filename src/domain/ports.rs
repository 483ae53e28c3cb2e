use crate::domain::exchange::{Balance, ExchangeError, ExchangeOrder, Orderbook, OrderState};
use crate::domain::market::Market;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// The spot-exchange contract the core consumes. Implementations: the REST
/// adapter for live trading and the simulated exchange for tests and key-less
/// operation.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Market buy funded by a KRW notional.
    async fn buy_market_order(
        &self,
        market: &Market,
        krw_notional: Decimal,
    ) -> Result<ExchangeOrder, ExchangeError>;

    /// Market sell of a coin quantity.
    async fn sell_market_order(
        &self,
        market: &Market,
        quantity: Decimal,
    ) -> Result<ExchangeOrder, ExchangeError>;

    async fn buy_limit_order(
        &self,
        market: &Market,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<ExchangeOrder, ExchangeError>;

    async fn sell_limit_order(
        &self,
        market: &Market,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<ExchangeOrder, ExchangeError>;

    async fn get_order(&self, uuid: &str) -> Result<Option<ExchangeOrder>, ExchangeError>;

    async fn cancel_order(&self, uuid: &str) -> Result<(), ExchangeError>;

    /// Orders filtered by state, newest first. `page` starts at 1.
    async fn get_orders(
        &self,
        market: Option<&Market>,
        state: OrderState,
        page: u32,
        limit: u32,
    ) -> Result<Vec<ExchangeOrder>, ExchangeError>;

    async fn get_balances(&self) -> Result<Vec<Balance>, ExchangeError>;

    async fn get_current_price(&self, market: &Market) -> Result<Decimal, ExchangeError>;

    async fn get_orderbook(&self, market: &Market) -> Result<Orderbook, ExchangeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Critical => "CRITICAL",
        }
    }
}

/// Operator notification sink. Delivery is best-effort; callers never fail on
/// a notification error.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, level: AlertLevel, title: &str, body: &str);
}
