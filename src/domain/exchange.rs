use crate::domain::market::Market;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors surfaced by the exchange gateway.
///
/// `MarketSuspended` is kept distinct from the generic API error so the
/// executor can translate it into its own `MARKET_SUSPENDED` rejection and
/// strategies can blacklist the market.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("exchange transport error: {0}")]
    Transport(String),

    #[error("exchange request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("exchange rejected request [{code}]: {message}")]
    Api { code: String, message: String },

    #[error("market {0} is unavailable or suspended")]
    MarketSuspended(Market),

    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("rate limited by exchange")]
    RateLimited,

    #[error("malformed exchange response: {0}")]
    Decode(String),
}

impl ExchangeError {
    pub fn is_market_suspended(&self) -> bool {
        matches!(self, ExchangeError::MarketSuspended(_))
    }

    /// Transport-level failures worth retrying; API rejections are final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Transport(_) | ExchangeError::Timeout(_) | ExchangeError::RateLimited
        )
    }
}

/// Exchange-reported order lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Done,
    Wait,
    Cancel,
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderState::Done => write!(f, "done"),
            OrderState::Wait => write!(f, "wait"),
            OrderState::Cancel => write!(f, "cancel"),
        }
    }
}

/// Which book side an exchange order sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeSide {
    /// Buy.
    Bid,
    /// Sell.
    Ask,
}

/// An order as reported by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub uuid: String,
    pub market: Market,
    pub side: ExchangeSide,
    pub state: OrderState,
    /// Limit price; absent for pure market orders.
    pub price: Option<Decimal>,
    /// Requested volume; absent for notional-funded market buys.
    pub volume: Option<Decimal>,
    pub executed_volume: Decimal,
    /// Funds still locked for the order (KRW for bids, coin for asks).
    pub locked: Decimal,
    pub paid_fee: Decimal,
    pub created_at: DateTime<Utc>,
}

impl ExchangeOrder {
    /// Fill rate against the requested volume, in [0, 1].
    ///
    /// Orders without a requested volume (notional market buys) report 1.0
    /// once anything executed and the state is terminal.
    pub fn fill_rate(&self) -> f64 {
        match self.volume {
            Some(requested) if requested > Decimal::ZERO => {
                use rust_decimal::prelude::ToPrimitive;
                (self.executed_volume / requested).to_f64().unwrap_or(0.0)
            }
            _ => {
                if self.executed_volume > Decimal::ZERO {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Best-effort average fill price: the reported price, else locked funds
    /// over executed volume for bids.
    pub fn average_fill_price(&self) -> Option<Decimal> {
        if let Some(price) = self.price
            && price > Decimal::ZERO
        {
            return Some(price);
        }
        if self.side == ExchangeSide::Bid
            && self.executed_volume > Decimal::ZERO
            && self.locked > Decimal::ZERO
        {
            return Some(self.locked / self.executed_volume);
        }
        None
    }
}

/// A single currency balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub balance: Decimal,
    pub locked: Decimal,
    pub avg_buy_price: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.balance + self.locked
    }
}

/// One price level of the order book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderbookUnit {
    pub ask_price: Decimal,
    pub bid_price: Decimal,
    pub ask_size: Decimal,
    pub bid_size: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orderbook {
    pub market: Market,
    pub units: Vec<OrderbookUnit>,
}

impl Orderbook {
    pub fn best_ask(&self) -> Option<Decimal> {
        self.units.first().map(|u| u.ask_price)
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.units.first().map(|u| u.bid_price)
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        let unit = self.units.first()?;
        Some((unit.ask_price + unit.bid_price) / Decimal::TWO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(volume: Option<Decimal>, executed: Decimal, locked: Decimal) -> ExchangeOrder {
        ExchangeOrder {
            uuid: "u-1".to_string(),
            market: Market::parse("KRW-BTC").unwrap(),
            side: ExchangeSide::Bid,
            state: OrderState::Done,
            price: None,
            volume,
            executed_volume: executed,
            locked,
            paid_fee: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_fill_rate_with_requested_volume() {
        let o = order(Some(dec!(1.0)), dec!(0.9), Decimal::ZERO);
        assert!((o.fill_rate() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_fill_rate_notional_market_buy() {
        let o = order(None, dec!(0.0001), Decimal::ZERO);
        assert_eq!(o.fill_rate(), 1.0);
        let empty = order(None, Decimal::ZERO, Decimal::ZERO);
        assert_eq!(empty.fill_rate(), 0.0);
    }

    #[test]
    fn test_average_fill_price_from_locked() {
        let o = order(None, dec!(0.0001), dec!(10000));
        assert_eq!(o.average_fill_price(), Some(dec!(100000000)));
    }

    #[test]
    fn test_average_fill_price_prefers_reported() {
        let mut o = order(Some(dec!(1)), dec!(1), dec!(500));
        o.price = Some(dec!(1000));
        assert_eq!(o.average_fill_price(), Some(dec!(1000)));
    }

    #[test]
    fn test_order_state_serde() {
        assert_eq!(
            serde_json::from_str::<OrderState>("\"done\"").unwrap(),
            OrderState::Done
        );
        assert_eq!(serde_json::to_string(&OrderState::Wait).unwrap(), "\"wait\"");
    }

    #[test]
    fn test_orderbook_mid() {
        let book = Orderbook {
            market: Market::parse("KRW-BTC").unwrap(),
            units: vec![OrderbookUnit {
                ask_price: dec!(1010),
                bid_price: dec!(990),
                ask_size: dec!(1),
                bid_size: dec!(1),
            }],
        };
        assert_eq!(book.mid_price(), Some(dec!(1000)));
        assert_eq!(book.best_ask(), Some(dec!(1010)));
        assert_eq!(book.best_bid(), Some(dec!(990)));
    }
}
