use crate::domain::market::Market;
use crate::domain::signal::{Side, truncate_reason};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

/// A persisted execution record. Append-only: once inserted a trade is never
/// mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    /// Exchange order UUID, or `SIM-<millis>` for simulated fills.
    pub order_id: String,
    pub market: Market,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Decimal,
    pub quantity: Decimal,
    /// Executed notional in KRW.
    pub total: Decimal,
    pub fee: Decimal,
    pub slippage_percent: f64,
    pub is_partial_fill: bool,
    /// Realized PnL in KRW; populated for sells only.
    pub pnl: Option<Decimal>,
    pub pnl_percent: Option<f64>,
    pub strategy: String,
    pub regime: Option<String>,
    pub confidence: f64,
    pub reason: String,
    pub simulated: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TradeValidationError {
    #[error("trade price must be positive, got {0}")]
    NonPositivePrice(Decimal),
    #[error("trade quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),
}

impl Trade {
    /// Build a record, enforcing the persistence invariants: price and quantity
    /// must be strictly positive and the reason is truncated to its limit.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: impl Into<String>,
        market: Market,
        side: Side,
        order_type: OrderType,
        price: Decimal,
        quantity: Decimal,
        fee: Decimal,
    ) -> Result<Self, TradeValidationError> {
        if price <= Decimal::ZERO {
            return Err(TradeValidationError::NonPositivePrice(price));
        }
        if quantity <= Decimal::ZERO {
            return Err(TradeValidationError::NonPositiveQuantity(quantity));
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.into(),
            market,
            side,
            order_type,
            price,
            quantity,
            total: price * quantity,
            fee,
            slippage_percent: 0.0,
            is_partial_fill: false,
            pnl: None,
            pnl_percent: None,
            strategy: String::new(),
            regime: None,
            confidence: 0.0,
            reason: String::new(),
            simulated: false,
            created_at: Utc::now(),
        })
    }

    pub fn with_signal_context(
        mut self,
        strategy: &str,
        regime: Option<&str>,
        confidence: f64,
        reason: &str,
    ) -> Self {
        self.strategy = strategy.to_string();
        self.regime = regime.map(str::to_string);
        self.confidence = confidence;
        self.reason = truncate_reason(reason).to_string();
        self
    }

    pub fn with_slippage(mut self, slippage_percent: f64) -> Self {
        self.slippage_percent = slippage_percent;
        self
    }

    pub fn with_partial_fill(mut self, partial: bool) -> Self {
        self.is_partial_fill = partial;
        self
    }

    pub fn with_pnl(mut self, pnl: Decimal, pnl_percent: f64) -> Self {
        self.pnl = Some(pnl);
        self.pnl_percent = Some(pnl_percent);
        self
    }

    pub fn simulated(mut self) -> Self {
        self.simulated = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn krw_btc() -> Market {
        Market::parse("KRW-BTC").unwrap()
    }

    #[test]
    fn test_rejects_non_positive_price() {
        let err = Trade::new(
            "o-1",
            krw_btc(),
            Side::Buy,
            OrderType::Market,
            Decimal::ZERO,
            dec!(1),
            Decimal::ZERO,
        )
        .unwrap_err();
        assert_eq!(err, TradeValidationError::NonPositivePrice(Decimal::ZERO));
    }

    #[test]
    fn test_rejects_non_positive_quantity() {
        let err = Trade::new(
            "o-1",
            krw_btc(),
            Side::Buy,
            OrderType::Market,
            dec!(100),
            dec!(-1),
            Decimal::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, TradeValidationError::NonPositiveQuantity(_)));
    }

    #[test]
    fn test_total_is_derived() {
        let trade = Trade::new(
            "o-1",
            krw_btc(),
            Side::Buy,
            OrderType::Market,
            dec!(100000000),
            dec!(0.0001),
            dec!(4),
        )
        .unwrap();
        assert_eq!(trade.total, dec!(10000.0000));
    }

    #[test]
    fn test_signal_context_truncates_reason() {
        let long = "y".repeat(700);
        let trade = Trade::new(
            "o-1",
            krw_btc(),
            Side::Buy,
            OrderType::Limit,
            dec!(100),
            dec!(1),
            Decimal::ZERO,
        )
        .unwrap()
        .with_signal_context("MEME_SCALPER", Some("BULL"), 90.0, &long);
        assert_eq!(trade.reason.len(), 500);
        assert_eq!(trade.strategy, "MEME_SCALPER");
        assert_eq!(trade.regime.as_deref(), Some("BULL"));
    }
}
