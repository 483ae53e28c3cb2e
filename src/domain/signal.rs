use crate::domain::market::Market;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a signal reason kept on persisted records.
pub const MAX_REASON_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
            Side::Hold => write!(f, "HOLD"),
        }
    }
}

/// A strategy's intent, handed to the order executor.
///
/// `price` is the strategy's reference price and may be zero, in which case the
/// executor resolves a price itself (ticker, then orderbook mid).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub market: Market,
    pub side: Side,
    pub price: Decimal,
    /// Signal conviction in [0, 100].
    pub confidence: f64,
    pub strategy: String,
    pub regime: Option<String>,
    pub reason: String,
}

impl TradingSignal {
    pub fn new(market: Market, side: Side, price: Decimal, confidence: f64) -> Self {
        Self {
            market,
            side,
            price,
            confidence: confidence.clamp(0.0, 100.0),
            strategy: String::new(),
            regime: None,
            reason: String::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_regime(mut self, regime: impl Into<String>) -> Self {
        self.regime = Some(regime.into());
        self
    }

    /// Reason truncated to the persistence limit, at a char boundary.
    pub fn truncated_reason(&self) -> &str {
        truncate_reason(&self.reason)
    }
}

pub fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_REASON_LEN {
        return reason;
    }
    let mut end = MAX_REASON_LEN;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn krw_btc() -> Market {
        Market::parse("KRW-BTC").unwrap()
    }

    #[test]
    fn test_confidence_is_clamped() {
        let signal = TradingSignal::new(krw_btc(), Side::Buy, dec!(100), 150.0);
        assert_eq!(signal.confidence, 100.0);
        let signal = TradingSignal::new(krw_btc(), Side::Sell, dec!(100), -5.0);
        assert_eq!(signal.confidence, 0.0);
    }

    #[test]
    fn test_reason_truncation() {
        let long = "x".repeat(800);
        let signal = TradingSignal::new(krw_btc(), Side::Buy, dec!(100), 50.0).with_reason(long);
        assert_eq!(signal.truncated_reason().len(), MAX_REASON_LEN);

        let short = TradingSignal::new(krw_btc(), Side::Buy, dec!(100), 50.0).with_reason("ok");
        assert_eq!(short.truncated_reason(), "ok");
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        // Multi-byte chars straddling the limit must not split
        let reason = "가".repeat(400); // 3 bytes each, 1200 bytes total
        let truncated = truncate_reason(&reason);
        assert!(truncated.len() <= MAX_REASON_LEN);
        assert!(reason.starts_with(truncated));
    }

    #[test]
    fn test_side_display() {
        assert_eq!(Side::Buy.to_string(), "BUY");
        assert_eq!(Side::Sell.to_string(), "SELL");
        assert_eq!(Side::Hold.to_string(), "HOLD");
    }
}
