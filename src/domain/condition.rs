use crate::domain::market::Market;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Why a market failed the tradability check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConditionIssue {
    SpreadTooWide { spread_percent: f64, limit: f64 },
    ExcessiveVolatility { volatility_percent: f64, limit: f64 },
    InsufficientLiquidity { liquidity_ratio: f64, minimum: f64 },
    OrderbookUnavailable { detail: String },
}

impl fmt::Display for ConditionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionIssue::SpreadTooWide {
                spread_percent,
                limit,
            } => write!(f, "spread {:.3}% > {:.3}%", spread_percent, limit),
            ConditionIssue::ExcessiveVolatility {
                volatility_percent,
                limit,
            } => write!(f, "1m volatility {:.2}% > {:.2}%", volatility_percent, limit),
            ConditionIssue::InsufficientLiquidity {
                liquidity_ratio,
                minimum,
            } => write!(f, "liquidity ratio {:.2} < {:.2}", liquidity_ratio, minimum),
            ConditionIssue::OrderbookUnavailable { detail } => {
                write!(f, "orderbook unavailable: {}", detail)
            }
        }
    }
}

/// Point-in-time view of a market used by the entry gate and the pending-order
/// cancel policy.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub market: Market,
    pub mid_price: Decimal,
    pub best_ask: Decimal,
    pub best_bid: Decimal,
    /// (ask − bid) / mid, in percent.
    pub spread_percent: f64,
    /// Mid-price range over the last minute, in percent of the latest mid.
    pub volatility_percent: f64,
    /// Top-of-book depth notional divided by the intended order notional.
    pub liquidity_ratio: f64,
    /// (bidVol − askVol) / (bidVol + askVol) over the top levels, in [-1, +1].
    pub orderbook_imbalance: f64,
    pub can_trade: bool,
    pub issues: Vec<ConditionIssue>,
}

impl MarketSnapshot {
    /// A snapshot representing an unobservable market; always untradable.
    pub fn unavailable(market: Market, detail: impl Into<String>) -> Self {
        Self {
            market,
            mid_price: Decimal::ZERO,
            best_ask: Decimal::ZERO,
            best_bid: Decimal::ZERO,
            spread_percent: 0.0,
            volatility_percent: 0.0,
            liquidity_ratio: 0.0,
            orderbook_imbalance: 0.0,
            can_trade: false,
            issues: vec![ConditionIssue::OrderbookUnavailable {
                detail: detail.into(),
            }],
        }
    }

    pub fn issue_summary(&self) -> String {
        self.issues
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_snapshot_is_untradable() {
        let snap = MarketSnapshot::unavailable(Market::parse("KRW-BTC").unwrap(), "timeout");
        assert!(!snap.can_trade);
        assert_eq!(snap.issues.len(), 1);
        assert!(snap.issue_summary().contains("timeout"));
    }

    #[test]
    fn test_issue_display() {
        let issue = ConditionIssue::SpreadTooWide {
            spread_percent: 0.512,
            limit: 0.3,
        };
        assert_eq!(issue.to_string(), "spread 0.512% > 0.300%");
    }
}
