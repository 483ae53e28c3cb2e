use crate::config::ExecutionEnvConfig;
use crate::domain::condition::MarketSnapshot;
use crate::domain::signal::{Side, TradingSignal};
use crate::domain::trade::OrderType;
use std::fmt;

/// Why the decision leaned toward a market order.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderTypeReason {
    StrategyPolicy,
    HighVolatility(f64),
    HighConfidence(f64),
    ThinLiquidity(f64),
    AlignedImbalance(f64),
}

impl fmt::Display for OrderTypeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderTypeReason::StrategyPolicy => write!(f, "strategy policy"),
            OrderTypeReason::HighVolatility(v) => write!(f, "1m volatility {:.2}%", v),
            OrderTypeReason::HighConfidence(c) => write!(f, "confidence {:.0}", c),
            OrderTypeReason::ThinLiquidity(r) => write!(f, "liquidity ratio {:.2}", r),
            OrderTypeReason::AlignedImbalance(i) => write!(f, "imbalance {:+.2}", i),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderTypeDecision {
    pub order_type: OrderType,
    pub reasons: Vec<OrderTypeReason>,
}

impl OrderTypeDecision {
    pub fn reason_summary(&self) -> String {
        self.reasons
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Choose LIMIT or MARKET for a signal.
///
/// Ultra-short-term strategies always take the market order. Everyone else
/// needs at least two urgency reasons; a single reason stays LIMIT at the
/// opposite best quote, which crosses immediately under stable conditions.
pub fn decide(
    signal: &TradingSignal,
    snapshot: &MarketSnapshot,
    config: &ExecutionEnvConfig,
) -> OrderTypeDecision {
    if config.is_market_order_strategy(&signal.strategy) {
        return OrderTypeDecision {
            order_type: OrderType::Market,
            reasons: vec![OrderTypeReason::StrategyPolicy],
        };
    }

    let mut reasons = Vec::new();

    if snapshot.volatility_percent > config.high_volatility_percent {
        reasons.push(OrderTypeReason::HighVolatility(snapshot.volatility_percent));
    }
    if signal.confidence >= config.high_confidence {
        reasons.push(OrderTypeReason::HighConfidence(signal.confidence));
    }
    if snapshot.liquidity_ratio < config.thin_liquidity_ratio {
        reasons.push(OrderTypeReason::ThinLiquidity(snapshot.liquidity_ratio));
    }

    // Imbalance aligned with the trade direction: a bid-heavy book pushes a
    // buyer toward immediacy, an ask-heavy book a seller.
    let aligned = match signal.side {
        Side::Buy => snapshot.orderbook_imbalance >= config.imbalance_alignment,
        Side::Sell => snapshot.orderbook_imbalance <= -config.imbalance_alignment,
        Side::Hold => false,
    };
    if aligned {
        reasons.push(OrderTypeReason::AlignedImbalance(
            snapshot.orderbook_imbalance,
        ));
    }

    let order_type = if reasons.len() >= 2 {
        OrderType::Market
    } else {
        OrderType::Limit
    };

    OrderTypeDecision { order_type, reasons }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Market;
    use rust_decimal_macros::dec;

    fn snapshot(volatility: f64, liquidity: f64, imbalance: f64) -> MarketSnapshot {
        MarketSnapshot {
            market: Market::parse("KRW-BTC").unwrap(),
            mid_price: dec!(1000),
            best_ask: dec!(1001),
            best_bid: dec!(999),
            spread_percent: 0.2,
            volatility_percent: volatility,
            liquidity_ratio: liquidity,
            orderbook_imbalance: imbalance,
            can_trade: true,
            issues: vec![],
        }
    }

    fn signal(strategy: &str, confidence: f64, side: Side) -> TradingSignal {
        let mut s = TradingSignal::new(
            Market::parse("KRW-BTC").unwrap(),
            side,
            dec!(1000),
            confidence,
        );
        s.strategy = strategy.to_string();
        s
    }

    #[test]
    fn test_listed_strategy_always_market() {
        let config = ExecutionEnvConfig::default();
        let decision = decide(
            &signal("MEME_SCALPER", 10.0, Side::Buy),
            &snapshot(0.0, 10.0, 0.0),
            &config,
        );
        assert_eq!(decision.order_type, OrderType::Market);
        assert_eq!(decision.reasons, vec![OrderTypeReason::StrategyPolicy]);
    }

    #[test]
    fn test_single_reason_stays_limit() {
        let config = ExecutionEnvConfig::default();
        // Only high confidence
        let decision = decide(
            &signal("DCA", 90.0, Side::Buy),
            &snapshot(0.1, 10.0, 0.0),
            &config,
        );
        assert_eq!(decision.order_type, OrderType::Limit);
        assert_eq!(decision.reasons.len(), 1);
    }

    #[test]
    fn test_two_reasons_pick_market() {
        let config = ExecutionEnvConfig::default();
        // High confidence + thin liquidity
        let decision = decide(
            &signal("DCA", 90.0, Side::Buy),
            &snapshot(0.1, 1.0, 0.0),
            &config,
        );
        assert_eq!(decision.order_type, OrderType::Market);
        assert_eq!(decision.reasons.len(), 2);
    }

    #[test]
    fn test_imbalance_alignment_by_side() {
        let config = ExecutionEnvConfig::default();
        // Bid-heavy book: aligned for a BUY, not for a SELL
        let buy = decide(
            &signal("DCA", 90.0, Side::Buy),
            &snapshot(0.1, 10.0, 0.5),
            &config,
        );
        assert_eq!(buy.order_type, OrderType::Market);

        let sell = decide(
            &signal("DCA", 90.0, Side::Sell),
            &snapshot(0.1, 10.0, 0.5),
            &config,
        );
        assert_eq!(sell.order_type, OrderType::Limit);
    }

    #[test]
    fn test_calm_market_low_conviction_is_limit() {
        let config = ExecutionEnvConfig::default();
        let decision = decide(
            &signal("DCA", 50.0, Side::Buy),
            &snapshot(0.1, 10.0, 0.0),
            &config,
        );
        assert_eq!(decision.order_type, OrderType::Limit);
        assert!(decision.reasons.is_empty());
    }
}
