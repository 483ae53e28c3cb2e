use crate::domain::market::Market;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::info;

/// Multipliers applied by trailing loss-streak depth.
const STREAK_TWO_MULTIPLIER: f64 = 0.7;
const STREAK_THREE_MULTIPLIER: f64 = 0.5;
const STREAK_DEEP_MULTIPLIER: f64 = 0.3;

/// Sizing decision for one (market, strategy) entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleDecision {
    /// Position-size multiplier in (0, 1].
    pub multiplier: f64,
    pub sample_size: usize,
    pub reason: String,
}

/// Shrinks entry sizes after recent realized losses and restores full size
/// once results recover. One rolling PnL window per (market, strategy).
pub struct RiskThrottle {
    window: usize,
    samples: Mutex<HashMap<(String, String), VecDeque<f64>>>,
}

impl RiskThrottle {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_trade(&self, market: &Market, strategy: &str, pnl_percent: f64) {
        let mut samples = self.samples.lock().expect("throttle lock poisoned");
        let window = self
            .samples_key(market, strategy, &mut samples);
        window.push_back(pnl_percent);
        while window.len() > self.window {
            window.pop_front();
        }
    }

    pub fn decide(&self, market: &Market, strategy: &str) -> ThrottleDecision {
        let mut samples = self.samples.lock().expect("throttle lock poisoned");
        let window = self.samples_key(market, strategy, &mut samples);

        let sample_size = window.len();
        let streak = window.iter().rev().take_while(|pnl| **pnl < 0.0).count();

        let (multiplier, reason) = match streak {
            0 | 1 => (1.0, "full size".to_string()),
            2 => (
                STREAK_TWO_MULTIPLIER,
                "2 consecutive losses".to_string(),
            ),
            3 => (
                STREAK_THREE_MULTIPLIER,
                "3 consecutive losses".to_string(),
            ),
            n => (
                STREAK_DEEP_MULTIPLIER,
                format!("{} consecutive losses", n),
            ),
        };

        if multiplier < 1.0 {
            info!(
                "RiskThrottle [{} / {}]: sizing at {:.0}% ({})",
                market,
                strategy,
                multiplier * 100.0,
                reason
            );
        }

        ThrottleDecision {
            multiplier,
            sample_size,
            reason,
        }
    }

    fn samples_key<'a>(
        &self,
        market: &Market,
        strategy: &str,
        samples: &'a mut HashMap<(String, String), VecDeque<f64>>,
    ) -> &'a mut VecDeque<f64> {
        samples
            .entry((market.as_str().to_string(), strategy.to_string()))
            .or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle() -> RiskThrottle {
        RiskThrottle::new(10)
    }

    fn market() -> Market {
        Market::parse("KRW-BTC").unwrap()
    }

    #[test]
    fn test_full_size_without_history() {
        let t = throttle();
        let decision = t.decide(&market(), "DCA");
        assert_eq!(decision.multiplier, 1.0);
        assert_eq!(decision.sample_size, 0);
    }

    #[test]
    fn test_single_loss_keeps_full_size() {
        let t = throttle();
        t.record_trade(&market(), "DCA", -2.0);
        assert_eq!(t.decide(&market(), "DCA").multiplier, 1.0);
    }

    #[test]
    fn test_streak_shrinks_progressively() {
        let t = throttle();
        let m = market();
        t.record_trade(&m, "DCA", -1.0);
        t.record_trade(&m, "DCA", -1.0);
        assert_eq!(t.decide(&m, "DCA").multiplier, STREAK_TWO_MULTIPLIER);
        t.record_trade(&m, "DCA", -1.0);
        assert_eq!(t.decide(&m, "DCA").multiplier, STREAK_THREE_MULTIPLIER);
        t.record_trade(&m, "DCA", -1.0);
        assert_eq!(t.decide(&m, "DCA").multiplier, STREAK_DEEP_MULTIPLIER);
    }

    #[test]
    fn test_profit_restores_full_size() {
        let t = throttle();
        let m = market();
        for _ in 0..4 {
            t.record_trade(&m, "DCA", -1.0);
        }
        t.record_trade(&m, "DCA", 3.0);
        let decision = t.decide(&m, "DCA");
        assert_eq!(decision.multiplier, 1.0);
        assert_eq!(decision.sample_size, 5);
    }

    #[test]
    fn test_windows_are_isolated_per_key() {
        let t = throttle();
        let m = market();
        t.record_trade(&m, "DCA", -1.0);
        t.record_trade(&m, "DCA", -1.0);
        assert!(t.decide(&m, "DCA").multiplier < 1.0);
        assert_eq!(t.decide(&m, "SCALPER").multiplier, 1.0);
        let other = Market::parse("KRW-ETH").unwrap();
        assert_eq!(t.decide(&other, "DCA").multiplier, 1.0);
    }

    #[test]
    fn test_window_is_bounded() {
        let t = RiskThrottle::new(3);
        let m = market();
        for _ in 0..10 {
            t.record_trade(&m, "DCA", -1.0);
        }
        let decision = t.decide(&m, "DCA");
        assert_eq!(decision.sample_size, 3);
        assert_eq!(decision.multiplier, STREAK_THREE_MULTIPLIER);
    }
}
