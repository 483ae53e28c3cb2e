use crate::domain::condition::ConditionIssue;
use crate::domain::exchange::ExchangeError;
use crate::domain::market::Market;
use rust_decimal::Decimal;
use thiserror::Error;

/// Final rejection categories reported to strategies by the order executor.
///
/// Categorized, not chained: transient exchange failures are retried inside the
/// executor; whatever reaches a strategy is one of these.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("market conditions block trading: {}", format_issues(.issues))]
    MarketCondition { issues: Vec<ConditionIssue> },

    #[error("exchange api error: {0}")]
    Api(ExchangeError),

    #[error("order {order_id} could not be verified after {attempts} checks")]
    VerificationFailed { order_id: String, attempts: u32 },

    #[error("order {order_id} finished without any fill")]
    NoFill { order_id: String },

    #[error("execution failed: {0}")]
    Exception(#[from] anyhow::Error),

    #[error("circuit breaker open for {market}: {reason}")]
    CircuitBreaker { market: Market, reason: String },

    #[error("notional {notional} KRW below exchange minimum {minimum} KRW")]
    BelowMinOrderAmount { notional: Decimal, minimum: Decimal },

    #[error("market {0} is suspended")]
    MarketSuspended(Market),

    #[error("no {currency} balance to sell")]
    NoBalance { currency: String },
}

impl ExecutionError {
    /// Stable error code for persistence, notifications and strategy matching.
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::MarketCondition { .. } => "MARKET_CONDITION",
            ExecutionError::Api(_) => "API_ERROR",
            ExecutionError::VerificationFailed { .. } => "VERIFICATION_FAILED",
            ExecutionError::NoFill { .. } => "NO_FILL",
            ExecutionError::Exception(_) => "EXCEPTION",
            ExecutionError::CircuitBreaker { .. } => "CIRCUIT_BREAKER",
            ExecutionError::BelowMinOrderAmount { .. } => "BELOW_MIN_ORDER_AMOUNT",
            ExecutionError::MarketSuspended(_) => "MARKET_SUSPENDED",
            ExecutionError::NoBalance { .. } => "NO_BALANCE",
        }
    }

    /// Translate a gateway error, mapping "market unavailable" to the distinct
    /// suspension category.
    pub fn from_exchange(error: ExchangeError, market: &Market) -> Self {
        if error.is_market_suspended() {
            ExecutionError::MarketSuspended(market.clone())
        } else {
            ExecutionError::Api(error)
        }
    }

    /// Whether the failure counts against the circuit breaker. Business-rule
    /// rejections that never reached the exchange do not.
    pub fn counts_as_execution_failure(&self) -> bool {
        matches!(
            self,
            ExecutionError::Api(_)
                | ExecutionError::VerificationFailed { .. }
                | ExecutionError::NoFill { .. }
                | ExecutionError::Exception(_)
        )
    }
}

fn format_issues(issues: &[ConditionIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_suspended_translation() {
        let market = Market::parse("KRW-BTC").unwrap();
        let err =
            ExecutionError::from_exchange(ExchangeError::MarketSuspended(market.clone()), &market);
        assert_eq!(err.code(), "MARKET_SUSPENDED");

        let err = ExecutionError::from_exchange(
            ExchangeError::Api {
                code: "insufficient_funds".to_string(),
                message: "not enough KRW".to_string(),
            },
            &market,
        );
        assert_eq!(err.code(), "API_ERROR");
    }

    #[test]
    fn test_failure_accounting() {
        let market = Market::parse("KRW-BTC").unwrap();
        assert!(
            ExecutionError::NoFill {
                order_id: "x".to_string()
            }
            .counts_as_execution_failure()
        );
        assert!(
            !ExecutionError::CircuitBreaker {
                market,
                reason: "open".to_string()
            }
            .counts_as_execution_failure()
        );
        assert!(
            !ExecutionError::BelowMinOrderAmount {
                notional: Decimal::from(100),
                minimum: Decimal::from(5100)
            }
            .counts_as_execution_failure()
        );
    }
}
