use crate::domain::market::Market;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
    Abandoned,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
            PositionStatus::Abandoned => "ABANDONED",
        };
        f.write_str(s)
    }
}

/// Why a position left the OPEN state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Reconciliation matched an exchange sell fill to the position.
    SyncConfirmed,
    /// Reconciliation found no balance and no matching fill.
    SyncNoBalance,
    /// Close recovery found the coin balance already gone.
    RecoveryNoBalance,
    /// Remaining quantity was below the exchange minimum notional.
    RecoveryDust,
    /// Close recovery executed the exit sell.
    RecoveryExecuted,
    /// The owning strategy exited normally.
    StrategyExit,
    /// Operator-initiated close.
    Manual,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::SyncConfirmed => "SYNC_CONFIRMED",
            CloseReason::SyncNoBalance => "SYNC_NO_BALANCE",
            CloseReason::RecoveryNoBalance => "RECOVERY_NO_BALANCE",
            CloseReason::RecoveryDust => "RECOVERY_DUST",
            CloseReason::RecoveryExecuted => "RECOVERY_EXECUTED",
            CloseReason::StrategyExit => "STRATEGY_EXIT",
            CloseReason::Manual => "MANUAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SYNC_CONFIRMED" => Some(CloseReason::SyncConfirmed),
            "SYNC_NO_BALANCE" => Some(CloseReason::SyncNoBalance),
            "RECOVERY_NO_BALANCE" => Some(CloseReason::RecoveryNoBalance),
            "RECOVERY_DUST" => Some(CloseReason::RecoveryDust),
            "RECOVERY_EXECUTED" => Some(CloseReason::RecoveryExecuted),
            "STRATEGY_EXIT" => Some(CloseReason::StrategyExit),
            "MANUAL" => Some(CloseReason::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The exit half of a close, applied to an OPEN position exactly once.
#[derive(Debug, Clone)]
pub struct CloseFill {
    pub exit_price: Decimal,
    pub exit_time: DateTime<Utc>,
    pub reason: CloseReason,
    pub pnl_amount: Decimal,
    pub pnl_percent: f64,
}

impl CloseFill {
    /// Derive the PnL fields from entry and exit terms.
    pub fn from_prices(
        entry_price: Decimal,
        quantity: Decimal,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        reason: CloseReason,
    ) -> Self {
        let pnl_amount = (exit_price - entry_price) * quantity;
        let pnl_percent = if entry_price > Decimal::ZERO {
            ((exit_price - entry_price) / entry_price * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };
        Self {
            exit_price,
            exit_time,
            reason,
            pnl_amount,
            pnl_percent,
        }
    }
}

/// A strategy-held position. The core depends only on these fields; strategies
/// may track additional state (trailing peaks, take-profit levels) on their own
/// side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub market: Market,
    pub strategy: String,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub entry_time: DateTime<Utc>,
    pub status: PositionStatus,
    pub exit_price: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<CloseReason>,
    pub pnl_amount: Option<Decimal>,
    pub pnl_percent: Option<f64>,
}

impl Position {
    pub fn open(
        market: Market,
        strategy: impl Into<String>,
        entry_price: Decimal,
        quantity: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            market,
            strategy: strategy.into(),
            entry_price,
            quantity,
            entry_time: Utc::now(),
            status: PositionStatus::Open,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            pnl_amount: None,
            pnl_percent: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Apply a close fill. Idempotence is enforced at the repository level
    /// (close is a conditional update on OPEN); this helper only fills fields.
    pub fn apply_close(&mut self, fill: &CloseFill) {
        self.status = PositionStatus::Closed;
        self.exit_price = Some(fill.exit_price);
        self.exit_time = Some(fill.exit_time);
        self.exit_reason = Some(fill.reason);
        self.pnl_amount = Some(fill.pnl_amount);
        self.pnl_percent = Some(fill.pnl_percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_close_fill_pnl() {
        let fill = CloseFill::from_prices(
            dec!(200),
            dec!(5),
            dec!(210),
            Utc::now(),
            CloseReason::SyncConfirmed,
        );
        assert_eq!(fill.pnl_amount, dec!(50));
        assert!((fill.pnl_percent - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_close_fill_zero_entry_guard() {
        let fill = CloseFill::from_prices(
            Decimal::ZERO,
            dec!(5),
            dec!(210),
            Utc::now(),
            CloseReason::SyncNoBalance,
        );
        assert_eq!(fill.pnl_percent, 0.0);
    }

    #[test]
    fn test_apply_close() {
        let mut position = Position::open(Market::parse("KRW-XRP").unwrap(), "DCA", dec!(500), dec!(20));
        assert!(position.is_open());
        let fill = CloseFill::from_prices(
            dec!(500),
            dec!(20),
            dec!(550),
            Utc::now(),
            CloseReason::RecoveryExecuted,
        );
        position.apply_close(&fill);
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.exit_price, Some(dec!(550)));
        assert_eq!(position.exit_reason, Some(CloseReason::RecoveryExecuted));
        assert!((position.pnl_percent.unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_close_reason_round_trip() {
        for reason in [
            CloseReason::SyncConfirmed,
            CloseReason::SyncNoBalance,
            CloseReason::RecoveryNoBalance,
            CloseReason::RecoveryDust,
            CloseReason::RecoveryExecuted,
            CloseReason::StrategyExit,
            CloseReason::Manual,
        ] {
            assert_eq!(CloseReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(CloseReason::parse("UNKNOWN"), None);
    }
}
