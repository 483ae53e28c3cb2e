use crate::domain::market::Market;
use crate::domain::signal::Side;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle states of a supervised limit order.
///
/// `Filled`, `Cancelled`, `Replaced` and `Expired` are terminal; a record
/// reaches a terminal state exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Replaced,
    Expired,
}

impl PendingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PendingStatus::Filled
                | PendingStatus::Cancelled
                | PendingStatus::Replaced
                | PendingStatus::Expired
        )
    }
}

impl fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PendingStatus::Pending => "PENDING",
            PendingStatus::PartiallyFilled => "PARTIALLY_FILLED",
            PendingStatus::Filled => "FILLED",
            PendingStatus::Cancelled => "CANCELLED",
            PendingStatus::Replaced => "REPLACED",
            PendingStatus::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PendingStateError {
    #[error("invalid pending-order transition {from} -> {to}")]
    InvalidTransition {
        from: PendingStatus,
        to: PendingStatus,
    },
    #[error("filled quantity {filled} exceeds order quantity {quantity}")]
    Overfill { filled: Decimal, quantity: Decimal },
}

/// Why a pending order was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    Timeout,
    PartialTimeout,
    PriceDrift,
    SpreadWidened,
    MarketCondition,
    Expired,
    Manual,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancelReason::Timeout => "TIMEOUT",
            CancelReason::PartialTimeout => "PARTIAL_TIMEOUT",
            CancelReason::PriceDrift => "PRICE_DRIFT",
            CancelReason::SpreadWidened => "SPREAD_WIDENED",
            CancelReason::MarketCondition => "MARKET_CONDITION",
            CancelReason::Expired => "EXPIRED",
            CancelReason::Manual => "MANUAL",
        };
        f.write_str(s)
    }
}

/// Market view captured when the limit order was submitted. The cancel policy
/// compares live conditions against this.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SubmitSnapshot {
    pub mid_price: Decimal,
    pub spread_percent: f64,
    pub volatility_percent: f64,
    pub orderbook_imbalance: f64,
}

/// A durable record of a live limit order under supervision.
///
/// All state changes go through [`PendingOrder::transition`]; the status field
/// is never assigned directly outside this module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrder {
    pub order_id: String,
    pub market: Market,
    pub side: Side,
    pub limit_price: Decimal,
    pub quantity: Decimal,
    pub notional: Decimal,
    pub snapshot: SubmitSnapshot,
    pub strategy: String,
    pub confidence: f64,
    status: PendingStatus,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Decimal,
    pub fill_duration_ms: Option<i64>,
    pub slippage_percent: Option<f64>,
    pub cancel_reason: Option<CancelReason>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_checked_at: DateTime<Utc>,
    pub check_count: u32,
}

impl PendingOrder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: impl Into<String>,
        market: Market,
        side: Side,
        limit_price: Decimal,
        quantity: Decimal,
        snapshot: SubmitSnapshot,
        strategy: impl Into<String>,
        confidence: f64,
        timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id: order_id.into(),
            market,
            side,
            limit_price,
            quantity,
            notional: limit_price * quantity,
            snapshot,
            strategy: strategy.into(),
            confidence,
            status: PendingStatus::Pending,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            fill_duration_ms: None,
            slippage_percent: None,
            cancel_reason: None,
            note: None,
            created_at: now,
            expires_at: now + timeout,
            last_checked_at: now,
            check_count: 0,
        }
    }

    pub fn status(&self) -> PendingStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fill rate in [0, 1].
    pub fn fill_rate(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        if self.quantity <= Decimal::ZERO {
            return 0.0;
        }
        (self.filled_quantity / self.quantity).to_f64().unwrap_or(0.0)
    }

    /// The only mutation path for the status field. Terminal states accept no
    /// further transitions; `Pending -> Pending` and
    /// `PartiallyFilled -> PartiallyFilled` are no-ops.
    pub fn transition(&mut self, to: PendingStatus) -> Result<(), PendingStateError> {
        let from = self.status;
        let allowed = match (from, to) {
            _ if from == to && !from.is_terminal() => true,
            (PendingStatus::Pending, _) => true,
            (PendingStatus::PartiallyFilled, next) => next != PendingStatus::Pending,
            _ => false,
        };
        if !allowed {
            return Err(PendingStateError::InvalidTransition { from, to });
        }
        self.status = to;
        Ok(())
    }

    /// Record an observed fill level, preserving `filled <= quantity`.
    pub fn record_fill(
        &mut self,
        filled_quantity: Decimal,
        avg_fill_price: Decimal,
    ) -> Result<(), PendingStateError> {
        if filled_quantity > self.quantity {
            return Err(PendingStateError::Overfill {
                filled: filled_quantity,
                quantity: self.quantity,
            });
        }
        self.filled_quantity = filled_quantity;
        if avg_fill_price > Decimal::ZERO {
            self.avg_fill_price = avg_fill_price;
        }
        if filled_quantity > Decimal::ZERO && !self.status.is_terminal() {
            self.transition(PendingStatus::PartiallyFilled)?;
        }
        Ok(())
    }

    pub fn touch_check(&mut self, now: DateTime<Utc>) {
        self.last_checked_at = now.max(self.created_at);
        self.check_count += 1;
    }

    /// Age of the record in milliseconds.
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_milliseconds()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn append_note(&mut self, note: &str) {
        match &mut self.note {
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(note);
            }
            None => self.note = Some(note.to_string()),
        }
    }

    /// Used by repository hydration; bypasses transition checks because the
    /// stored value already passed them when written.
    pub fn restore_status(&mut self, status: PendingStatus) {
        self.status = status;
    }
}
