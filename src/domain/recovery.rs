use crate::domain::market::Market;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Exponent cap for the recovery backoff: delays stop growing after
/// `base * 2^6`.
pub const MAX_BACKOFF_EXPONENT: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryStatus {
    Pending,
    Processing,
    Retrying,
    Completed,
}

impl RecoveryStatus {
    pub fn is_active(self) -> bool {
        self != RecoveryStatus::Completed
    }
}

impl fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecoveryStatus::Pending => "PENDING",
            RecoveryStatus::Processing => "PROCESSING",
            RecoveryStatus::Retrying => "RETRYING",
            RecoveryStatus::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}

/// A retryable unit of work attempting to realize a position exit that failed.
///
/// At most one active task exists per (strategy, position_id); enqueueing a
/// duplicate refreshes the existing task instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseRecoveryTask {
    pub id: String,
    pub strategy: String,
    pub position_id: String,
    pub market: Market,
    pub target_quantity: Decimal,
    pub entry_price: Decimal,
    pub last_known_price: Decimal,
    pub attempt_count: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub status: RecoveryStatus,
    pub reason: String,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CloseRecoveryTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        strategy: impl Into<String>,
        position_id: impl Into<String>,
        market: Market,
        target_quantity: Decimal,
        entry_price: Decimal,
        last_known_price: Decimal,
        reason: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            strategy: strategy.into(),
            position_id: position_id.into(),
            market,
            target_quantity,
            entry_price,
            last_known_price,
            attempt_count: 0,
            next_attempt_at: now,
            status: RecoveryStatus::Pending,
            reason: reason.into(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh an existing active task with the terms of a new enqueue request
    /// and make it due immediately.
    pub fn refresh(&mut self, target_quantity: Decimal, last_known_price: Decimal, reason: &str) {
        let now = Utc::now();
        self.target_quantity = target_quantity;
        self.last_known_price = last_known_price;
        self.reason = reason.to_string();
        self.next_attempt_at = now;
        self.updated_at = now;
        if self.status == RecoveryStatus::Retrying {
            self.status = RecoveryStatus::Pending;
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active()
            && self.status != RecoveryStatus::Processing
            && self.next_attempt_at <= now
    }

    /// Record a failed attempt and schedule the next one with capped
    /// exponential backoff: `base * 2^min(attempt-1, 6)`, never beyond `cap`.
    pub fn record_failure(&mut self, error: &str, base: Duration, cap: Duration) {
        let now = Utc::now();
        self.attempt_count += 1;
        let exponent = self.attempt_count.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let delay = base * 2_i32.pow(exponent);
        let delay = if delay > cap { cap } else { delay };
        self.next_attempt_at = now + delay;
        self.status = RecoveryStatus::Retrying;
        self.last_error = Some(error.to_string());
        self.updated_at = now;
    }

    pub fn complete(&mut self) {
        self.status = RecoveryStatus::Completed;
        self.updated_at = Utc::now();
    }
}
