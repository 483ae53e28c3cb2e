use super::env_parse;
use anyhow::Result;
use rust_decimal::Decimal;

/// Circuit breaker and risk throttle limits.
#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    // Circuit breaker
    /// Consecutive execution failures before the breaker opens.
    pub consecutive_failure_limit: u32,
    /// Window within which consecutive failures must fall, in seconds.
    pub failure_window_secs: u64,
    /// Rolling slippage sample count.
    pub slippage_window: usize,
    /// Mean slippage (%) over the window that opens the breaker.
    pub mean_slippage_limit_percent: f64,
    /// Consecutive losing trades before a cool-off.
    pub loss_streak_limit: u32,
    /// Daily realized loss limit in KRW (positive number).
    pub daily_loss_limit_krw: Decimal,
    /// Base cool-off before OPEN -> HALF_OPEN, in seconds.
    pub open_cooloff_secs: u64,
    /// Cap for the doubling cool-off, in seconds.
    pub max_cooloff_secs: u64,

    // Risk throttle
    /// Rolling realized-PnL sample count per (market, strategy).
    pub throttle_window: usize,
}

impl RiskEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            consecutive_failure_limit: env_parse("BREAKER_FAILURE_LIMIT", 3)?,
            failure_window_secs: env_parse("BREAKER_FAILURE_WINDOW_SECS", 600)?,
            slippage_window: env_parse("BREAKER_SLIPPAGE_WINDOW", 10)?,
            mean_slippage_limit_percent: env_parse("BREAKER_MEAN_SLIPPAGE_PERCENT", 1.0)?,
            loss_streak_limit: env_parse("BREAKER_LOSS_STREAK_LIMIT", 3)?,
            daily_loss_limit_krw: env_parse("DAILY_LOSS_LIMIT_KRW", Decimal::from(100_000))?,
            open_cooloff_secs: env_parse("BREAKER_COOLOFF_SECS", 300)?,
            max_cooloff_secs: env_parse("BREAKER_MAX_COOLOFF_SECS", 3600)?,
            throttle_window: env_parse("THROTTLE_WINDOW", 10)?,
        })
    }
}

impl Default for RiskEnvConfig {
    fn default() -> Self {
        Self {
            consecutive_failure_limit: 3,
            failure_window_secs: 600,
            slippage_window: 10,
            mean_slippage_limit_percent: 1.0,
            loss_streak_limit: 3,
            daily_loss_limit_krw: Decimal::from(100_000),
            open_cooloff_secs: 300,
            max_cooloff_secs: 3600,
            throttle_window: 10,
        }
    }
}
