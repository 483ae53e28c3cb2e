use super::env_parse;
use anyhow::Result;

/// Pending-order timeout bounds in seconds.
const PENDING_TIMEOUT_MIN_SECS: u64 = 10;
const PENDING_TIMEOUT_MAX_SECS: u64 = 120;

/// Cadence and policy knobs for the timer-driven workers.
#[derive(Debug, Clone)]
pub struct WorkerEnvConfig {
    // Pending-order manager
    pub pending_tick_ms: u64,
    /// Limit-order timeout, clamped to [10, 120] seconds.
    pub pending_timeout_secs: u64,
    /// Unfavorable mid-price drift (%) that triggers an urgent cancel+replace.
    pub price_drift_urgent_percent: f64,
    /// Minimum signal confidence for a timeout cancel to also replace.
    pub replace_confidence_threshold: f64,
    /// Spread growth factor vs the submit snapshot that cancels the order.
    pub spread_widen_factor: f64,
    /// Fill rate below which a cancelled partial fill warrants manual follow-up.
    pub partial_warn_fill_rate: f64,
    /// Consecutive status-fetch failures before a manual-verification alert.
    pub max_fetch_failures: u32,

    // Reconciliation
    pub reconcile_interval_secs: u64,
    /// Recent-fill search window per market, in orders.
    pub reconcile_fill_window: u32,
    /// Quantity match tolerance when pairing a fill with a position.
    pub reconcile_qty_tolerance: f64,
    /// Slack subtracted from the entry time when matching fills, in seconds.
    pub reconcile_time_slack_secs: i64,

    // Close recovery
    pub recovery_poll_secs: u64,
    pub recovery_backoff_base_secs: u64,
    pub recovery_backoff_cap_secs: u64,
    /// Warn every Nth failed attempt.
    pub recovery_warn_every: u32,

    // Position registry
    pub registry_cache_ttl_secs: u64,
}

impl WorkerEnvConfig {
    pub fn from_env() -> Result<Self> {
        let pending_timeout_secs: u64 = env_parse("PENDING_TIMEOUT_SECS", 30)?;
        Ok(Self {
            pending_tick_ms: env_parse("PENDING_TICK_MS", 1000)?,
            pending_timeout_secs: pending_timeout_secs
                .clamp(PENDING_TIMEOUT_MIN_SECS, PENDING_TIMEOUT_MAX_SECS),
            price_drift_urgent_percent: env_parse("PRICE_DEVIATION_URGENT_PERCENT", 0.5)?,
            replace_confidence_threshold: env_parse("REPLACE_CONFIDENCE_THRESHOLD", 70.0)?,
            spread_widen_factor: env_parse("SPREAD_WIDEN_FACTOR", 2.0)?,
            partial_warn_fill_rate: env_parse("PARTIAL_WARN_FILL_RATE", 0.5)?,
            max_fetch_failures: env_parse("PENDING_MAX_FETCH_FAILURES", 10)?,
            reconcile_interval_secs: env_parse("RECONCILE_INTERVAL_SECS", 300)?,
            reconcile_fill_window: env_parse("RECONCILE_FILL_WINDOW", 500)?,
            reconcile_qty_tolerance: env_parse("RECONCILE_QTY_TOLERANCE", 0.10)?,
            reconcile_time_slack_secs: env_parse("RECONCILE_TIME_SLACK_SECS", 60)?,
            recovery_poll_secs: env_parse("RECOVERY_POLL_SECS", 15)?,
            recovery_backoff_base_secs: env_parse("RECOVERY_BACKOFF_BASE_SECS", 30)?,
            recovery_backoff_cap_secs: env_parse("RECOVERY_BACKOFF_CAP_SECS", 1800)?,
            recovery_warn_every: env_parse("RECOVERY_WARN_EVERY", 5)?,
            registry_cache_ttl_secs: env_parse("REGISTRY_CACHE_TTL_SECS", 5)?,
        })
    }
}

impl Default for WorkerEnvConfig {
    fn default() -> Self {
        Self {
            pending_tick_ms: 1000,
            pending_timeout_secs: 30,
            price_drift_urgent_percent: 0.5,
            replace_confidence_threshold: 70.0,
            spread_widen_factor: 2.0,
            partial_warn_fill_rate: 0.5,
            max_fetch_failures: 10,
            reconcile_interval_secs: 300,
            reconcile_fill_window: 500,
            reconcile_qty_tolerance: 0.10,
            reconcile_time_slack_secs: 60,
            recovery_poll_secs: 15,
            recovery_backoff_base_secs: 30,
            recovery_backoff_cap_secs: 1800,
            recovery_warn_every: 5,
            registry_cache_ttl_secs: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_timeout_is_clamped() {
        // SAFETY: tests in this module are the only writers of these keys
        unsafe {
            std::env::set_var("PENDING_TIMEOUT_SECS", "3");
        }
        let config = WorkerEnvConfig::from_env().unwrap();
        assert_eq!(config.pending_timeout_secs, 10);

        unsafe {
            std::env::set_var("PENDING_TIMEOUT_SECS", "600");
        }
        let config = WorkerEnvConfig::from_env().unwrap();
        assert_eq!(config.pending_timeout_secs, 120);

        unsafe {
            std::env::remove_var("PENDING_TIMEOUT_SECS");
        }
    }
}
