use crate::config::RiskEnvConfig;
use crate::domain::market::Market;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Asia::Seoul;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Minimum slippage samples before the rolling mean can trip the breaker.
const MIN_SLIPPAGE_SAMPLES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TripReason {
    ConsecutiveFailures(u32),
    ExcessiveSlippage(f64),
    LossStreak(u32),
    DailyLossLimit(Decimal),
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TripReason::ConsecutiveFailures(n) => write!(f, "{} consecutive failures", n),
            TripReason::ExcessiveSlippage(mean) => write!(f, "mean slippage {:.2}%", mean),
            TripReason::LossStreak(n) => write!(f, "{} consecutive losing trades", n),
            TripReason::DailyLossLimit(loss) => write!(f, "daily loss {} KRW over limit", loss),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSummary {
    pub market: String,
    pub state: BreakerState,
    pub last_trip: Option<String>,
    pub last_trip_at: Option<DateTime<Utc>>,
}

struct MarketBreaker {
    state: BreakerState,
    failure_times: VecDeque<DateTime<Utc>>,
    consecutive_losses: u32,
    slippage_samples: VecDeque<f64>,
    open_until: Option<DateTime<Utc>>,
    cooloff: Duration,
    probe_in_flight: bool,
    last_trip: Option<(TripReason, DateTime<Utc>)>,
}

impl MarketBreaker {
    fn new(base_cooloff: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_times: VecDeque::new(),
            consecutive_losses: 0,
            slippage_samples: VecDeque::new(),
            open_until: None,
            cooloff: base_cooloff,
            probe_in_flight: false,
            last_trip: None,
        }
    }

    /// Lazy OPEN -> HALF_OPEN once the cool-off has elapsed.
    fn effective_state(&mut self, now: DateTime<Utc>) -> BreakerState {
        if self.state == BreakerState::Open
            && let Some(until) = self.open_until
            && now >= until
        {
            self.state = BreakerState::HalfOpen;
            self.probe_in_flight = false;
        }
        self.state
    }

    fn trip(&mut self, market: &str, reason: TripReason, now: DateTime<Utc>, cooloff: Duration) {
        error!(
            "CircuitBreaker [{}]: OPEN ({}) - cool-off {}s",
            market,
            reason,
            cooloff.num_seconds()
        );
        self.state = BreakerState::Open;
        self.open_until = Some(now + cooloff);
        self.probe_in_flight = false;
        self.last_trip = Some((reason, now));
        self.slippage_samples.clear();
    }
}

struct Inner {
    markets: HashMap<String, MarketBreaker>,
    daily_day: NaiveDate,
    daily_loss: Decimal,
}

/// Per-market circuit breaker plus a global Asia/Seoul daily loss budget.
///
/// Counters live behind one mutex; reads are allowed to be slightly stale.
pub struct CircuitBreaker {
    config: RiskEnvConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: RiskEnvConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                markets: HashMap::new(),
                daily_day: seoul_day(Utc::now()),
                daily_loss: Decimal::ZERO,
            }),
            config,
        }
    }

    /// Restore today's realized loss from persisted daily stats at startup.
    pub fn rehydrate_daily_loss(&self, day: NaiveDate, realized_pnl: Decimal) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if day == inner.daily_day && realized_pnl < Decimal::ZERO {
            inner.daily_loss = -realized_pnl;
            info!(
                "CircuitBreaker: rehydrated daily loss {} KRW for {}",
                inner.daily_loss, day
            );
        }
    }

    /// Entry gate consulted before submitting a BUY. HALF_OPEN admits at most
    /// one probe in flight; the probe slot is taken by a successful return.
    pub fn check_entry(&self, market: &Market) -> Result<(), String> {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        roll_daily(&mut inner, now);

        if inner.daily_loss >= self.config.daily_loss_limit_krw {
            return Err(format!(
                "daily loss {} KRW at limit {} KRW until next Seoul day",
                inner.daily_loss, self.config.daily_loss_limit_krw
            ));
        }

        let base = Duration::seconds(self.config.open_cooloff_secs as i64);
        let mb = inner
            .markets
            .entry(market.as_str().to_string())
            .or_insert_with(|| MarketBreaker::new(base));

        match mb.effective_state(now) {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let reason = mb
                    .last_trip
                    .as_ref()
                    .map(|(r, _)| r.to_string())
                    .unwrap_or_else(|| "open".to_string());
                Err(reason)
            }
            BreakerState::HalfOpen => {
                if mb.probe_in_flight {
                    Err("half-open probe already in flight".to_string())
                } else {
                    mb.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self, market: &Market) {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        let base = Duration::seconds(self.config.open_cooloff_secs as i64);
        let mb = inner
            .markets
            .entry(market.as_str().to_string())
            .or_insert_with(|| MarketBreaker::new(base));

        match mb.effective_state(now) {
            BreakerState::HalfOpen => {
                info!("CircuitBreaker [{}]: HALF_OPEN -> CLOSED", market);
                mb.state = BreakerState::Closed;
                mb.failure_times.clear();
                mb.probe_in_flight = false;
                mb.open_until = None;
                mb.cooloff = base;
            }
            BreakerState::Closed => {
                mb.failure_times.clear();
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self, market: &Market, reason: &str) {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        let base = Duration::seconds(self.config.open_cooloff_secs as i64);
        let max = Duration::seconds(self.config.max_cooloff_secs as i64);
        let window = Duration::seconds(self.config.failure_window_secs as i64);
        let limit = self.config.consecutive_failure_limit;

        let mb = inner
            .markets
            .entry(market.as_str().to_string())
            .or_insert_with(|| MarketBreaker::new(base));

        warn!("CircuitBreaker [{}]: execution failure ({})", market, reason);

        match mb.effective_state(now) {
            BreakerState::HalfOpen => {
                // Failed probe reopens with the cool-off doubled, capped.
                mb.cooloff = (mb.cooloff * 2).min(max);
                let cooloff = mb.cooloff;
                mb.trip(market.as_str(), TripReason::ConsecutiveFailures(1), now, cooloff);
            }
            _ => {
                mb.failure_times.push_back(now);
                while let Some(&first) = mb.failure_times.front() {
                    if now - first > window {
                        mb.failure_times.pop_front();
                    } else {
                        break;
                    }
                }
                if mb.failure_times.len() as u32 >= limit && mb.state == BreakerState::Closed {
                    let count = mb.failure_times.len() as u32;
                    let cooloff = mb.cooloff;
                    mb.trip(
                        market.as_str(),
                        TripReason::ConsecutiveFailures(count),
                        now,
                        cooloff,
                    );
                }
            }
        }
    }

    /// Record an observed slippage sample (percent, positive = adverse).
    pub fn record_slippage(&self, market: &Market, slippage_percent: f64) {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        let base = Duration::seconds(self.config.open_cooloff_secs as i64);
        let window = self.config.slippage_window;
        let limit = self.config.mean_slippage_limit_percent;

        let mb = inner
            .markets
            .entry(market.as_str().to_string())
            .or_insert_with(|| MarketBreaker::new(base));

        mb.slippage_samples.push_back(slippage_percent);
        while mb.slippage_samples.len() > window {
            mb.slippage_samples.pop_front();
        }
        if mb.slippage_samples.len() >= MIN_SLIPPAGE_SAMPLES && mb.state == BreakerState::Closed {
            let mean =
                mb.slippage_samples.iter().sum::<f64>() / mb.slippage_samples.len() as f64;
            if mean > limit {
                let cooloff = mb.cooloff;
                mb.trip(market.as_str(), TripReason::ExcessiveSlippage(mean), now, cooloff);
            }
        }
    }

    /// Record a realized trade result: loss streak and daily loss accounting.
    pub fn record_trade_result(&self, market: &Market, pnl_percent: f64, pnl_krw: Decimal) {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        roll_daily(&mut inner, now);

        if pnl_krw < Decimal::ZERO {
            inner.daily_loss -= pnl_krw;
            if inner.daily_loss >= self.config.daily_loss_limit_krw {
                error!(
                    "CircuitBreaker: daily loss {} KRW reached limit {} KRW - entries halted until next Seoul day",
                    inner.daily_loss, self.config.daily_loss_limit_krw
                );
            }
        }

        let base = Duration::seconds(self.config.open_cooloff_secs as i64);
        let limit = self.config.loss_streak_limit;
        let mb = inner
            .markets
            .entry(market.as_str().to_string())
            .or_insert_with(|| MarketBreaker::new(base));

        if pnl_percent < 0.0 {
            mb.consecutive_losses += 1;
            if mb.consecutive_losses >= limit && mb.state == BreakerState::Closed {
                let streak = mb.consecutive_losses;
                let cooloff = mb.cooloff;
                mb.trip(market.as_str(), TripReason::LossStreak(streak), now, cooloff);
                mb.consecutive_losses = 0;
            }
        } else {
            mb.consecutive_losses = 0;
        }
    }

    pub fn state(&self, market: &Market) -> BreakerState {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        let base = Duration::seconds(self.config.open_cooloff_secs as i64);
        inner
            .markets
            .entry(market.as_str().to_string())
            .or_insert_with(|| MarketBreaker::new(base))
            .effective_state(now)
    }

    pub fn summary(&self) -> Vec<BreakerSummary> {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        let mut out: Vec<BreakerSummary> = inner
            .markets
            .iter_mut()
            .map(|(market, mb)| BreakerSummary {
                market: market.clone(),
                state: mb.effective_state(now),
                last_trip: mb.last_trip.as_ref().map(|(r, _)| r.to_string()),
                last_trip_at: mb.last_trip.as_ref().map(|(_, at)| *at),
            })
            .collect();
        out.sort_by(|a, b| a.market.cmp(&b.market));
        out
    }

    pub fn daily_loss(&self) -> Decimal {
        self.inner.lock().expect("breaker lock poisoned").daily_loss
    }
}

fn roll_daily(inner: &mut Inner, now: DateTime<Utc>) {
    let today = seoul_day(now);
    if today != inner.daily_day {
        info!(
            "CircuitBreaker: Seoul day rollover {} -> {}, daily loss reset",
            inner.daily_day, today
        );
        inner.daily_day = today;
        inner.daily_loss = Decimal::ZERO;
    }
}

/// The calendar day in Asia/Seoul used for the daily loss budget.
pub fn seoul_day(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&Seoul).date_naive()
}
