#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use wontrader::application::circuit_breaker::CircuitBreaker;
use wontrader::application::close_recovery::CloseRecoveryQueue;
use wontrader::application::execution::OrderExecutor;
use wontrader::application::market_condition::MarketConditionChecker;
use wontrader::application::market_locks::MarketLocks;
use wontrader::application::pending_manager::{PendingOrderManager, ReplaceRequest};
use wontrader::application::position_registry::PositionRegistry;
use wontrader::application::reconciliation::ReconciliationService;
use wontrader::application::risk_throttle::RiskThrottle;
use wontrader::config::{ExecutionEnvConfig, RiskEnvConfig, WorkerEnvConfig};
use wontrader::domain::market::Market;
use wontrader::domain::ports::{AlertLevel, Notifier};
use wontrader::domain::position::Position;
use wontrader::domain::signal::{Side, TradingSignal};
use wontrader::infrastructure::exchange::simulated::SimulatedExchange;
use wontrader::infrastructure::{
    InMemoryAuditLogRepository, InMemoryDailyStatsRepository, InMemoryPendingOrderRepository,
    InMemoryPositionRepository, InMemoryRecoveryTaskRepository, InMemoryTradeRepository,
};

/// Captures alerts so tests can assert on notifications.
#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<(AlertLevel, String)>>,
}

impl RecordingNotifier {
    pub fn alerts(&self) -> Vec<(AlertLevel, String)> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn has_alert_containing(&self, fragment: &str) -> bool {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .any(|(_, title)| title.contains(fragment))
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, level: AlertLevel, title: &str, _body: &str) {
        self.alerts.lock().unwrap().push((level, title.to_string()));
    }
}

/// Fully wired trading core over the simulated exchange and in-memory stores.
pub struct Harness {
    pub exchange: Arc<SimulatedExchange>,
    pub trades: Arc<InMemoryTradeRepository>,
    pub pending_repo: Arc<InMemoryPendingOrderRepository>,
    pub positions: Arc<InMemoryPositionRepository>,
    pub recovery_tasks: Arc<InMemoryRecoveryTaskRepository>,
    pub stats: Arc<InMemoryDailyStatsRepository>,
    pub audit: Arc<InMemoryAuditLogRepository>,
    pub notifier: Arc<RecordingNotifier>,
    pub breaker: Arc<CircuitBreaker>,
    pub throttle: Arc<RiskThrottle>,
    pub registry: Arc<PositionRegistry>,
    pub pending: Arc<PendingOrderManager>,
    pub executor: Arc<OrderExecutor>,
    pub reconciliation: Arc<ReconciliationService>,
    pub recovery: Arc<CloseRecoveryQueue>,
    pub replace_rx: tokio::sync::Mutex<mpsc::Receiver<ReplaceRequest>>,
}

/// Execution config tuned for fast tests: real thresholds, short waits.
pub fn test_execution_config() -> ExecutionEnvConfig {
    ExecutionEnvConfig {
        trading_enabled: true,
        quick_check_delay_ms: 10,
        verify_initial_delay_ms: 10,
        verify_max_delay_ms: 40,
        ..ExecutionEnvConfig::default()
    }
}

pub fn test_worker_config() -> WorkerEnvConfig {
    WorkerEnvConfig::default()
}

pub fn test_risk_config() -> RiskEnvConfig {
    RiskEnvConfig::default()
}

pub fn harness() -> Harness {
    harness_with(|_, _, _| {})
}

pub fn harness_with(
    tune: impl FnOnce(&mut ExecutionEnvConfig, &mut WorkerEnvConfig, &mut RiskEnvConfig),
) -> Harness {
    let mut execution = test_execution_config();
    let mut workers = test_worker_config();
    let mut risk = test_risk_config();
    tune(&mut execution, &mut workers, &mut risk);

    let exchange = Arc::new(SimulatedExchange::new());
    let trades = Arc::new(InMemoryTradeRepository::new());
    let pending_repo = Arc::new(InMemoryPendingOrderRepository::new());
    let positions = Arc::new(InMemoryPositionRepository::new());
    let recovery_tasks = Arc::new(InMemoryRecoveryTaskRepository::new());
    let stats = Arc::new(InMemoryDailyStatsRepository::new());
    let audit = Arc::new(InMemoryAuditLogRepository::new());
    let notifier = Arc::new(RecordingNotifier::default());

    let breaker = Arc::new(CircuitBreaker::new(risk.clone()));
    let throttle = Arc::new(RiskThrottle::new(risk.throttle_window));
    let checker = Arc::new(MarketConditionChecker::new(
        exchange.clone(),
        execution.clone(),
    ));
    let locks = Arc::new(MarketLocks::new());
    let registry = Arc::new(PositionRegistry::new(
        positions.clone(),
        Duration::from_secs(workers.registry_cache_ttl_secs),
    ));

    let (replace_tx, replace_rx) = mpsc::channel(16);
    let pending = Arc::new(PendingOrderManager::new(
        exchange.clone(),
        pending_repo.clone(),
        trades.clone(),
        breaker.clone(),
        checker.clone(),
        notifier.clone(),
        locks.clone(),
        replace_tx,
        workers.clone(),
        execution.fill_threshold,
    ));

    let executor = Arc::new(OrderExecutor::new(
        exchange.clone(),
        trades.clone(),
        stats.clone(),
        checker.clone(),
        breaker.clone(),
        throttle.clone(),
        pending.clone(),
        notifier.clone(),
        execution.clone(),
    ));

    let reconciliation = Arc::new(ReconciliationService::new(
        exchange.clone(),
        positions.clone(),
        audit.clone(),
        registry.clone(),
        notifier.clone(),
        workers.clone(),
    ));

    let recovery = Arc::new(CloseRecoveryQueue::new(
        recovery_tasks.clone(),
        positions.clone(),
        exchange.clone(),
        executor.clone(),
        registry.clone(),
        locks.clone(),
        notifier.clone(),
        audit.clone(),
        workers.clone(),
        execution.min_order_krw,
    ));

    Harness {
        exchange,
        trades,
        pending_repo,
        positions,
        recovery_tasks,
        stats,
        audit,
        notifier,
        breaker,
        throttle,
        registry,
        pending,
        executor,
        reconciliation,
        recovery,
        replace_rx: tokio::sync::Mutex::new(replace_rx),
    }
}

pub fn krw_btc() -> Market {
    Market::parse("KRW-BTC").unwrap()
}

pub fn krw_eth() -> Market {
    Market::parse("KRW-ETH").unwrap()
}

pub fn krw_xrp() -> Market {
    Market::parse("KRW-XRP").unwrap()
}

pub fn buy_signal(market: Market, strategy: &str, price: Decimal, confidence: f64) -> TradingSignal {
    TradingSignal::new(market, Side::Buy, price, confidence)
        .with_strategy(strategy)
        .with_reason("test entry")
}

pub fn sell_signal(market: Market, strategy: &str, price: Decimal, confidence: f64) -> TradingSignal {
    TradingSignal::new(market, Side::Sell, price, confidence)
        .with_strategy(strategy)
        .with_reason("test exit")
}

pub async fn insert_open_position(
    harness: &Harness,
    market: Market,
    strategy: &str,
    entry_price: Decimal,
    quantity: Decimal,
) -> Position {
    let position = Position::open(market, strategy, entry_price, quantity);
    use wontrader::domain::repositories::PositionRepository;
    harness.positions.insert(&position).await.unwrap();
    position
}
