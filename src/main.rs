//! Headless trading core: execution pipeline, pending-order supervision,
//! reconciliation and close recovery, plus the operator HTTP surface.
//! Strategies run out of process and drive the executor through the library
//! API; this binary keeps the lifecycle machinery alive.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{Level, error, info, warn};
use tracing_subscriber::prelude::*;

use wontrader::application::circuit_breaker::{CircuitBreaker, seoul_day};
use wontrader::application::close_recovery::CloseRecoveryQueue;
use wontrader::application::execution::OrderExecutor;
use wontrader::application::market_condition::MarketConditionChecker;
use wontrader::application::market_locks::MarketLocks;
use wontrader::application::pending_manager::{PendingOrderManager, ReplaceRequest};
use wontrader::application::position_registry::PositionRegistry;
use wontrader::application::reconciliation::ReconciliationService;
use wontrader::application::risk_throttle::RiskThrottle;
use wontrader::config::AppConfig;
use wontrader::domain::ports::{ExchangeGateway, Notifier};
use wontrader::domain::repositories::DailyStatsRepository;
use wontrader::infrastructure::exchange::simulated::SimulatedExchange;
use wontrader::infrastructure::exchange::upbit::UpbitGateway;
use wontrader::infrastructure::notify::{TracingNotifier, WebhookNotifier};
use wontrader::infrastructure::persistence::database::Database;
use wontrader::infrastructure::persistence::repositories::{
    SqliteAuditLogRepository, SqliteDailyStatsRepository, SqlitePendingOrderRepository,
    SqlitePositionRepository, SqliteRecoveryTaskRepository, SqliteTradeRepository,
};
use wontrader::interfaces::api::{ApiState, serve};

#[derive(Parser, Debug)]
#[command(name = "wontrader", about = "KRW spot trading core", version)]
struct Args {
    /// Force the simulated gateway even when exchange keys are configured.
    #[arg(long)]
    simulate: bool,

    /// Override DATABASE_URL.
    #[arg(long)]
    db: Option<String>,

    /// Override HTTP_BIND.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("wontrader {} starting...", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(db) = args.db {
        config.database_url = db;
    }
    if let Some(bind) = args.bind {
        config.http_bind = bind;
    }

    let live_keys = config.exchange.has_credentials() && !args.simulate;
    let gateway: Arc<dyn ExchangeGateway> = if live_keys {
        info!("Exchange gateway: REST ({})", config.exchange.base_url);
        Arc::new(UpbitGateway::new(
            config.exchange.access_key.clone().unwrap_or_default(),
            config.exchange.secret_key.clone().unwrap_or_default(),
            config.exchange.base_url.clone(),
            Duration::from_secs(config.exchange.request_timeout_secs),
        ))
    } else {
        if config.execution.trading_enabled {
            warn!("No exchange credentials; forcing simulated trading");
            config.execution.trading_enabled = false;
        }
        info!("Exchange gateway: SIMULATED");
        Arc::new(SimulatedExchange::new())
    };

    let notifier: Arc<dyn Notifier> = match std::env::var("ALERT_WEBHOOK_URL") {
        Ok(url) if !url.trim().is_empty() => Arc::new(WebhookNotifier::new(url)),
        _ => Arc::new(TracingNotifier),
    };

    // Persistence
    let database = Database::new(&config.database_url).await?;
    let trades = Arc::new(SqliteTradeRepository::new(database.clone()));
    let pending_repo = Arc::new(SqlitePendingOrderRepository::new(database.clone()));
    let positions = Arc::new(SqlitePositionRepository::new(database.clone()));
    let recovery_tasks = Arc::new(SqliteRecoveryTaskRepository::new(database.clone()));
    let stats = Arc::new(SqliteDailyStatsRepository::new(database.clone()));
    let audit = Arc::new(SqliteAuditLogRepository::new(database.clone()));

    // Core services
    let breaker = Arc::new(CircuitBreaker::new(config.risk.clone()));
    let today = seoul_day(chrono::Utc::now());
    if let Ok(day_stats) = stats.get(today).await {
        breaker.rehydrate_daily_loss(today, day_stats.realized_pnl);
    }

    let throttle = Arc::new(RiskThrottle::new(config.risk.throttle_window));
    let checker = Arc::new(MarketConditionChecker::new(
        Arc::clone(&gateway),
        config.execution.clone(),
    ));
    let locks = Arc::new(MarketLocks::new());
    let registry = Arc::new(PositionRegistry::new(
        positions.clone(),
        Duration::from_secs(config.workers.registry_cache_ttl_secs),
    ));

    let (replace_tx, mut replace_rx) = mpsc::channel::<ReplaceRequest>(64);
    let pending = Arc::new(PendingOrderManager::new(
        Arc::clone(&gateway),
        pending_repo.clone(),
        trades.clone(),
        Arc::clone(&breaker),
        Arc::clone(&checker),
        Arc::clone(&notifier),
        Arc::clone(&locks),
        replace_tx,
        config.workers.clone(),
        config.execution.fill_threshold,
    ));
    let recovered = pending.recover_on_startup().await?;
    if recovered > 0 {
        info!("Recovered {} pending order(s) from the store", recovered);
    }

    let executor = Arc::new(OrderExecutor::new(
        Arc::clone(&gateway),
        trades.clone(),
        stats.clone(),
        Arc::clone(&checker),
        Arc::clone(&breaker),
        Arc::clone(&throttle),
        Arc::clone(&pending),
        Arc::clone(&notifier),
        config.execution.clone(),
    ));

    let reconciliation = Arc::new(ReconciliationService::new(
        Arc::clone(&gateway),
        positions.clone(),
        audit.clone(),
        Arc::clone(&registry),
        Arc::clone(&notifier),
        config.workers.clone(),
    ));

    let recovery = Arc::new(CloseRecoveryQueue::new(
        recovery_tasks.clone(),
        positions.clone(),
        Arc::clone(&gateway),
        Arc::clone(&executor),
        Arc::clone(&registry),
        Arc::clone(&locks),
        Arc::clone(&notifier),
        audit.clone(),
        config.workers.clone(),
        config.execution.min_order_krw,
    ));

    // Workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::new();
    workers.push(tokio::spawn(
        Arc::clone(&pending).run(shutdown_rx.clone()),
    ));
    workers.push(tokio::spawn(
        Arc::clone(&reconciliation).run(shutdown_rx.clone()),
    ));
    workers.push(tokio::spawn(Arc::clone(&recovery).run(shutdown_rx.clone())));

    // Cancel-and-replace consumer: resubmits what the pending manager gave up
    // on, through the full pipeline.
    {
        let executor = Arc::clone(&executor);
        let mut shutdown = shutdown_rx.clone();
        workers.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    request = replace_rx.recv() => {
                        let Some(ReplaceRequest { signal, notional }) = request else {
                            break;
                        };
                        match executor.execute(&signal, notional).await {
                            Ok(report) => info!(
                                "Replace order for {} executed ({})",
                                report.market, report.order_id
                            ),
                            Err(e) => warn!("Replace order failed: {}", e),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }));
    }

    // Operator surface
    let api_state = ApiState {
        registry: Arc::clone(&registry),
        breaker: Arc::clone(&breaker),
        pending: Arc::clone(&pending),
        reconciliation: Arc::clone(&reconciliation),
        recovery: Arc::clone(&recovery),
        positions: positions.clone(),
    };
    let bind = config.http_bind.clone();
    let api_shutdown = shutdown_rx.clone();
    workers.push(tokio::spawn(async move {
        if let Err(e) = serve(api_state, &bind, api_shutdown).await {
            error!("HTTP surface failed: {}", e);
        }
    }));

    info!("All workers started; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    for worker in workers {
        let _ = worker.await;
    }
    info!("Shutdown complete");
    Ok(())
}
