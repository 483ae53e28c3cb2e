//! Minimal operator HTTP surface: status read-out, manual reconciliation
//! trigger, and manual position close. JSON in, JSON out, no authentication;
//! bind it to localhost or put it behind your own proxy.

use crate::application::circuit_breaker::{BreakerSummary, CircuitBreaker};
use crate::application::close_recovery::CloseRecoveryQueue;
use crate::application::pending_manager::PendingOrderManager;
use crate::application::position_registry::{PositionRegistry, PositionSummary};
use crate::application::reconciliation::{ReconcileReport, ReconciliationService};
use crate::domain::market::Market;
use crate::domain::repositories::PositionRepository;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<PositionRegistry>,
    pub breaker: Arc<CircuitBreaker>,
    pub pending: Arc<PendingOrderManager>,
    pub reconciliation: Arc<ReconciliationService>,
    pub recovery: Arc<CloseRecoveryQueue>,
    pub positions: Arc<dyn PositionRepository>,
}

#[derive(Serialize)]
struct StatusResponse {
    open_positions: Vec<PositionSummary>,
    pending_orders: usize,
    breaker: Vec<BreakerSummary>,
    daily_loss_krw: String,
}

#[derive(Deserialize)]
struct CloseRequest {
    market: Market,
    strategy: String,
}

#[derive(Serialize)]
struct CloseResponse {
    task_id: String,
    position_id: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/reconcile", post(reconcile))
        .route("/api/positions/close", post(close_position))
        .with_state(state)
}

pub async fn serve(
    state: ApiState,
    bind: &str,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("HTTP surface listening on {}", bind);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

async fn status(
    State(state): State<ApiState>,
) -> Result<Json<StatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    let open_positions = state.registry.summary().await.map_err(internal)?;
    Ok(Json(StatusResponse {
        open_positions,
        pending_orders: state.pending.active_count().await,
        breaker: state.breaker.summary(),
        daily_loss_krw: state.breaker.daily_loss().to_string(),
    }))
}

async fn reconcile(
    State(state): State<ApiState>,
) -> Result<Json<ReconcileReport>, (StatusCode, Json<ErrorResponse>)> {
    info!("Manual reconciliation triggered over HTTP");
    let report = state.reconciliation.reconcile_once().await.map_err(internal)?;
    Ok(Json(report))
}

async fn close_position(
    State(state): State<ApiState>,
    Json(request): Json<CloseRequest>,
) -> Result<Json<CloseResponse>, (StatusCode, Json<ErrorResponse>)> {
    let open = state
        .positions
        .find_open_by_market(&request.market)
        .await
        .map_err(internal)?;
    let Some(position) = open.into_iter().find(|p| p.strategy == request.strategy) else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!(
                    "no open {} position for strategy {}",
                    request.market, request.strategy
                ),
            }),
        ));
    };

    let task = state
        .recovery
        .enqueue(
            &position.strategy,
            &position.id,
            position.market.clone(),
            position.quantity,
            position.entry_price,
            position.entry_price,
            "manual close requested",
        )
        .await
        .map_err(internal)?;

    Ok(Json(CloseResponse {
        task_id: task.id,
        position_id: position.id,
    }))
}

fn internal(e: anyhow::Error) -> (StatusCode, Json<ErrorResponse>) {
    error!("HTTP handler failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}
