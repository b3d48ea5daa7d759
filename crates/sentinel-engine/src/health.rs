//! Read-only health and stats HTTP surface.
//!
//! Three JSON routes with permissive CORS:
//! - `GET /health`: liveness and headline counters
//! - `GET /stats`: detector counters plus alert aggregates
//! - `GET /alerts`: the most recent stored alerts (up to 50)

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::alert_store::AlertStore;
use crate::state::EngineState;

/// Most recent alerts served by `/alerts`.
const ALERTS_LIMIT: usize = 50;

#[derive(Clone)]
struct AppState {
    engine: Arc<EngineState>,
    alerts: Arc<RwLock<AlertStore>>,
}

/// Build the router.
pub fn router(engine: Arc<EngineState>, alerts: Arc<RwLock<AlertStore>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/alerts", get(recent_alerts))
        .layer(cors)
        .with_state(AppState { engine, alerts })
}

/// Bind and serve until the process exits. Spawned as its own task.
pub async fn serve(
    port: u16,
    engine: Arc<EngineState>,
    alerts: Arc<RwLock<AlertStore>>,
) -> std::io::Result<()> {
    let app = router(engine, alerts);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Health endpoint listening on port {}", port);

    if let Err(e) = axum::serve(listener, app).await {
        warn!("Health endpoint exited: {}", e);
    }
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snap = state.engine.snapshot();
    Json(json!({
        "status": "ok",
        "uptimeMs": snap.uptime_ms,
        "markets": snap.markets_monitored,
        "trades": snap.trades_seen,
        "alertsThisHour": snap.alerts_this_hour,
    }))
}

async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snap = state.engine.snapshot();
    let alerts = state.alerts.read().await;
    Json(json!({
        "engine": snap,
        "alerts": alerts.stats(),
        "totalAlerts": alerts.total_accepted(),
    }))
}

async fn recent_alerts(State(state): State<AppState>) -> Json<serde_json::Value> {
    let alerts = state.alerts.read().await;
    Json(json!({ "alerts": alerts.recent(ALERTS_LIMIT) }))
}
