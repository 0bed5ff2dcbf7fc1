use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::metrics;

/// Health check endpoint - returns server status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.metrics.snapshot();

    let status = if metrics.errors.sink == 0 && metrics.errors.customer_delivery == 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        connections: metrics.connections.active,
        operators_online: state.registry.operator_count().await,
        conversations: state.store.len().await,
        uptime_secs: metrics.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness probe - checks the database when persistence is enabled
pub async fn health_ready_handler(State(state): State<AppState>) -> Response {
    let database = match &state.db {
        None => "disabled",
        Some(db) if db.ping().await.is_ok() => "connected",
        Some(_) => "disconnected",
    };

    if database != "disconnected" {
        Json(serde_json::json!({
            "status": "ready",
            "database": database
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": database
            })),
        )
            .into_response()
    }
}
