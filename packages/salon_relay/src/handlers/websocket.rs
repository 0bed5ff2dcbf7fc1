use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use crate::AppState;
use crate::ws;

/// Relay WebSocket: operator dashboards and channel adapters connect here.
pub async fn relay_websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let router = state.router.clone();
    let bootstrap = state.bootstrap.clone();
    let registry = state.registry.clone();
    let metrics = state.metrics.clone();
    let send_capacity = state.server_config.websocket.send_channel_capacity;

    ws.on_upgrade(move |socket| {
        ws::handle_relay_ws(socket, router, bootstrap, registry, metrics, send_capacity)
    })
}
