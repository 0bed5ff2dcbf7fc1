//! Salon relay: routes chat between salon customers and dashboard operators.
//!
//! Customers write through a messaging channel; operators answer from any
//! number of dashboard tabs. The first operator to reply owns the
//! conversation, and every live tab stays in sync over WebSocket.

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use uuid::Uuid;

pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod persistence;
pub mod relay;
pub mod repository;
pub mod ws;

use crate::config::ServerConfig;
use crate::db::Database;
use crate::delivery::CustomerChannel;
use crate::metrics::ServerMetrics;
use crate::persistence::ConversationSink;
use crate::relay::{
    ConnectionRegistry, ConversationStore, MessageRouter, Outbox, SessionBootstrap, spawn_outbox,
};

/// Shared state for every HTTP and WebSocket handler.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<MessageRouter>,
    pub bootstrap: Arc<SessionBootstrap>,
    pub store: Arc<ConversationStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub outbox: Outbox,
    pub server_config: Arc<ServerConfig>,
    pub metrics: Arc<ServerMetrics>,
    /// `None` when persistence is disabled.
    pub db: Option<Arc<Database>>,
}

impl AppState {
    /// Wire the relay around `store` and start the outbox worker.
    pub fn new(
        server_config: ServerConfig,
        store: Arc<ConversationStore>,
        sink: Arc<dyn ConversationSink>,
        channel: Arc<dyn CustomerChannel>,
        db: Option<Arc<Database>>,
    ) -> (Self, JoinHandle<()>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let metrics = Arc::new(ServerMetrics::new());
        let (outbox, worker) = spawn_outbox(sink, channel, registry.clone(), metrics.clone());

        let router = Arc::new(MessageRouter::new(
            store.clone(),
            registry.clone(),
            outbox.clone(),
            metrics.clone(),
        ));
        let bootstrap = Arc::new(SessionBootstrap::new(
            store.clone(),
            registry.clone(),
            metrics.clone(),
        ));

        let state = Self {
            router,
            bootstrap,
            store,
            registry,
            outbox,
            server_config: Arc::new(server_config),
            metrics,
            db,
        };
        (state, worker)
    }
}

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

/// All routes served by the relay.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health and metrics
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        // Relay transport
        .route("/api/ws", get(handlers::relay_websocket_handler))
        // Conversations
        .route("/api/conversations", get(handlers::list_conversations))
        .route("/api/conversations/{id}", get(handlers::get_conversation))
        .route(
            "/api/conversations/{id}/release",
            post(handlers::release_conversation),
        )
        .route("/api/inbound", post(handlers::inbound_message))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;
    use crate::delivery::LogChannel;
    use crate::persistence::NullSink;

    /// In-memory app state: no database, replies only logged.
    pub fn test_app_state() -> AppState {
        let (state, _worker) = AppState::new(
            ServerConfig::default(),
            Arc::new(ConversationStore::new()),
            Arc::new(NullSink),
            Arc::new(LogChannel),
            None,
        );
        state
    }
}
