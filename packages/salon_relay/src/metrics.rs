//! Server metrics for observability
//!
//! Provides runtime metrics for monitoring relay health and traffic.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently open WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,

    // Conversation metrics
    pub conversations_created: AtomicU64,
    pub claims: AtomicU64,
    /// Operator replies on a conversation owned by someone else
    pub claim_conflicts: AtomicU64,
    pub releases: AtomicU64,

    // Message metrics
    pub messages_incoming: AtomicU64,
    pub messages_outgoing: AtomicU64,
    /// Frames queued to operator connections
    pub deliveries: AtomicU64,
    /// Frames skipped because the connection was closed or saturated
    pub delivery_failures: AtomicU64,
    pub snapshots_sent: AtomicU64,

    // External collaborators
    pub sink_failures: AtomicU64,
    pub customer_delivery_failures: AtomicU64,

    // Error metrics
    pub websocket_errors: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn conversation_created(&self) {
        self.conversations_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn claimed(&self) {
        self.claims.fetch_add(1, Ordering::Relaxed);
    }

    pub fn claim_conflict(&self) {
        self.claim_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn released(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_incoming(&self) {
        self.messages_incoming.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_outgoing(&self) {
        self.messages_outgoing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self, n: u64) {
        self.deliveries.fetch_add(n, Ordering::Relaxed);
    }

    pub fn delivery_failed(&self, n: u64) {
        self.delivery_failures.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot_sent(&self) {
        self.snapshots_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn customer_delivery_failure(&self) {
        self.customer_delivery_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn websocket_error(&self) {
        self.websocket_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            conversations: ConversationMetrics {
                created: self.conversations_created.load(Ordering::Relaxed),
                claims: self.claims.load(Ordering::Relaxed),
                claim_conflicts: self.claim_conflicts.load(Ordering::Relaxed),
                releases: self.releases.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                incoming: self.messages_incoming.load(Ordering::Relaxed),
                outgoing: self.messages_outgoing.load(Ordering::Relaxed),
                deliveries: self.deliveries.load(Ordering::Relaxed),
                delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
                snapshots_sent: self.snapshots_sent.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                sink: self.sink_failures.load(Ordering::Relaxed),
                customer_delivery: self.customer_delivery_failures.load(Ordering::Relaxed),
                websocket: self.websocket_errors.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub conversations: ConversationMetrics,
    pub messages: MessageMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMetrics {
    pub created: u64,
    pub claims: u64,
    pub claim_conflicts: u64,
    pub releases: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub incoming: u64,
    pub outgoing: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
    pub snapshots_sent: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub sink: u64,
    pub customer_delivery: u64,
    pub websocket: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub connections: u64,
    pub operators_online: usize,
    pub conversations: usize,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_tracking() {
        let metrics = ServerMetrics::new();

        metrics.connection_opened();
        metrics.connection_opened();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.total_connections.load(Ordering::Relaxed), 2);

        metrics.connection_closed();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.total_connections.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_delivery_tracking() {
        let metrics = ServerMetrics::new();
        metrics.delivered(3);
        metrics.delivery_failed(1);
        metrics.delivered(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages.deliveries, 5);
        assert_eq!(snapshot.messages.delivery_failures, 1);
    }

    #[test]
    fn test_snapshot() {
        let metrics = ServerMetrics::new();
        metrics.connection_opened();
        metrics.conversation_created();
        metrics.message_incoming();
        metrics.message_outgoing();
        metrics.claimed();
        metrics.claim_conflict();
        metrics.sink_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections.active, 1);
        assert_eq!(snapshot.conversations.created, 1);
        assert_eq!(snapshot.conversations.claims, 1);
        assert_eq!(snapshot.conversations.claim_conflicts, 1);
        assert_eq!(snapshot.messages.incoming, 1);
        assert_eq!(snapshot.messages.outgoing, 1);
        assert_eq!(snapshot.errors.sink, 1);
    }
}
