//! Connection Registry
//!
//! Tracks live operator connections keyed by operator identity. An operator may
//! have any number of connections open at once (one per dashboard tab).

use std::collections::HashMap;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

use crate::models::OperatorId;
use crate::ws::ServerMessage;

/// Unique id assigned to each transport session.
pub type ConnectionId = String;

/// Why a frame could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryFailure {
    #[error("connection closed")]
    Closed,
    #[error("connection send queue full")]
    Saturated,
}

/// Non-owning handle to a connection's outbound queue. The transport owns the
/// receiving end; once it drops it, deliveries fail with `Closed`.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    connection_id: ConnectionId,
    tx: mpsc::Sender<ServerMessage>,
}

impl ConnectionHandle {
    pub fn new(connection_id: ConnectionId, tx: mpsc::Sender<ServerMessage>) -> Self {
        Self { connection_id, tx }
    }

    pub fn id(&self) -> &str {
        &self.connection_id
    }

    /// Queue a frame without waiting. A slow client never stalls the sender.
    pub fn deliver(&self, msg: ServerMessage) -> Result<(), DeliveryFailure> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Closed,
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::Saturated,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// operator_id -> (connection_id -> handle)
    by_operator: HashMap<OperatorId, HashMap<ConnectionId, ConnectionHandle>>,
    /// Reverse index: connection_id -> operator_id
    operator_of: HashMap<ConnectionId, OperatorId>,
}

/// Live operator connections. Process-lifetime state only.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handle` to `operator_id`'s connection set.
    ///
    /// Idempotent per connection. A connection already bound to a different
    /// operator is moved, so it belongs to at most one operator at a time.
    /// Returns true if this changed the registry.
    pub async fn register(&self, operator_id: &str, handle: ConnectionHandle) -> bool {
        let mut inner = self.inner.write().await;
        let connection_id = handle.id().to_string();

        if let Some(previous) = inner.operator_of.get(&connection_id).cloned() {
            if previous == operator_id {
                return false;
            }
            remove_from_operator(&mut inner, &previous, &connection_id);
            debug!(conn_id = %connection_id, from = %previous, to = %operator_id, "Connection re-identified");
        }

        inner
            .operator_of
            .insert(connection_id.clone(), operator_id.to_string());
        let set = inner
            .by_operator
            .entry(operator_id.to_string())
            .or_default();
        set.insert(connection_id.clone(), handle);
        info!(
            operator = %operator_id,
            conn_id = %connection_id,
            tabs = set.len(),
            "Operator connection registered"
        );
        true
    }

    /// Remove a connection from whatever operator it belonged to.
    /// No-op for unknown connections. Returns the operator it was bound to.
    pub async fn unregister(&self, connection_id: &str) -> Option<OperatorId> {
        let mut inner = self.inner.write().await;
        let operator_id = inner.operator_of.remove(connection_id)?;
        remove_from_operator(&mut inner, &operator_id, connection_id);
        info!(operator = %operator_id, conn_id = %connection_id, "Operator connection unregistered");
        Some(operator_id)
    }

    /// Current live connections for an operator (possibly empty).
    pub async fn connections_for(&self, operator_id: &str) -> Vec<ConnectionHandle> {
        self.inner
            .read()
            .await
            .by_operator
            .get(operator_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Distinct operators with at least one live connection, sorted.
    pub async fn all_operator_ids(&self) -> Vec<OperatorId> {
        let mut ids: Vec<OperatorId> = self.inner.read().await.by_operator.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn operator_of(&self, connection_id: &str) -> Option<OperatorId> {
        self.inner.read().await.operator_of.get(connection_id).cloned()
    }

    /// Look up a single registered connection.
    pub async fn connection(&self, connection_id: &str) -> Option<ConnectionHandle> {
        let inner = self.inner.read().await;
        let operator_id = inner.operator_of.get(connection_id)?;
        inner
            .by_operator
            .get(operator_id)
            .and_then(|set| set.get(connection_id))
            .cloned()
    }

    pub async fn operator_count(&self) -> usize {
        self.inner.read().await.by_operator.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.operator_of.len()
    }
}

fn remove_from_operator(inner: &mut RegistryInner, operator_id: &str, connection_id: &str) {
    if let Some(set) = inner.by_operator.get_mut(operator_id) {
        set.remove(connection_id);
        if set.is_empty() {
            inner.by_operator.remove(operator_id);
        }
    }
}
