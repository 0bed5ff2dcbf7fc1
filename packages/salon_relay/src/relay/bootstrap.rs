//! Session Bootstrap
//!
//! Brings a freshly identified operator connection up to date. The connection
//! is registered before the snapshot is taken, so anything appended in between
//! is either in the snapshot or arrives as a live event afterwards (possibly
//! both; clients dedupe by conversation id and message id).

use std::sync::Arc;
use tracing::{info, warn};

use crate::metrics::ServerMetrics;
use crate::models::OperatorId;
use crate::ws::ServerMessage;

use super::registry::{ConnectionHandle, ConnectionRegistry, DeliveryFailure};
use super::store::ConversationStore;

pub struct SessionBootstrap {
    store: Arc<ConversationStore>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<ServerMetrics>,
}

impl SessionBootstrap {
    pub fn new(
        store: Arc<ConversationStore>,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
        }
    }

    /// Bind `handle` to `operator_id` and send it that operator's snapshot.
    /// Only this connection receives the snapshot.
    pub async fn identify(
        &self,
        operator_id: &str,
        handle: &ConnectionHandle,
    ) -> Result<usize, DeliveryFailure> {
        let newly_registered = self.registry.register(operator_id, handle.clone()).await;
        if newly_registered {
            info!(operator = %operator_id, conn_id = %handle.id(), "Operator identified");
        }
        self.send_snapshot(operator_id, handle).await
    }

    /// Send a fresh snapshot to an already identified connection.
    pub async fn resend_snapshot(
        &self,
        operator_id: &str,
        handle: &ConnectionHandle,
    ) -> Result<usize, DeliveryFailure> {
        self.send_snapshot(operator_id, handle).await
    }

    async fn send_snapshot(
        &self,
        operator_id: &str,
        handle: &ConnectionHandle,
    ) -> Result<usize, DeliveryFailure> {
        let conversations = self.store.snapshot_for(operator_id).await;
        let count = conversations.len();
        let frame = ServerMessage::Snapshot {
            operator_id: OperatorId::from(operator_id),
            conversations,
        };
        match handle.deliver(frame) {
            Ok(()) => {
                self.metrics.snapshot_sent();
                info!(operator = %operator_id, conn_id = %handle.id(), conversations = count, "Snapshot sent");
                Ok(count)
            }
            Err(e) => {
                warn!(operator = %operator_id, conn_id = %handle.id(), "Failed to send snapshot: {}", e);
                Err(e)
            }
        }
    }
}
