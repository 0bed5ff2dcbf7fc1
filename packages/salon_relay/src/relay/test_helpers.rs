//! Shared fixtures for relay tests: a fully wired relay with in-memory sink and
//! a recording customer channel.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

use crate::delivery::CustomerChannel;
use crate::error::DeliveryError;
use crate::metrics::ServerMetrics;
use crate::models::Message;
use crate::persistence::NullSink;
use crate::ws::ServerMessage;

use super::bootstrap::SessionBootstrap;
use super::outbox::spawn_outbox;
use super::registry::{ConnectionHandle, ConnectionRegistry};
use super::router::MessageRouter;
use super::store::ConversationStore;

/// Customer channel that hands every delivery to the test.
pub struct RecordingChannel {
    tx: mpsc::UnboundedSender<(String, Message)>,
}

#[async_trait]
impl CustomerChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, customer_address: &str, message: &Message) -> Result<(), DeliveryError> {
        let _ = self.tx.send((customer_address.to_string(), message.clone()));
        Ok(())
    }
}

pub struct TestRelay {
    pub router: Arc<MessageRouter>,
    pub bootstrap: Arc<SessionBootstrap>,
    pub store: Arc<ConversationStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub metrics: Arc<ServerMetrics>,
    deliveries: Mutex<mpsc::UnboundedReceiver<(String, Message)>>,
}

impl TestRelay {
    pub fn new() -> Self {
        let store = Arc::new(ConversationStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let metrics = Arc::new(ServerMetrics::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let (outbox, _worker) = spawn_outbox(
            Arc::new(NullSink),
            Arc::new(RecordingChannel { tx }),
            registry.clone(),
            metrics.clone(),
        );
        let router = Arc::new(MessageRouter::new(
            store.clone(),
            registry.clone(),
            outbox,
            metrics.clone(),
        ));
        let bootstrap = Arc::new(SessionBootstrap::new(
            store.clone(),
            registry.clone(),
            metrics.clone(),
        ));
        Self {
            router,
            bootstrap,
            store,
            registry,
            metrics,
            deliveries: Mutex::new(rx),
        }
    }

    /// Identify a new connection; its snapshot is left in the queue.
    pub async fn identify(&self, operator_id: &str, conn_id: &str) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(64);
        let handle = ConnectionHandle::new(conn_id.to_string(), tx);
        self.bootstrap
            .identify(operator_id, &handle)
            .await
            .expect("snapshot delivered");
        rx
    }

    /// Identify a new connection and discard its snapshot.
    pub async fn connect(&self, operator_id: &str, conn_id: &str) -> mpsc::Receiver<ServerMessage> {
        let mut rx = self.identify(operator_id, conn_id).await;
        assert!(matches!(
            rx.try_recv(),
            Ok(ServerMessage::Snapshot { .. })
        ));
        rx
    }

    /// Next reply handed to the customer channel.
    pub async fn next_customer_delivery(&self) -> (String, Message) {
        let mut rx = self.deliveries.lock().await;
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("customer delivery within 1s")
            .expect("delivery channel open")
    }
}

/// Everything currently queued for a connection.
pub fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}
