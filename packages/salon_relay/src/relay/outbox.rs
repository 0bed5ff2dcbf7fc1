//! Outbox: ordered, best-effort side effects of an append.
//!
//! The router enqueues jobs while it still holds the conversation lock, so each
//! queue's order matches append order. Storage writes and customer deliveries
//! run on separate queues: a stalled messaging channel never holds back the
//! write-through. Failures are logged, counted and reported back to the
//! originating connection.

use futures::future::join;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::delivery::CustomerChannel;
use crate::metrics::ServerMetrics;
use crate::models::{ConversationRecord, Message};
use crate::persistence::ConversationSink;
use crate::ws::ServerMessage;

use super::registry::{ConnectionId, ConnectionRegistry};

#[derive(Debug)]
pub enum OutboxJob {
    /// Write the conversation header and, if present, the message.
    Persist {
        record: ConversationRecord,
        message: Option<Message>,
        origin: Option<ConnectionId>,
    },
    /// Hand an operator reply to the customer's messaging channel.
    DeliverToCustomer {
        customer_address: String,
        message: Message,
        origin: Option<ConnectionId>,
    },
}

#[derive(Debug)]
enum Queued {
    Job(OutboxJob),
    /// Completes once every job queued before it has run.
    Flush(oneshot::Sender<()>),
}

/// Sending half of the outbox. Enqueueing never blocks.
#[derive(Clone)]
pub struct Outbox {
    storage: mpsc::UnboundedSender<Queued>,
    delivery: mpsc::UnboundedSender<Queued>,
}

impl Outbox {
    pub fn enqueue(&self, job: OutboxJob) {
        let queue = match job {
            OutboxJob::Persist { .. } => &self.storage,
            OutboxJob::DeliverToCustomer { .. } => &self.delivery,
        };
        if queue.send(Queued::Job(job)).is_err() {
            warn!("Outbox worker has stopped; dropping job");
        }
    }

    /// Wait until every storage write enqueued so far has run. Returns false
    /// if the worker is gone.
    pub async fn flush_storage(&self) -> bool {
        flush_queue(&self.storage).await
    }

    /// Wait until every customer delivery enqueued so far has run.
    pub async fn flush_deliveries(&self) -> bool {
        flush_queue(&self.delivery).await
    }

    /// Wait for both queues.
    pub async fn flush(&self) -> bool {
        let (storage, delivery) = join(self.flush_storage(), self.flush_deliveries()).await;
        storage && delivery
    }
}

async fn flush_queue(queue: &mpsc::UnboundedSender<Queued>) -> bool {
    let (tx, rx) = oneshot::channel();
    if queue.send(Queued::Flush(tx)).is_err() {
        return false;
    }
    rx.await.is_ok()
}

/// Start the outbox worker. Both queues are drained concurrently inside one
/// task; it exits once every `Outbox` clone is dropped and both queues are
/// empty. Aborting the handle stops both.
pub fn spawn_outbox(
    sink: Arc<dyn ConversationSink>,
    channel: Arc<dyn CustomerChannel>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<ServerMetrics>,
) -> (Outbox, JoinHandle<()>) {
    let (storage_tx, storage_rx) = mpsc::unbounded_channel::<Queued>();
    let (delivery_tx, delivery_rx) = mpsc::unbounded_channel::<Queued>();

    let handle = tokio::spawn(async move {
        info!(channel = channel.name(), "Outbox worker started");
        join(
            drain_queue(storage_rx, sink.as_ref(), channel.as_ref(), &registry, &metrics),
            drain_queue(delivery_rx, sink.as_ref(), channel.as_ref(), &registry, &metrics),
        )
        .await;
        info!("Outbox worker drained");
    });

    let outbox = Outbox {
        storage: storage_tx,
        delivery: delivery_tx,
    };
    (outbox, handle)
}

async fn drain_queue(
    mut rx: mpsc::UnboundedReceiver<Queued>,
    sink: &dyn ConversationSink,
    channel: &dyn CustomerChannel,
    registry: &ConnectionRegistry,
    metrics: &ServerMetrics,
) {
    while let Some(queued) = rx.recv().await {
        match queued {
            Queued::Job(job) => run_job(job, sink, channel, registry, metrics).await,
            Queued::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn run_job(
    job: OutboxJob,
    sink: &dyn ConversationSink,
    channel: &dyn CustomerChannel,
    registry: &ConnectionRegistry,
    metrics: &ServerMetrics,
) {
    match job {
        OutboxJob::Persist {
            record,
            message,
            origin,
        } => {
            let result = match sink.save_conversation(&record).await {
                Ok(()) => match &message {
                    Some(m) => sink.save_message(m).await,
                    None => Ok(()),
                },
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                metrics.sink_failure();
                warn!(conversation = %record.id, "Failed to persist conversation: {:#}", e);
                if let (Some(origin), Some(m)) = (origin, message) {
                    warn_origin(
                        registry,
                        &origin,
                        &m,
                        "message was not saved to storage".to_string(),
                    )
                    .await;
                }
            }
        }
        OutboxJob::DeliverToCustomer {
            customer_address,
            message,
            origin,
        } => match channel.deliver(&customer_address, &message).await {
            Ok(()) => {
                debug!(conversation = %message.conversation_id, message_id = message.id, "Reply delivered to customer");
            }
            Err(e) => {
                metrics.customer_delivery_failure();
                warn!(
                    conversation = %message.conversation_id,
                    customer = %customer_address,
                    "Failed to deliver reply to customer: {}",
                    e
                );
                if let Some(origin) = origin {
                    warn_origin(
                        registry,
                        &origin,
                        &message,
                        format!("message may not have reached the customer: {e}"),
                    )
                    .await;
                }
            }
        },
    }
}

async fn warn_origin(
    registry: &ConnectionRegistry,
    origin: &str,
    message: &Message,
    reason: String,
) {
    let Some(conn) = registry.connection(origin).await else {
        debug!(conn_id = %origin, "Originating connection gone; warning dropped");
        return;
    };
    let frame = ServerMessage::DeliveryWarning {
        conversation_id: message.conversation_id.clone(),
        message_id: message.id,
        reason,
    };
    if let Err(e) = conn.deliver(frame) {
        debug!(conn_id = %origin, "Could not deliver warning: {}", e);
    }
}
