//! WebSocket Handler
//!
//! One task pair per connection: a writer draining the connection's queue into
//! the socket and a reader decoding frames and dispatching them.

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::metrics::ServerMetrics;
use crate::relay::{ConnectionRegistry, MessageRouter, SessionBootstrap};

use super::dispatch::{ConnectionContext, dispatch_client_message};
use super::protocol::{ClientMessage, ServerMessage};

/// Handle a relay WebSocket connection until either side closes it.
pub async fn handle_relay_ws(
    socket: WebSocket,
    router: Arc<MessageRouter>,
    bootstrap: Arc<SessionBootstrap>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<ServerMetrics>,
    send_capacity: usize,
) {
    // Unique ID for this connection
    let connection_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %connection_id, "New relay WebSocket connection");
    metrics.connection_opened();

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending messages to the WebSocket
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(send_capacity.max(1));

    let ctx = ConnectionContext::new(connection_id.clone(), tx, router, bootstrap);

    // Task to send messages to WebSocket
    let sender_task = async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    };

    // Task to handle incoming messages
    let metrics_input = metrics.clone();
    let input_task = async {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => dispatch_client_message(&ctx, client_msg).await,
                    Err(e) => {
                        debug!(conn_id = %ctx.connection_id, "Undecodable frame: {}", e);
                        ctx.reply_error(
                            None,
                            crate::error::RelayError::InvalidInput(format!("bad message: {e}")),
                        )
                        .await;
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!("Client closed connection");
                    break;
                }
                Err(e) => {
                    metrics_input.websocket_error();
                    warn!(conn_id = %ctx.connection_id, "WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    };

    // Run until either side finishes
    tokio::select! {
        _ = sender_task => debug!("Sender task ended"),
        _ = input_task => debug!("Input task ended"),
    }

    if let Some(operator_id) = registry.unregister(&connection_id).await {
        info!(conn_id = %connection_id, operator = %operator_id, "Operator connection closed");
    } else {
        info!(conn_id = %connection_id, "Relay WebSocket connection closed");
    }
    metrics.connection_closed();
}
