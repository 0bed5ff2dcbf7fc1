//! Client message dispatcher.
//!
//! Turns one decoded `ClientMessage` into relay calls and replies to the
//! sending connection. The WebSocket handler owns the socket; everything that
//! touches relay state happens here.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::models::{ConversationId, OperatorId};
use crate::relay::{ConnectionHandle, MessageRouter, SessionBootstrap};

use super::protocol::{ClientMessage, ServerMessage};

/// Error replies per connection before further ones are only logged.
const MAX_ERROR_REPLIES: u32 = 50;

/// Per-connection state shared between the transport and the dispatcher.
pub(crate) struct ConnectionContext {
    pub connection_id: String,
    /// Operator this connection identified as; `None` until `operator-identify`.
    pub operator: RwLock<Option<OperatorId>>,
    pub tx: mpsc::Sender<ServerMessage>,
    pub handle: ConnectionHandle,
    pub router: Arc<MessageRouter>,
    pub bootstrap: Arc<SessionBootstrap>,
    pub error_count: AtomicU32,
}

impl ConnectionContext {
    pub(crate) fn new(
        connection_id: String,
        tx: mpsc::Sender<ServerMessage>,
        router: Arc<MessageRouter>,
        bootstrap: Arc<SessionBootstrap>,
    ) -> Self {
        let handle = ConnectionHandle::new(connection_id.clone(), tx.clone());
        Self {
            connection_id,
            operator: RwLock::new(None),
            tx,
            handle,
            router,
            bootstrap,
            error_count: AtomicU32::new(0),
        }
    }

    /// The operator this connection may act as. `claimed` must match the
    /// identity bound by `operator-identify`.
    async fn require_operator(&self, claimed: &str) -> Result<OperatorId, RelayError> {
        match self.operator.read().await.as_ref() {
            None => Err(RelayError::NotIdentified),
            Some(bound) if bound == claimed => Ok(bound.clone()),
            Some(bound) => Err(RelayError::OperatorMismatch {
                bound: bound.clone(),
                claimed: claimed.to_string(),
            }),
        }
    }

    async fn reply(&self, msg: ServerMessage) {
        if self.tx.send(msg).await.is_err() {
            debug!(conn_id = %self.connection_id, "Reply dropped - connection closing");
        }
    }

    pub(crate) async fn reply_error(&self, conversation_id: Option<ConversationId>, err: RelayError) {
        let prev = self.error_count.fetch_add(1, Ordering::Relaxed);
        if prev >= MAX_ERROR_REPLIES {
            debug!(conn_id = %self.connection_id, "Suppressing error reply: {}", err);
            return;
        }
        self.reply(ServerMessage::Error {
            conversation_id,
            message: err.to_string(),
        })
        .await;
    }
}

/// Dispatch a single `ClientMessage` for the connection in `ctx`.
pub(crate) async fn dispatch_client_message(ctx: &ConnectionContext, msg: ClientMessage) {
    match msg {
        ClientMessage::OperatorIdentify { operator_id } => {
            if operator_id.trim().is_empty() {
                ctx.reply_error(
                    None,
                    RelayError::InvalidInput("operator_id must not be empty".to_string()),
                )
                .await;
                return;
            }
            {
                let mut bound = ctx.operator.write().await;
                if let Some(prev) = bound.as_ref().filter(|prev| **prev != operator_id) {
                    warn!(conn_id = %ctx.connection_id, from = %prev, to = %operator_id, "Connection re-identified");
                }
                *bound = Some(operator_id.clone());
            }
            if let Err(e) = ctx.bootstrap.identify(&operator_id, &ctx.handle).await {
                warn!(conn_id = %ctx.connection_id, "Snapshot not delivered: {}", e);
            }
        }

        ClientMessage::OperatorRequestSnapshot { operator_id } => {
            match ctx.require_operator(&operator_id).await {
                Ok(op) => {
                    if let Err(e) = ctx.bootstrap.resend_snapshot(&op, &ctx.handle).await {
                        warn!(conn_id = %ctx.connection_id, "Snapshot not delivered: {}", e);
                    }
                }
                Err(e) => ctx.reply_error(None, e).await,
            }
        }

        ClientMessage::CustomerMessage {
            customer_address,
            text,
        } => {
            if let Err(e) = ctx.router.customer_message(&customer_address, &text).await {
                ctx.reply_error(None, e).await;
            }
        }

        ClientMessage::OperatorMessage {
            conversation_id,
            operator_id,
            text,
            client_id,
        } => {
            let op = match ctx.require_operator(&operator_id).await {
                Ok(op) => op,
                Err(e) => {
                    ctx.reply_error(Some(conversation_id), e).await;
                    return;
                }
            };
            match ctx
                .router
                .operator_message(&conversation_id, &op, &text, Some(&ctx.connection_id))
                .await
            {
                Ok(sent) => {
                    ctx.reply(ServerMessage::Ack {
                        client_id,
                        message: sent.message,
                        claimed: sent.claim.claimed,
                        assigned_operator: sent.claim.assigned_operator,
                    })
                    .await;
                }
                Err(e) => ctx.reply_error(Some(conversation_id), e).await,
            }
        }

        ClientMessage::OperatorClaim {
            conversation_id,
            operator_id,
        } => {
            let op = match ctx.require_operator(&operator_id).await {
                Ok(op) => op,
                Err(e) => {
                    ctx.reply_error(Some(conversation_id), e).await;
                    return;
                }
            };
            match ctx.router.claim(&conversation_id, &op).await {
                Ok(outcome) => {
                    ctx.reply(ServerMessage::ClaimResult {
                        conversation_id,
                        claimed: outcome.claimed,
                        assigned_operator: outcome.assigned_operator,
                    })
                    .await;
                }
                Err(e) => ctx.reply_error(Some(conversation_id), e).await,
            }
        }
    }
}
