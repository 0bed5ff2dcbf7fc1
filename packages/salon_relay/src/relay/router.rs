//! Message Router
//!
//! Event-driven core of the relay. Each event locks its conversation, mutates
//! it, computes the fan-out and queues every delivery before releasing the lock,
//! so recipients see a conversation's messages in append order and no two
//! operators can win the same claim.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::metrics::ServerMetrics;
use crate::models::{Conversation, Direction, Message, OperatorId};
use crate::ws::ServerMessage;

use super::assignment::{self, AssignmentEngine, ClaimOutcome};
use super::outbox::{Outbox, OutboxJob};
use super::registry::{ConnectionRegistry, ConnectionId};
use super::store::ConversationStore;

/// What an operator's send produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSend {
    pub message: Message,
    pub claim: ClaimOutcome,
}

/// Per-fan-out delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: u64,
    pub failed: u64,
}

impl DeliveryReport {
    fn merge(&mut self, other: DeliveryReport) {
        self.delivered += other.delivered;
        self.failed += other.failed;
    }
}

pub struct MessageRouter {
    store: Arc<ConversationStore>,
    registry: Arc<ConnectionRegistry>,
    assignment: AssignmentEngine,
    outbox: Outbox,
    metrics: Arc<ServerMetrics>,
}

impl MessageRouter {
    pub fn new(
        store: Arc<ConversationStore>,
        registry: Arc<ConnectionRegistry>,
        outbox: Outbox,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        let assignment = AssignmentEngine::new(store.clone(), registry.clone());
        Self {
            store,
            registry,
            assignment,
            outbox,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// A customer wrote through the messaging channel.
    pub async fn customer_message(
        &self,
        customer_address: &str,
        text: &str,
    ) -> Result<Message, RelayError> {
        if customer_address.trim().is_empty() {
            return Err(RelayError::InvalidInput(
                "customer_address must not be empty".to_string(),
            ));
        }

        let (slot, _) = self.store.get_or_create(customer_address).await;
        let mut conversation = slot.lock().await;

        // First message of the conversation: tell idle operator UIs about it
        if conversation.messages.is_empty() {
            self.metrics.conversation_created();
            let operators = self.registry.all_operator_ids().await;
            self.deliver_to_operators(
                &operators,
                ServerMessage::NewConversation {
                    conversation_id: conversation.id.clone(),
                    customer_address: customer_address.to_string(),
                    text: text.to_string(),
                },
                None,
            )
            .await;
        }

        let message = conversation.append(Direction::Incoming, customer_address, text, Utc::now());
        self.metrics.message_incoming();

        let targets = self.assignment.fanout_targets(&conversation).await;
        let report = self
            .deliver_to_operators(
                &targets.operator_ids,
                message_frame(&conversation, &message),
                None,
            )
            .await;
        debug!(
            conversation = %conversation.id,
            mode = ?targets.mode,
            delivered = report.delivered,
            "Incoming message routed"
        );

        self.outbox.enqueue(OutboxJob::Persist {
            record: conversation.record(),
            message: Some(message.clone()),
            origin: None,
        });

        Ok(message)
    }

    /// An operator replied on a conversation.
    ///
    /// The reply is always appended. If another operator already owns the
    /// conversation the assignment is left alone and the returned claim has
    /// `claimed == false`. `origin` is the sending connection; it gets an
    /// acknowledgement from the caller instead of the echo.
    pub async fn operator_message(
        &self,
        conversation_id: &str,
        operator_id: &str,
        text: &str,
        origin: Option<&str>,
    ) -> Result<OperatorSend, RelayError> {
        let slot = self.store.slot(conversation_id).await?;
        let mut conversation = slot.lock().await;

        let claim = assignment::claim(&mut conversation, operator_id);
        self.record_claim(&conversation, operator_id, &claim);

        let message = conversation.append(Direction::Outgoing, operator_id, text, Utc::now());
        self.metrics.message_outgoing();

        // Keep every tab of the owner in sync
        self.deliver_to_operators(
            std::slice::from_ref(&claim.assigned_operator),
            message_frame(&conversation, &message),
            origin,
        )
        .await;

        if claim.newly_assigned {
            self.announce_assignment(&conversation.id, &claim.assigned_operator)
                .await;
        }

        let origin: Option<ConnectionId> = origin.map(str::to_string);
        self.outbox.enqueue(OutboxJob::Persist {
            record: conversation.record(),
            message: Some(message.clone()),
            origin: origin.clone(),
        });
        self.outbox.enqueue(OutboxJob::DeliverToCustomer {
            customer_address: conversation.customer_address.clone(),
            message: message.clone(),
            origin,
        });

        Ok(OperatorSend { message, claim })
    }

    /// Explicit claim without a reply.
    pub async fn claim(
        &self,
        conversation_id: &str,
        operator_id: &str,
    ) -> Result<ClaimOutcome, RelayError> {
        let slot = self.store.slot(conversation_id).await?;
        let mut conversation = slot.lock().await;

        let claim = assignment::claim(&mut conversation, operator_id);
        self.record_claim(&conversation, operator_id, &claim);

        if claim.newly_assigned {
            self.announce_assignment(&conversation.id, &claim.assigned_operator)
                .await;
            self.outbox.enqueue(OutboxJob::Persist {
                record: conversation.record(),
                message: None,
                origin: None,
            });
        }
        Ok(claim)
    }

    /// Administrative reset: clear the owner and reopen the conversation to all
    /// operators. Returns the previous owner.
    pub async fn release(&self, conversation_id: &str) -> Result<Option<OperatorId>, RelayError> {
        let slot = self.store.slot(conversation_id).await?;
        let mut conversation = slot.lock().await;

        let previous = assignment::release(&mut conversation);
        if let Some(ref owner) = previous {
            self.metrics.released();
            info!(conversation = %conversation.id, previous = %owner, "Conversation released");

            let operators = self.registry.all_operator_ids().await;
            self.deliver_to_operators(
                &operators,
                ServerMessage::ConversationReleased {
                    conversation: conversation.clone(),
                },
                None,
            )
            .await;
            self.outbox.enqueue(OutboxJob::Persist {
                record: conversation.record(),
                message: None,
                origin: None,
            });
        }
        Ok(previous)
    }

    fn record_claim(&self, conversation: &Conversation, operator_id: &str, claim: &ClaimOutcome) {
        if claim.newly_assigned {
            self.metrics.claimed();
            info!(conversation = %conversation.id, operator = %operator_id, "Conversation claimed");
        } else if !claim.claimed {
            self.metrics.claim_conflict();
            warn!(
                conversation = %conversation.id,
                operator = %operator_id,
                owner = %claim.assigned_operator,
                "Operator acted on a conversation owned by someone else; assignment unchanged"
            );
        }
    }

    /// Tell every operator except the new owner that the conversation is taken.
    async fn announce_assignment(&self, conversation_id: &str, owner: &str) {
        let others: Vec<OperatorId> = self
            .registry
            .all_operator_ids()
            .await
            .into_iter()
            .filter(|op| op != owner)
            .collect();
        self.deliver_to_operators(
            &others,
            ServerMessage::ConversationAssigned {
                conversation_id: conversation_id.to_string(),
                operator_id: owner.to_string(),
            },
            None,
        )
        .await;
    }

    /// Queue `frame` on every live connection of every listed operator,
    /// skipping `exclude`. Closed or saturated connections are skipped and
    /// counted; they never abort the rest of the fan-out.
    async fn deliver_to_operators(
        &self,
        operator_ids: &[OperatorId],
        frame: ServerMessage,
        exclude: Option<&str>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for operator_id in operator_ids {
            let mut per_operator = DeliveryReport::default();
            for conn in self.registry.connections_for(operator_id).await {
                if exclude == Some(conn.id()) {
                    continue;
                }
                match conn.deliver(frame.clone()) {
                    Ok(()) => per_operator.delivered += 1,
                    Err(e) => {
                        per_operator.failed += 1;
                        debug!(operator = %operator_id, conn_id = %conn.id(), "Skipping connection: {}", e);
                    }
                }
            }
            report.merge(per_operator);
        }
        self.metrics.delivered(report.delivered);
        if report.failed > 0 {
            self.metrics.delivery_failed(report.failed);
        }
        report
    }
}

fn message_frame(conversation: &Conversation, message: &Message) -> ServerMessage {
    ServerMessage::Message {
        conversation_id: conversation.id.clone(),
        message: message.clone(),
        assigned_operator: conversation.assigned_operator.clone(),
    }
}
