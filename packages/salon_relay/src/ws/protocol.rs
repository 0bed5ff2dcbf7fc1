//! WebSocket Protocol Types
//!
//! Message types for relay traffic. Every frame is a JSON object tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::models::{Conversation, ConversationId, Message, OperatorId};

/// Messages sent FROM a client (operator dashboard or channel adapter) TO the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Bind this connection to an operator and receive the bootstrap snapshot.
    OperatorIdentify { operator_id: OperatorId },
    /// Ask for the snapshot again (e.g. after the tab becomes visible).
    OperatorRequestSnapshot { operator_id: OperatorId },
    /// A customer wrote through the messaging channel.
    CustomerMessage { customer_address: String, text: String },
    /// An operator replies on a conversation.
    /// `client_id` is echoed back in the `ack` so the UI can reconcile its
    /// pending placeholder with the stored message.
    OperatorMessage {
        conversation_id: ConversationId,
        operator_id: OperatorId,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    /// Take ownership of an unassigned conversation without replying.
    OperatorClaim {
        conversation_id: ConversationId,
        operator_id: OperatorId,
    },
}

/// Messages sent FROM the relay TO clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Every conversation visible to the operator, most recent activity first.
    Snapshot {
        operator_id: OperatorId,
        conversations: Vec<Conversation>,
    },
    /// A customer wrote for the first time.
    NewConversation {
        conversation_id: ConversationId,
        customer_address: String,
        text: String,
    },
    /// A message was appended to a conversation.
    Message {
        conversation_id: ConversationId,
        message: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assigned_operator: Option<OperatorId>,
    },
    /// The conversation now belongs to `operator_id`.
    ConversationAssigned {
        conversation_id: ConversationId,
        operator_id: OperatorId,
    },
    /// An administrator cleared the assignment; the conversation is open again.
    ConversationReleased { conversation: Conversation },
    /// Confirms an `operator-message` to the connection that sent it.
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        message: Message,
        claimed: bool,
        assigned_operator: OperatorId,
    },
    /// Outcome of an `operator-claim`.
    ClaimResult {
        conversation_id: ConversationId,
        claimed: bool,
        assigned_operator: OperatorId,
    },
    /// The message is stored but may not have reached the customer or storage.
    DeliveryWarning {
        conversation_id: ConversationId,
        message_id: u64,
        reason: String,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
        message: String,
    },
}
