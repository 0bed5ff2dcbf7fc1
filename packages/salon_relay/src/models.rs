//! Conversation and message models shared by the relay, the WebSocket protocol
//! and the write-through repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque operator identity (usually the operator's login e-mail).
pub type OperatorId = String;

/// Stable conversation identifier, generated on first contact.
pub type ConversationId = String;

/// Which side of the conversation produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// From the customer, through the messaging channel.
    Incoming,
    /// From an operator, through the dashboard.
    Outgoing,
}

impl Direction {
    /// Convert direction to string for database storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }

    /// Parse direction from database string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "incoming" => Some(Self::Incoming),
            "outgoing" => Some(Self::Outgoing),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A message stored in a conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Position in the conversation log, starting at 1.
    pub id: u64,
    pub conversation_id: ConversationId,
    pub direction: Direction,
    /// Customer address for incoming messages, operator id for outgoing ones.
    pub sender: String,
    pub text: String,
    /// Server-assigned; never earlier than the previous message's timestamp.
    pub timestamp: DateTime<Utc>,
}

/// One customer's conversation with the salon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub customer_address: String,
    pub assigned_operator: Option<OperatorId>,
    pub messages: Vec<Message>,
    /// Text of the most recently appended message (empty before the first one).
    pub last_message_preview: String,
    /// Incoming messages received since the last operator reply.
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: ConversationId, customer_address: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            customer_address,
            assigned_operator: None,
            messages: Vec::new(),
            last_message_preview: String::new(),
            unread_count: 0,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Rebuild a conversation from persisted rows. Derived fields are recomputed
    /// from the message log rather than trusted from storage.
    pub fn restore(record: ConversationRecord, mut messages: Vec<Message>) -> Self {
        messages.sort_by_key(|m| m.id);

        let mut conversation = Self::new(record.id, record.customer_address, record.created_at);
        conversation.assigned_operator = record.assigned_operator;
        for message in messages {
            conversation.track(&message);
            conversation.messages.push(message);
        }
        conversation
    }

    /// True when the conversation belongs in `operator_id`'s view: either nobody
    /// owns it yet or `operator_id` does.
    pub fn is_visible_to(&self, operator_id: &str) -> bool {
        match &self.assigned_operator {
            None => true,
            Some(owner) => owner == operator_id,
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Append a message to the log, stamping id and timestamp.
    ///
    /// The timestamp is `now` unless that would move backwards relative to the
    /// previous message (wall-clock adjustments), in which case the previous
    /// timestamp is reused.
    pub fn append(
        &mut self,
        direction: Direction,
        sender: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Message {
        let timestamp = match self.messages.last() {
            Some(prev) if prev.timestamp > now => prev.timestamp,
            _ => now,
        };
        let message = Message {
            id: self.messages.len() as u64 + 1,
            conversation_id: self.id.clone(),
            direction,
            sender: sender.to_string(),
            text: text.to_string(),
            timestamp,
        };
        self.track(&message);
        self.messages.push(message.clone());
        message
    }

    fn track(&mut self, message: &Message) {
        self.last_message_preview = message.text.clone();
        self.last_activity_at = message.timestamp;
        match message.direction {
            Direction::Incoming => self.unread_count += 1,
            Direction::Outgoing => self.unread_count = 0,
        }
    }

    pub fn record(&self) -> ConversationRecord {
        ConversationRecord {
            id: self.id.clone(),
            customer_address: self.customer_address.clone(),
            assigned_operator: self.assigned_operator.clone(),
            created_at: self.created_at,
        }
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            customer_address: self.customer_address.clone(),
            assigned_operator: self.assigned_operator.clone(),
            last_message_preview: self.last_message_preview.clone(),
            unread_count: self.unread_count,
            message_count: self.messages.len(),
            last_activity_at: self.last_activity_at,
        }
    }
}

/// Conversation header without the message log, as persisted by the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub customer_address: String,
    pub assigned_operator: Option<OperatorId>,
    pub created_at: DateTime<Utc>,
}

/// Lightweight listing entry for the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub customer_address: String,
    pub assigned_operator: Option<OperatorId>,
    pub last_message_preview: String,
    pub unread_count: u32,
    pub message_count: usize,
    pub last_activity_at: DateTime<Utc>,
}
