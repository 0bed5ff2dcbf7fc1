//! Conversation Store
//!
//! In-memory index of conversations keyed by id and by customer address.
//! Each conversation sits behind its own mutex; holding that guard serializes
//! every mutation of the conversation (append, claim, release) and the fan-out
//! that follows it.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::error::RelayError;
use crate::models::{Conversation, ConversationId, ConversationSummary, Direction, Message};

/// Shared, individually lockable conversation.
pub type ConversationSlot = Arc<Mutex<Conversation>>;

#[derive(Default)]
struct StoreIndex {
    by_id: HashMap<ConversationId, ConversationSlot>,
    by_address: HashMap<String, ConversationId>,
}

#[derive(Default)]
pub struct ConversationStore {
    index: RwLock<StoreIndex>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the conversation for `customer_address`, creating it on first
    /// contact. Concurrent first-contact calls for the same address all get
    /// the same conversation. The boolean is true for the single caller that
    /// created it.
    pub async fn get_or_create(&self, customer_address: &str) -> (ConversationSlot, bool) {
        {
            let index = self.index.read().await;
            if let Some(slot) = index.lookup_address(customer_address) {
                return (slot, false);
            }
        }

        let mut index = self.index.write().await;
        // Re-check: another task may have created it between the two locks
        if let Some(slot) = index.lookup_address(customer_address) {
            return (slot, false);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let conversation = Conversation::new(id.clone(), customer_address.to_string(), Utc::now());
        let slot = Arc::new(Mutex::new(conversation));
        index
            .by_address
            .insert(customer_address.to_string(), id.clone());
        index.by_id.insert(id.clone(), slot.clone());
        info!(conversation = %id, customer = %customer_address, "New conversation");
        (slot, true)
    }

    pub async fn slot(&self, conversation_id: &str) -> Result<ConversationSlot, RelayError> {
        self.index
            .read()
            .await
            .by_id
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(conversation_id.to_string()))
    }

    /// Cloned view of one conversation.
    pub async fn get(&self, conversation_id: &str) -> Result<Conversation, RelayError> {
        let slot = self.slot(conversation_id).await?;
        let conversation = slot.lock().await;
        Ok(conversation.clone())
    }

    /// Append a message, stamping id and server timestamp.
    ///
    /// Standalone entry point. `MessageRouter` appends through
    /// `Conversation::append` on the slot it has locked, so the fan-out
    /// happens before the lock is released.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        direction: Direction,
        sender: &str,
        text: &str,
    ) -> Result<Message, RelayError> {
        let slot = self.slot(conversation_id).await?;
        let mut conversation = slot.lock().await;
        Ok(conversation.append(direction, sender, text, Utc::now()))
    }

    /// Every conversation that is unassigned or assigned to `operator_id`,
    /// most recent activity first.
    pub async fn snapshot_for(&self, operator_id: &str) -> Vec<Conversation> {
        let mut visible = Vec::new();
        for slot in self.slots().await {
            let conversation = slot.lock().await;
            if conversation.is_visible_to(operator_id) {
                visible.push(conversation.clone());
            }
        }
        visible.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        visible
    }

    /// Summaries of all conversations, most recent activity first.
    pub async fn summaries(&self) -> Vec<ConversationSummary> {
        let mut out = Vec::new();
        for slot in self.slots().await {
            out.push(slot.lock().await.summary());
        }
        out.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        out
    }

    /// Insert a conversation loaded from durable storage. An address that is
    /// already indexed keeps its live conversation.
    pub async fn restore(&self, conversation: Conversation) -> bool {
        let mut index = self.index.write().await;
        if index.by_address.contains_key(&conversation.customer_address)
            || index.by_id.contains_key(&conversation.id)
        {
            return false;
        }
        index
            .by_address
            .insert(conversation.customer_address.clone(), conversation.id.clone());
        index.by_id.insert(
            conversation.id.clone(),
            Arc::new(Mutex::new(conversation)),
        );
        true
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Clone the slot list so no index lock is held while conversations are locked.
    async fn slots(&self) -> Vec<ConversationSlot> {
        self.index.read().await.by_id.values().cloned().collect()
    }
}

impl StoreIndex {
    fn lookup_address(&self, customer_address: &str) -> Option<ConversationSlot> {
        self.by_address
            .get(customer_address)
            .and_then(|id| self.by_id.get(id))
            .cloned()
    }
}
