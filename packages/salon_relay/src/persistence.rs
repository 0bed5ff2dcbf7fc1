use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::models::{ConversationRecord, Message};
use crate::relay::ConversationStore;
use crate::repository::ConversationRepository;

/// Durable write-through target for conversations and messages.
///
/// The in-memory store stays the source of truth for live traffic; sinks are
/// called after the fact and their failures never undo an append.
#[async_trait]
pub trait ConversationSink: Send + Sync {
    /// Insert or update the conversation header (including its assignment).
    async fn save_conversation(&self, record: &ConversationRecord) -> Result<()>;

    /// Store a message. Saving the same message twice is a no-op.
    async fn save_message(&self, message: &Message) -> Result<()>;
}

/// Sink used when persistence is disabled.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl ConversationSink for NullSink {
    async fn save_conversation(&self, _record: &ConversationRecord) -> Result<()> {
        Ok(())
    }

    async fn save_message(&self, _message: &Message) -> Result<()> {
        Ok(())
    }
}

/// Load every persisted conversation into `store`. Returns how many were added.
pub async fn hydrate(store: &ConversationStore, repository: &ConversationRepository) -> Result<usize> {
    let conversations = repository
        .load_conversations()
        .await
        .context("Failed to load persisted conversations")?;
    let total = conversations.len();
    let mut restored = 0;
    for conversation in conversations {
        if store.restore(conversation).await {
            restored += 1;
        }
    }
    info!("Restored {} of {} persisted conversations", restored, total);
    Ok(restored)
}
