use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashMap;

use crate::models::{Conversation, ConversationRecord, Direction, Message};
use crate::persistence::ConversationSink;

use super::ConversationRepository;

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).with_context(|| format!("Timestamp out of range: {}", ms))
}

impl ConversationRepository {
    /// Insert the conversation header, or update its assignment if it exists.
    pub async fn upsert_conversation(&self, record: &ConversationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, customer_address, assigned_operator, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                assigned_operator = excluded.assigned_operator
            "#,
        )
        .bind(&record.id)
        .bind(&record.customer_address)
        .bind(&record.assigned_operator)
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert conversation {}", record.id))?;
        Ok(())
    }

    /// Insert a message. Messages are immutable, so a repeated insert is ignored.
    pub async fn insert_message(&self, message: &Message) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO messages (conversation_id, id, direction, sender, text, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.conversation_id)
        .bind(message.id as i64)
        .bind(message.direction.as_str())
        .bind(&message.sender)
        .bind(&message.text)
        .bind(message.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "Failed to insert message {} of conversation {}",
                message.id, message.conversation_id
            )
        })?;
        Ok(())
    }

    /// Load every conversation with its full message log.
    pub async fn load_conversations(&self) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, customer_address, assigned_operator, created_at
            FROM conversations
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load conversations")?;

        let mut messages = self.load_messages().await?;

        rows.into_iter()
            .map(|r| {
                let record = ConversationRecord {
                    id: r.get("id"),
                    customer_address: r.get("customer_address"),
                    assigned_operator: r.get("assigned_operator"),
                    created_at: from_millis(r.get("created_at"))?,
                };
                let log = messages.remove(&record.id).unwrap_or_default();
                Ok(Conversation::restore(record, log))
            })
            .collect()
    }

    async fn load_messages(&self) -> Result<HashMap<String, Vec<Message>>> {
        let rows = sqlx::query(
            r#"
            SELECT conversation_id, id, direction, sender, text, timestamp
            FROM messages
            ORDER BY conversation_id, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load messages")?;

        let mut by_conversation: HashMap<String, Vec<Message>> = HashMap::new();
        for r in rows {
            let direction: String = r.get("direction");
            let direction = Direction::parse(&direction)
                .with_context(|| format!("Unknown message direction: {}", direction))?;
            let id: i64 = r.get("id");
            let message = Message {
                id: id as u64,
                conversation_id: r.get("conversation_id"),
                direction,
                sender: r.get("sender"),
                text: r.get("text"),
                timestamp: from_millis(r.get("timestamp"))?,
            };
            by_conversation
                .entry(message.conversation_id.clone())
                .or_default()
                .push(message);
        }
        Ok(by_conversation)
    }

    pub async fn count_conversations(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl ConversationSink for ConversationRepository {
    async fn save_conversation(&self, record: &ConversationRecord) -> Result<()> {
        self.upsert_conversation(record).await
    }

    async fn save_message(&self, message: &Message) -> Result<()> {
        self.insert_message(message).await
    }
}
