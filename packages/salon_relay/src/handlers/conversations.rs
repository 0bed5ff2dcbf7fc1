use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;
use crate::error::RelayError;
use crate::models::{Conversation, ConversationSummary, Message, OperatorId};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Restrict to conversations this operator can see.
    pub operator_id: Option<OperatorId>,
    /// Case-insensitive substring of the customer address.
    pub q: Option<String>,
}

/// List conversation summaries, most recent activity first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<ConversationSummary>> {
    let needle = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_lowercase);

    let summaries = state
        .store
        .summaries()
        .await
        .into_iter()
        .filter(|s| match (&query.operator_id, &s.assigned_operator) {
            (Some(op), Some(owner)) => op == owner,
            _ => true,
        })
        .filter(|s| match &needle {
            Some(n) => s.customer_address.to_lowercase().contains(n.as_str()),
            None => true,
        })
        .collect();
    Json(summaries)
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, RelayError> {
    Ok(Json(state.store.get(&id).await?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub conversation_id: String,
    pub previous_operator: Option<OperatorId>,
}

/// Administrative reset of a conversation's assignment.
pub async fn release_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReleaseResponse>, RelayError> {
    let previous_operator = state.router.release(&id).await?;
    info!(conversation = %id, "Release requested over HTTP");
    Ok(Json(ReleaseResponse {
        conversation_id: id,
        previous_operator,
    }))
}

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub customer_address: String,
    pub text: String,
}

/// Inbound webhook for messaging-channel adapters that speak HTTP.
pub async fn inbound_message(
    State(state): State<AppState>,
    Json(body): Json<InboundMessage>,
) -> Result<Json<Message>, RelayError> {
    let message = state
        .router
        .customer_message(&body.customer_address, &body.text)
        .await?;
    Ok(Json(message))
}
