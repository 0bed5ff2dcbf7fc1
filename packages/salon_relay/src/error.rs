use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::models::{ConversationId, OperatorId};

/// Errors surfaced to relay callers. None of these are fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),

    #[error("connection has not identified an operator")]
    NotIdentified,

    #[error("connection is identified as {bound}, not {claimed}")]
    OperatorMismatch {
        bound: OperatorId,
        claimed: OperatorId,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::NotIdentified | RelayError::OperatorMismatch { .. } => {
                StatusCode::FORBIDDEN
            }
            RelayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        };
        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Failures reaching the customer's messaging channel.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("channel rejected message with status {status}")]
    Rejected { status: u16 },

    #[error("channel is unavailable")]
    Unavailable,

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl DeliveryError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Unavailable
        } else {
            Self::Transport(err)
        }
    }
}
