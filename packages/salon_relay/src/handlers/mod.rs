pub mod conversations;
pub mod health;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use conversations::{
    get_conversation, inbound_message, list_conversations, release_conversation,
};
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use websocket::relay_websocket_handler;
