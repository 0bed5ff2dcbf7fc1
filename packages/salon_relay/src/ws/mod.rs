//! Relay WebSocket transport
//!
//! One connection per dashboard tab or channel adapter. Frames are JSON,
//! tagged by `type`.

pub(crate) mod dispatch;
mod handler;
mod protocol;

pub use handler::handle_relay_ws;
pub use protocol::{ClientMessage, ServerMessage};
