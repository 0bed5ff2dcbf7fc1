//! The relay core: connection registry, conversation store, assignment,
//! routing, session bootstrap and the outbox that performs side effects.

pub mod assignment;
pub mod bootstrap;
pub mod outbox;
pub mod registry;
pub mod router;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use assignment::{AssignmentEngine, ClaimOutcome, FanoutMode, FanoutTargets};
pub use bootstrap::SessionBootstrap;
pub use outbox::{Outbox, OutboxJob, spawn_outbox};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, DeliveryFailure};
pub use router::{DeliveryReport, MessageRouter, OperatorSend};
pub use store::{ConversationSlot, ConversationStore};
