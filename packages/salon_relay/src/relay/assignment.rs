//! Assignment Engine
//!
//! Decides who owns a conversation and who receives its events.
//! At most one operator owns a conversation; the first successful claim wins.

use serde::Serialize;
use std::sync::Arc;

use crate::error::RelayError;
use crate::models::{Conversation, OperatorId};

use super::registry::ConnectionRegistry;
use super::store::ConversationStore;

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimOutcome {
    /// True if the claimant owns the conversation after the call.
    pub claimed: bool,
    /// Owner after the call (the claimant, or whoever won earlier).
    pub assigned_operator: OperatorId,
    /// True only for the call that moved the conversation out of "unassigned".
    pub newly_assigned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FanoutMode {
    /// Unassigned: every connected operator, so any of them may claim it.
    Broadcast,
    /// Assigned: only the owner.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FanoutTargets {
    pub mode: FanoutMode,
    pub operator_ids: Vec<OperatorId>,
}

/// Claim `conversation` for `operator_id` if nobody owns it.
///
/// Idempotent for the current owner. A different owner is never replaced.
pub fn claim(conversation: &mut Conversation, operator_id: &str) -> ClaimOutcome {
    match &conversation.assigned_operator {
        None => {
            conversation.assigned_operator = Some(operator_id.to_string());
            ClaimOutcome {
                claimed: true,
                assigned_operator: operator_id.to_string(),
                newly_assigned: true,
            }
        }
        Some(owner) => ClaimOutcome {
            claimed: owner == operator_id,
            assigned_operator: owner.clone(),
            newly_assigned: false,
        },
    }
}

/// Administrative reset. Returns the previous owner, if any.
pub fn release(conversation: &mut Conversation) -> Option<OperatorId> {
    conversation.assigned_operator.take()
}

/// Operators that should see events for this conversation, resolved against
/// the currently connected operators.
pub fn resolve_targets(conversation: &Conversation, connected: Vec<OperatorId>) -> FanoutTargets {
    match &conversation.assigned_operator {
        None => FanoutTargets {
            mode: FanoutMode::Broadcast,
            operator_ids: connected,
        },
        Some(owner) => FanoutTargets {
            mode: FanoutMode::Direct,
            operator_ids: vec![owner.clone()],
        },
    }
}

pub struct AssignmentEngine {
    store: Arc<ConversationStore>,
    registry: Arc<ConnectionRegistry>,
}

impl AssignmentEngine {
    pub fn new(store: Arc<ConversationStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Claim by id, locking the conversation for the duration of the check-and-set.
    ///
    /// Standalone entry point. `MessageRouter` already holds the conversation
    /// lock when it claims, so it calls [`claim`] directly and fans out under
    /// the same guard.
    pub async fn claim_if_unassigned(
        &self,
        conversation_id: &str,
        operator_id: &str,
    ) -> Result<ClaimOutcome, RelayError> {
        let slot = self.store.slot(conversation_id).await?;
        let mut conversation = slot.lock().await;
        Ok(claim(&mut conversation, operator_id))
    }

    pub async fn fanout_targets(&self, conversation: &Conversation) -> FanoutTargets {
        let connected = match conversation.assigned_operator {
            None => self.registry.all_operator_ids().await,
            Some(_) => Vec::new(),
        };
        resolve_targets(conversation, connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::registry::ConnectionHandle;
    use chrono::Utc;
    use tokio::sync::mpsc;

    fn conversation() -> Conversation {
        Conversation::new("c-1".into(), "+569".into(), Utc::now())
    }

    #[test]
    fn first_claim_wins() {
        let mut c = conversation();
        let ana = claim(&mut c, "ana@x.com");
        assert_eq!(
            ana,
            ClaimOutcome {
                claimed: true,
                assigned_operator: "ana@x.com".into(),
                newly_assigned: true,
            }
        );

        let luis = claim(&mut c, "luis@x.com");
        assert!(!luis.claimed);
        assert!(!luis.newly_assigned);
        assert_eq!(luis.assigned_operator, "ana@x.com");
        assert_eq!(c.assigned_operator.as_deref(), Some("ana@x.com"));
    }

    #[test]
    fn claim_is_idempotent_for_owner() {
        let mut c = conversation();
        claim(&mut c, "ana@x.com");
        let again = claim(&mut c, "ana@x.com");
        assert!(again.claimed);
        assert!(!again.newly_assigned);
    }

    #[test]
    fn release_reopens_conversation() {
        let mut c = conversation();
        claim(&mut c, "ana@x.com");
        assert_eq!(release(&mut c).as_deref(), Some("ana@x.com"));
        assert!(c.assigned_operator.is_none());
        assert!(release(&mut c).is_none());
        assert!(claim(&mut c, "luis@x.com").newly_assigned);
    }

    #[test]
    fn unassigned_resolves_to_broadcast() {
        let c = conversation();
        let targets = resolve_targets(&c, vec!["ana@x.com".into(), "luis@x.com".into()]);
        assert_eq!(targets.mode, FanoutMode::Broadcast);
        assert_eq!(targets.operator_ids, vec!["ana@x.com", "luis@x.com"]);
    }

    #[test]
    fn assigned_resolves_to_owner_even_when_offline() {
        let mut c = conversation();
        c.assigned_operator = Some("ana@x.com".into());
        let targets = resolve_targets(&c, vec!["luis@x.com".into()]);
        assert_eq!(targets.mode, FanoutMode::Direct);
        assert_eq!(targets.operator_ids, vec!["ana@x.com"]);
    }

    #[tokio::test]
    async fn engine_claim_by_id() {
        let store = Arc::new(ConversationStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = AssignmentEngine::new(store.clone(), registry);

        let (slot, _) = store.get_or_create("+569").await;
        let id = slot.lock().await.id.clone();

        assert!(engine.claim_if_unassigned(&id, "ana@x.com").await.unwrap().claimed);
        let lost = engine.claim_if_unassigned(&id, "luis@x.com").await.unwrap();
        assert!(!lost.claimed);
        assert_eq!(lost.assigned_operator, "ana@x.com");

        assert!(matches!(
            engine.claim_if_unassigned("missing", "ana@x.com").await,
            Err(RelayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn engine_fanout_uses_connected_operators() {
        let store = Arc::new(ConversationStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = AssignmentEngine::new(store, registry.clone());

        let (tx, _rx) = mpsc::channel(4);
        registry
            .register("ana@x.com", ConnectionHandle::new("a".into(), tx.clone()))
            .await;
        registry
            .register("luis@x.com", ConnectionHandle::new("l".into(), tx))
            .await;

        let c = conversation();
        let targets = engine.fanout_targets(&c).await;
        assert_eq!(targets.mode, FanoutMode::Broadcast);
        assert_eq!(targets.operator_ids.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_award_one_owner() {
        let store = Arc::new(ConversationStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = Arc::new(AssignmentEngine::new(store.clone(), registry));
        let (slot, _) = store.get_or_create("+569").await;
        let id = slot.lock().await.id.clone();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let engine = engine.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                engine
                    .claim_if_unassigned(&id, &format!("op-{i}@x.com"))
                    .await
                    .unwrap()
            }));
        }

        let mut winners = Vec::new();
        let mut owners = std::collections::HashSet::new();
        for t in tasks {
            let outcome = t.await.unwrap();
            owners.insert(outcome.assigned_operator.clone());
            if outcome.newly_assigned {
                winners.push(outcome);
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(owners.len(), 1);
    }
}
