//! Approval Queue: `Request`/`Pending`/`Decide` over the persisted `Approval`
//! entity (C4, §4.4).

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::domain::{AlreadyDecided, Approval, Decision, Filter, FilterOp, IndexValue, Record, Store};
use crate::events::{Actor, Event, EventStore};

#[derive(Debug, Error)]
pub enum ApprovalQueueError {
    #[error("approval {0} not found")]
    NotFound(String),
    #[error(transparent)]
    AlreadyDecided(#[from] AlreadyDecided),
    #[error(transparent)]
    Store(#[from] taskstore::StoreError),
    #[error(transparent)]
    EventStore(#[from] crate::events::EventStoreError),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Human-in-the-loop gate queue. Every write goes through the event log first
/// (write-ahead, same discipline C2 uses) and then into the `Store` snapshot.
/// `events` is the process-wide shared log (C1), not a private one.
pub struct ApprovalQueue {
    store: Store,
    events: Arc<EventStore>,
}

impl ApprovalQueue {
    pub fn new(store: Store, events: Arc<EventStore>) -> Self {
        Self { store, events }
    }

    /// Persist a new pending approval and return its id.
    pub fn request(&self, approval: Approval) -> Result<String, ApprovalQueueError> {
        debug!(id = %approval.id, approval_type = ?approval.approval_type, "ApprovalQueue::request: called");
        self.events.append(Event::new(
            Actor::System,
            "approval.requested",
            serde_json::to_value(&approval)?,
        ))?;
        let id = self.store.create(approval)?;
        Ok(id)
    }

    /// All approvals still awaiting a decision.
    pub fn pending(&self) -> Result<Vec<Approval>, ApprovalQueueError> {
        let filter = Filter {
            field: "pending".to_string(),
            op: FilterOp::Eq,
            value: IndexValue::Bool(true),
        };
        Ok(self.store.list::<Approval>(&[filter])?)
    }

    /// Decide a pending approval exactly once. Returns the updated record so
    /// the caller (the scheduler tick) can act on the outcome immediately.
    pub fn decide(&self, id: &str, decision: Decision, decided_by: impl Into<String>) -> Result<Approval, ApprovalQueueError> {
        let decided_by = decided_by.into();
        debug!(%id, ?decision, %decided_by, "ApprovalQueue::decide: called");
        let Some(mut approval) = self.store.get::<Approval>(id)? else {
            return Err(ApprovalQueueError::NotFound(id.to_string()));
        };
        approval.decide(decision, decided_by)?;
        self.events.append(Event::new(
            Actor::User,
            "approval.decided",
            serde_json::to_value(&approval)?,
        ))?;
        self.store.update(approval.clone())?;
        Ok(approval)
    }

    /// Fetch a single approval by id, decided or not.
    pub fn get(&self, id: &str) -> Result<Option<Approval>, ApprovalQueueError> {
        Ok(self.store.get::<Approval>(id)?)
    }

    /// All approvals that have received a decision, for the scheduler's
    /// "check approvals" tick step (§4.8 step 2) to react to.
    pub fn decided(&self) -> Result<Vec<Approval>, ApprovalQueueError> {
        let filter = Filter {
            field: "pending".to_string(),
            op: FilterOp::Eq,
            value: IndexValue::Bool(false),
        };
        Ok(self.store.list::<Approval>(&[filter])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ApprovalLevel, ApprovalType};

    fn queue() -> (ApprovalQueue, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("store")).unwrap();
        let events = Arc::new(EventStore::open(dir.path().join("events_root"), crate::events::DEFAULT_SEGMENT_BYTES).unwrap());
        (ApprovalQueue::new(store, events), dir)
    }

    fn sample() -> Approval {
        Approval::new(
            Some("t1".to_string()),
            ApprovalType::DestructiveAction,
            ApprovalLevel::Confirm,
            "rm -rf matched",
            serde_json::json!({"command": "rm -rf /tmp/x"}),
        )
    }

    #[test]
    fn requested_approval_shows_up_as_pending() {
        let (queue, _dir) = queue();
        let id = queue.request(sample()).unwrap();
        let pending = queue.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
    }

    #[test]
    fn deciding_removes_it_from_pending() {
        let (queue, _dir) = queue();
        let id = queue.request(sample()).unwrap();
        queue.decide(&id, Decision::Approved, "alice").unwrap();
        assert!(queue.pending().unwrap().is_empty());
        let approval = queue.get(&id).unwrap().unwrap();
        assert_eq!(approval.decision, Some(Decision::Approved));
        assert_eq!(approval.decided_by.as_deref(), Some("alice"));
    }

    #[test]
    fn deciding_twice_is_rejected() {
        let (queue, _dir) = queue();
        let id = queue.request(sample()).unwrap();
        queue.decide(&id, Decision::Approved, "alice").unwrap();
        let err = queue.decide(&id, Decision::Rejected, "bob");
        assert!(matches!(err, Err(ApprovalQueueError::AlreadyDecided(_))));
    }

    #[test]
    fn deciding_unknown_id_errors() {
        let (queue, _dir) = queue();
        let err = queue.decide("approval-nope", Decision::Approved, "alice");
        assert!(matches!(err, Err(ApprovalQueueError::NotFound(_))));
    }

    #[test]
    fn decided_lists_only_resolved_approvals() {
        let (queue, _dir) = queue();
        let pending_id = queue.request(sample()).unwrap();
        let decided_id = queue.request(sample()).unwrap();
        queue.decide(&decided_id, Decision::Approved, "alice").unwrap();

        let decided = queue.decided().unwrap();
        assert_eq!(decided.len(), 1);
        assert_eq!(decided[0].id, decided_id);
        assert!(queue.pending().unwrap().iter().any(|a| a.id == pending_id));
    }
}
