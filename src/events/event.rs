//! Event record (§3 Event, §4.1 Event Store)

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Who caused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    User,
    Assistant,
    System,
    Scheduler,
    Sandbox,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
            Self::Scheduler => write!(f, "scheduler"),
            Self::Sandbox => write!(f, "sandbox"),
        }
    }
}

static SEQ: AtomicU32 = AtomicU32::new(0);

/// Generate a ULID-like, lexicographically sortable id: millisecond timestamp
/// (hex, zero-padded) followed by a process-local monotonic counter. Two
/// events appended within the same millisecond still sort by append order.
pub fn next_event_id() -> String {
    let ts = taskstore::now_ms().max(0) as u64;
    let seq = SEQ.fetch_add(1, Ordering::SeqCst);
    format!("{:012x}-{:08x}", ts, seq)
}

/// An immutable record appended to the event log. Never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub ts: i64,
    pub actor: Actor,
    /// String discriminator, e.g. "task_created", "tool_start", "approval_decided".
    pub act: String,
    pub trace_id: Option<String>,
    pub conv_id: Option<String>,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(actor: Actor, act: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: next_event_id(),
            ts: taskstore::now_ms(),
            actor,
            act: act.into(),
            trace_id: None,
            conv_id: None,
            payload,
        }
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_conv(mut self, conv_id: impl Into<String>) -> Self {
        self.conv_id = Some(conv_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonically_increasing() {
        let a = next_event_id();
        let b = next_event_id();
        assert!(b > a);
    }

    #[test]
    fn new_event_has_no_trace_by_default() {
        let event = Event::new(Actor::Scheduler, "task_created", serde_json::json!({"id": "t1"}));
        assert!(event.trace_id.is_none());
        assert!(event.conv_id.is_none());
        assert_eq!(event.act, "task_created");
    }

    #[test]
    fn actor_display_is_lowercase() {
        assert_eq!(Actor::Scheduler.to_string(), "scheduler");
        assert_eq!(Actor::Sandbox.to_string(), "sandbox");
    }
}
