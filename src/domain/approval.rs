//! Approval domain type (§3 Approval, §4.4 Approval Queue)

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record, now_ms};

use super::id::generate_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    TaskExecution,
    PluginApproval,
    SelfExtension,
    DestructiveAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalLevel {
    Notify,
    Confirm,
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

/// A pending human-in-the-loop gate attached to a Task or plugin action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: String,
    pub task_id: Option<String>,
    pub approval_type: ApprovalType,
    pub level: ApprovalLevel,
    pub payload: serde_json::Value,
    pub reason: String,
    pub decision: Option<Decision>,
    pub decided_by: Option<String>,
    pub decided_at: Option<i64>,
    pub created_at: i64,
}

/// Raised by [`Approval::decide`] when a decision is attempted on an already-decided record.
/// §3 invariant: a decision is final; re-decision is rejected.
#[derive(Debug, thiserror::Error)]
#[error("approval {0} already decided")]
pub struct AlreadyDecided(pub String);

impl Approval {
    pub fn new(
        task_id: Option<String>,
        approval_type: ApprovalType,
        level: ApprovalLevel,
        reason: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let reason = reason.into();
        Self {
            id: generate_id("approval", &reason),
            task_id,
            approval_type,
            level,
            payload,
            reason,
            decision: None,
            decided_by: None,
            decided_at: None,
            created_at: now_ms(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.decision.is_none()
    }

    pub fn decide(&mut self, decision: Decision, decided_by: impl Into<String>) -> Result<(), AlreadyDecided> {
        if self.decision.is_some() {
            return Err(AlreadyDecided(self.id.clone()));
        }
        self.decision = Some(decision);
        self.decided_by = Some(decided_by.into());
        self.decided_at = Some(now_ms());
        Ok(())
    }
}

impl Record for Approval {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.decided_at.unwrap_or(self.created_at)
    }

    fn collection_name() -> &'static str {
        "approvals"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("pending".to_string(), IndexValue::Bool(self.is_pending()));
        if let Some(ref task_id) = self.task_id {
            fields.insert("task_id".to_string(), IndexValue::String(task_id.clone()));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_approval_is_pending() {
        let approval = Approval::new(
            Some("t1".to_string()),
            ApprovalType::DestructiveAction,
            ApprovalLevel::Confirm,
            "matched destructive pattern".to_string(),
            serde_json::json!({"command": "rm -rf /"}),
        );
        assert!(approval.is_pending());
        assert!(approval.decision.is_none());
    }

    #[test]
    fn decide_is_final() {
        let mut approval = Approval::new(
            Some("t1".to_string()),
            ApprovalType::DestructiveAction,
            ApprovalLevel::Confirm,
            "matched destructive pattern".to_string(),
            serde_json::json!({}),
        );
        approval.decide(Decision::Rejected, "user").unwrap();
        assert!(!approval.is_pending());
        assert_eq!(approval.decision, Some(Decision::Rejected));

        let err = approval.decide(Decision::Approved, "user");
        assert!(err.is_err());
        assert_eq!(approval.decision, Some(Decision::Rejected));
    }
}
