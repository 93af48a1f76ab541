//! Goal domain type (§3 Goal)

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record, now_ms};

use super::id::generate_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    #[default]
    Draft,
    Active,
    Completed,
    Abandoned,
}

impl std::fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// A named intent owning a set of Tasks; completes when all owned Tasks complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub description: String,
    pub success_criteria: Option<String>,
    pub status: GoalStatus,
    pub task_ids: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Goal {
    pub fn new(description: impl Into<String>, success_criteria: Option<String>) -> Self {
        let description = description.into();
        let now = now_ms();
        Self {
            id: generate_id("goal", &description),
            description,
            success_criteria,
            status: GoalStatus::Draft,
            task_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: GoalStatus) {
        self.status = status;
        self.updated_at = now_ms();
    }

    pub fn link_task(&mut self, task_id: impl Into<String>) {
        self.task_ids.push(task_id.into());
        self.updated_at = now_ms();
    }

    /// §3 invariant: a Goal reaches `completed` only when every owned Task is `completed`.
    pub fn maybe_complete(&mut self, completed_task_ids: &std::collections::HashSet<String>) -> bool {
        if self.status != GoalStatus::Active || self.task_ids.is_empty() {
            return false;
        }
        let all_done = self.task_ids.iter().all(|id| completed_task_ids.contains(id));
        if all_done {
            self.set_status(GoalStatus::Completed);
        }
        all_done
    }
}

impl Record for Goal {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "goals"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_goal_is_draft_with_no_tasks() {
        let goal = Goal::new("set up repo", None);
        assert_eq!(goal.status, GoalStatus::Draft);
        assert!(goal.task_ids.is_empty());
    }

    #[test]
    fn maybe_complete_requires_every_task_done() {
        let mut goal = Goal::new("set up repo", None);
        goal.set_status(GoalStatus::Active);
        goal.link_task("t1");
        goal.link_task("t2");

        let mut completed = std::collections::HashSet::new();
        completed.insert("t1".to_string());
        assert!(!goal.maybe_complete(&completed));
        assert_eq!(goal.status, GoalStatus::Active);

        completed.insert("t2".to_string());
        assert!(goal.maybe_complete(&completed));
        assert_eq!(goal.status, GoalStatus::Completed);
    }

    #[test]
    fn maybe_complete_is_noop_for_non_active_goal() {
        let mut goal = Goal::new("draft goal", None);
        goal.link_task("t1");
        let mut completed = std::collections::HashSet::new();
        completed.insert("t1".to_string());
        assert!(!goal.maybe_complete(&completed));
        assert_eq!(goal.status, GoalStatus::Draft);
    }
}
