//! Task domain type (§3 Task)

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record, now_ms};

use super::id::generate_id;
use super::priority::Priority;

/// Where a Task came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrigin {
    #[default]
    User,
    Decomposition,
    Autonomous,
    Reflection,
}

/// Lifecycle status of a Task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Active,
    Blocked,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Blocked => write!(f, "blocked"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One execution attempt of a Task. `attempts` on a Task grows monotonically
/// and is never rewritten (§3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub success: bool,
    pub elapsed_ms: u64,
    pub output_preview: String,
    pub error: Option<String>,
    pub started_at: i64,
}

/// A discrete unit of work dispatched through the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub origin: TaskOrigin,
    pub goal_id: Option<String>,
    pub dependencies: Vec<String>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub attempts: Vec<AttemptRecord>,
    pub approved: bool,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    pub fn new(description: impl Into<String>, origin: TaskOrigin, priority: Priority) -> Self {
        let description = description.into();
        let now = now_ms();
        Self {
            id: generate_id("task", &description),
            description,
            origin,
            goal_id: None,
            dependencies: Vec::new(),
            priority,
            status: TaskStatus::Pending,
            attempts: Vec::new(),
            approved: false,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(id: impl Into<String>, description: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            description: description.into(),
            origin: TaskOrigin::User,
            goal_id: None,
            dependencies: Vec::new(),
            priority: Priority::Medium,
            status: TaskStatus::Pending,
            attempts: Vec::new(),
            approved: false,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_goal(mut self, goal_id: impl Into<String>) -> Self {
        self.goal_id = Some(goal_id.into());
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// §3 invariant: terminal states are immutable except for audit appends.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Only non-terminal transitions are legal mutations of `status`.
    pub fn set_status(&mut self, status: TaskStatus) -> Result<(), IllegalTransition> {
        if self.is_terminal() {
            return Err(IllegalTransition {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.updated_at = now_ms();
        Ok(())
    }

    pub fn record_attempt(&mut self, attempt: AttemptRecord) {
        self.attempts.push(attempt);
        self.updated_at = now_ms();
    }

    pub fn approve(&mut self) {
        self.approved = true;
        self.updated_at = now_ms();
    }

    /// §4.8 candidate set: pending tasks whose dependencies are all satisfied.
    pub fn dependencies_satisfied(&self, completed_ids: &std::collections::HashSet<String>) -> bool {
        self.dependencies.iter().all(|d| completed_ids.contains(d))
    }
}

/// Returned by [`Task::set_status`] when a caller attempts to mutate a terminal task.
#[derive(Debug, thiserror::Error)]
#[error("illegal transition from {from} to {to}")]
pub struct IllegalTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

impl Record for Task {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "tasks"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("priority".to_string(), IndexValue::String(self.priority.to_string()));
        if let Some(ref goal_id) = self.goal_id {
            fields.insert("goal_id".to_string(), IndexValue::String(goal_id.clone()));
        }
        fields.insert("attempts".to_string(), IndexValue::Int(self.attempts.len() as i64));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_pending_and_unapproved() {
        let task = Task::new("echo hello", TaskOrigin::User, Priority::Medium);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(!task.approved);
        assert!(task.attempts.is_empty());
        assert!(task.id.contains("-task-"));
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let mut task = Task::new("test", TaskOrigin::User, Priority::Medium);
        task.set_status(TaskStatus::Completed).unwrap();
        assert!(task.is_terminal());

        let err = task.set_status(TaskStatus::Pending);
        assert!(err.is_err());
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn non_terminal_transitions_succeed() {
        let mut task = Task::new("test", TaskOrigin::User, Priority::Medium);
        task.set_status(TaskStatus::Active).unwrap();
        assert_eq!(task.status, TaskStatus::Active);
        task.set_status(TaskStatus::Failed).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[test]
    fn dependencies_satisfied_requires_all_present() {
        let task = Task::with_id("t2", "second").with_dependencies(vec!["t1".to_string()]);
        let mut completed = std::collections::HashSet::new();
        assert!(!task.dependencies_satisfied(&completed));
        completed.insert("t1".to_string());
        assert!(task.dependencies_satisfied(&completed));
    }

    #[test]
    fn attempts_grow_monotonically() {
        let mut task = Task::new("test", TaskOrigin::User, Priority::Medium);
        task.record_attempt(AttemptRecord {
            success: false,
            elapsed_ms: 10,
            output_preview: "boom".to_string(),
            error: Some("oops".to_string()),
            started_at: now_ms(),
        });
        task.record_attempt(AttemptRecord {
            success: true,
            elapsed_ms: 20,
            output_preview: "ok".to_string(),
            error: None,
            started_at: now_ms(),
        });
        assert_eq!(task.attempts.len(), 2);
    }

    #[test]
    fn indexed_fields_include_status_priority_goal() {
        let task = Task::new("test", TaskOrigin::User, Priority::High).with_goal("g1");
        let fields = task.indexed_fields();
        assert_eq!(fields.get("status"), Some(&IndexValue::String("pending".to_string())));
        assert_eq!(fields.get("priority"), Some(&IndexValue::String("high".to_string())));
        assert_eq!(fields.get("goal_id"), Some(&IndexValue::String("g1".to_string())));
    }
}
