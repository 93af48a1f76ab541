//! Candidate selection for the dispatch step of the tick loop (C8, §4.8 step 4).

use std::collections::HashSet;

use crate::domain::{Task, TaskStatus};

/// Pending tasks whose dependencies are all completed, sorted by priority
/// (critical first) then by `created_at` ascending — FIFO within a priority
/// class (§8 P8).
pub fn dispatchable_candidates(pending: Vec<Task>, completed_ids: &HashSet<String>) -> Vec<Task> {
    let mut candidates: Vec<Task> = pending
        .into_iter()
        .filter(|t| t.status == TaskStatus::Pending && t.dependencies_satisfied(completed_ids))
        .collect();
    candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, TaskOrigin};

    fn task(desc: &str, priority: Priority) -> Task {
        Task::new(desc, TaskOrigin::User, priority)
    }

    #[test]
    fn sorts_by_priority_then_created_at() {
        let mut low = task("low", Priority::Low);
        let mut high = task("high", Priority::High);
        // force distinct created_at ordering within the same priority class
        low.created_at = 100;
        high.created_at = 50;
        let critical = task("critical", Priority::Critical);

        let sorted = dispatchable_candidates(vec![low, high, critical.clone()], &HashSet::new());
        assert_eq!(sorted[0].id, critical.id);
        assert_eq!(sorted[1].description, "high");
        assert_eq!(sorted[2].description, "low");
    }

    #[test]
    fn excludes_tasks_with_unsatisfied_dependencies() {
        let blocked = task("blocked", Priority::Medium).with_dependencies(vec!["missing".to_string()]);
        let ready = task("ready", Priority::Medium);
        let candidates = dispatchable_candidates(vec![blocked, ready.clone()], &HashSet::new());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, ready.id);
    }

    #[test]
    fn fifo_within_equal_priority() {
        let mut first = task("first", Priority::Medium);
        let mut second = task("second", Priority::Medium);
        first.created_at = 10;
        second.created_at = 20;
        let candidates = dispatchable_candidates(vec![second, first], &HashSet::new());
        assert_eq!(candidates[0].description, "first");
        assert_eq!(candidates[1].description, "second");
    }
}
