//! Learning domain type (§3 Learning, §4.10 Learning Store)

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record, now_ms};

use super::id::generate_id;

/// Confidence decays linearly to zero over this many milliseconds since
/// `last_used_at` without reinforcement (§4.10).
pub const DECAY_HORIZON_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// The step added to `confidence` each time a learning is successfully reused.
pub const REINFORCEMENT_STEP: f64 = 0.1;

/// Observations at or below this confidence are eligible for garbage collection.
pub const CONFIDENCE_FLOOR: f64 = 0.05;

/// An observation recorded from task execution outcomes, retrieved at plan
/// time to bias future task prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub id: String,
    pub observation_type: String,
    pub context: String,
    pub observation: String,
    pub confidence: f64,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub last_used_at: i64,
}

impl Learning {
    pub fn new(observation_type: impl Into<String>, context: impl Into<String>, observation: impl Into<String>, tags: Vec<String>) -> Self {
        let observation_type = observation_type.into();
        let now = now_ms();
        Self {
            id: generate_id("learning", &observation_type),
            observation_type,
            context: context.into(),
            observation: observation.into(),
            confidence: 0.5,
            tags,
            created_at: now,
            last_used_at: now,
        }
    }

    /// Confidence as of `now_ms`, decayed linearly since `last_used_at`.
    pub fn effective_confidence(&self, now: i64) -> f64 {
        let elapsed = (now - self.last_used_at).max(0);
        let decay = (elapsed as f64 / DECAY_HORIZON_MS as f64).min(1.0);
        (self.confidence * (1.0 - decay)).max(0.0)
    }

    /// Record a successful reuse: bumps `confidence` and resets the decay clock.
    pub fn reinforce(&mut self) {
        self.confidence = (self.effective_confidence(now_ms()) + REINFORCEMENT_STEP).min(1.0);
        self.last_used_at = now_ms();
    }

    pub fn is_garbage(&self, now: i64) -> bool {
        self.effective_confidence(now) <= CONFIDENCE_FLOOR
    }

    pub fn tag_overlap(&self, tags: &[String]) -> usize {
        self.tags.iter().filter(|t| tags.contains(t)).count()
    }
}

impl Record for Learning {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.last_used_at
    }

    fn collection_name() -> &'static str {
        "learnings"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("observation_type".to_string(), IndexValue::String(self.observation_type.clone()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_learning_has_no_decay() {
        let learning = Learning::new("tool_preference", "bash", "prefer rg over grep", vec!["search".to_string()]);
        assert_eq!(learning.effective_confidence(learning.last_used_at), learning.confidence);
    }

    #[test]
    fn confidence_decays_fully_past_the_horizon() {
        let learning = Learning::new("tool_preference", "bash", "prefer rg over grep", vec!["search".to_string()]);
        let far_future = learning.last_used_at + DECAY_HORIZON_MS * 2;
        assert_eq!(learning.effective_confidence(far_future), 0.0);
    }

    #[test]
    fn reinforce_resets_decay_and_bumps_confidence() {
        let mut learning = Learning::new("tool_preference", "bash", "prefer rg over grep", vec!["search".to_string()]);
        let before = learning.confidence;
        learning.reinforce();
        assert!(learning.confidence > before);
        assert_eq!(learning.effective_confidence(learning.last_used_at), learning.confidence);
    }

    #[test]
    fn tag_overlap_counts_shared_tags() {
        let learning = Learning::new("x", "ctx", "obs", vec!["search".to_string(), "files".to_string()]);
        assert_eq!(learning.tag_overlap(&["files".to_string(), "other".to_string()]), 1);
        assert_eq!(learning.tag_overlap(&["nope".to_string()]), 0);
    }

    #[test]
    fn is_garbage_below_floor() {
        let mut learning = Learning::new("x", "ctx", "obs", vec![]);
        learning.confidence = 0.5;
        assert!(!learning.is_garbage(learning.last_used_at));
        let far_future = learning.last_used_at + DECAY_HORIZON_MS * 2;
        assert!(learning.is_garbage(far_future));
    }
}
