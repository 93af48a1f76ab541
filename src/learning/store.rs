//! Learning Store: `Record`/`Query` over decaying-confidence observations
//! (C10, §4.10)

use tracing::debug;

use crate::domain::{Learning, Record, Store};

#[derive(Debug, thiserror::Error)]
pub enum LearningError {
    #[error(transparent)]
    Store(#[from] taskstore::StoreError),
}

/// Retrieval and reinforcement of [`Learning`] observations. Read-heavy;
/// writes (reinforce/garbage-collect) are serialized through `&mut self`
/// methods the way §5 describes the store's single-updater discipline.
pub struct LearningStore {
    store: Store,
}

impl LearningStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn record(&self, observation: Learning) -> Result<String, LearningError> {
        debug!(id = %observation.id, tags = ?observation.tags, "LearningStore::record: called");
        Ok(self.store.create(observation)?)
    }

    /// Observations with at least one overlapping tag and effective confidence
    /// at or above `min_confidence`, ranked by recency × confidence descending.
    pub fn query(&self, tags: &[String], min_confidence: f64) -> Result<Vec<Learning>, LearningError> {
        let now = taskstore::now_ms();
        let mut matches: Vec<Learning> = self
            .store
            .list::<Learning>(&[])?
            .into_iter()
            .filter(|l| l.tag_overlap(tags) > 0 && l.effective_confidence(now) >= min_confidence)
            .collect();

        matches.sort_by(|a, b| {
            let score_a = recency_score(a, now) * a.effective_confidence(now);
            let score_b = recency_score(b, now) * b.effective_confidence(now);
            score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(matches)
    }

    /// Top-K learnings for a task's tags, used by the scheduler's learning
    /// injection step (§4.8 step 5).
    pub fn top_k(&self, tags: &[String], min_confidence: f64, k: usize) -> Result<Vec<Learning>, LearningError> {
        let mut matches = self.query(tags, min_confidence)?;
        matches.truncate(k);
        Ok(matches)
    }

    pub fn reinforce(&self, id: &str) -> Result<(), LearningError> {
        if let Some(mut learning) = self.store.get::<Learning>(id)? {
            learning.reinforce();
            self.store.update(learning)?;
        }
        Ok(())
    }

    /// Remove observations whose effective confidence has decayed to the floor.
    pub fn garbage_collect(&self) -> Result<usize, LearningError> {
        let now = taskstore::now_ms();
        let mut removed = 0;
        for learning in self.store.list::<Learning>(&[])? {
            if learning.is_garbage(now) {
                self.store.delete::<Learning>(learning.id())?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "LearningStore::garbage_collect: removed decayed observations");
        }
        Ok(removed)
    }
}

/// Recency weight: 1.0 for a just-used observation, decaying linearly to 0
/// over the same horizon confidence decays over.
fn recency_score(learning: &Learning, now: i64) -> f64 {
    let elapsed = (now - learning.last_used_at).max(0);
    (1.0 - (elapsed as f64 / crate::domain::DECAY_HORIZON_MS as f64)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (LearningStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let inner = Store::open(dir.path()).unwrap();
        (LearningStore::new(inner), dir)
    }

    #[test]
    fn query_requires_tag_overlap() {
        let (store, _dir) = store();
        store
            .record(Learning::new("x", "ctx", "prefer rg", vec!["search".to_string()]))
            .unwrap();
        assert!(store.query(&["unrelated".to_string()], 0.0).unwrap().is_empty());
        assert_eq!(store.query(&["search".to_string()], 0.0).unwrap().len(), 1);
    }

    #[test]
    fn query_filters_by_min_confidence() {
        let (store, _dir) = store();
        store
            .record(Learning::new("x", "ctx", "prefer rg", vec!["search".to_string()]))
            .unwrap();
        assert!(store.query(&["search".to_string()], 0.9).unwrap().is_empty());
        assert_eq!(store.query(&["search".to_string()], 0.1).unwrap().len(), 1);
    }

    #[test]
    fn reinforce_increases_effective_confidence() {
        let (store, _dir) = store();
        let id = store
            .record(Learning::new("x", "ctx", "prefer rg", vec!["search".to_string()]))
            .unwrap();
        let before = store.query(&["search".to_string()], 0.0).unwrap()[0].confidence;
        store.reinforce(&id).unwrap();
        let after = store.query(&["search".to_string()], 0.0).unwrap()[0].confidence;
        assert!(after > before);
    }

    #[test]
    fn garbage_collect_removes_fully_decayed_entries() {
        let (store, _dir) = store();
        let mut stale = Learning::new("x", "ctx", "old", vec!["search".to_string()]);
        stale.last_used_at -= crate::domain::DECAY_HORIZON_MS * 2;
        store.record(stale).unwrap();
        store
            .record(Learning::new("x", "ctx", "fresh", vec!["search".to_string()]))
            .unwrap();

        let removed = store.garbage_collect().unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.query(&["search".to_string()], 0.0).unwrap().len(), 1);
    }

    #[test]
    fn top_k_truncates_results() {
        let (store, _dir) = store();
        for i in 0..5 {
            store
                .record(Learning::new("x", "ctx", format!("obs {i}"), vec!["search".to_string()]))
                .unwrap();
        }
        assert_eq!(store.top_k(&["search".to_string()], 0.0, 2).unwrap().len(), 2);
    }
}
