//! Append-only event log with size-based rotation (C1 Event Store, §4.1)

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

use super::event::Event;

/// Default segment size threshold before `Rotate` starts a new file.
pub const DEFAULT_SEGMENT_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Constraints applied by [`EventStore::tail`]. All present fields must match (AND).
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub conv_id: Option<String>,
    pub trace_id: Option<String>,
    pub act: Option<String>,
    pub since_ts: Option<i64>,
    pub until_ts: Option<i64>,
}

impl EventFilter {
    fn matches(&self, event: &Event) -> bool {
        if let Some(ref conv_id) = self.conv_id
            && event.conv_id.as_deref() != Some(conv_id.as_str())
        {
            return false;
        }
        if let Some(ref trace_id) = self.trace_id
            && event.trace_id.as_deref() != Some(trace_id.as_str())
        {
            return false;
        }
        if let Some(ref act) = self.act
            && &event.act != act
        {
            return false;
        }
        if let Some(since) = self.since_ts
            && event.ts < since
        {
            return false;
        }
        if let Some(until) = self.until_ts
            && event.ts > until
        {
            return false;
        }
        true
    }
}

struct Inner {
    segment: u32,
    segment_bytes: u64,
}

/// Durable, append-only, ordered record of everything that happens.
///
/// One self-delimited JSON record per line, one file per segment under
/// `root/events/NNNNN.jsonl`. A trailing line that fails to parse as complete
/// JSON is a torn write from a crash mid-append and is dropped by readers,
/// not treated as an error (§4.1).
pub struct EventStore {
    root: PathBuf,
    max_segment_bytes: u64,
    inner: Mutex<Inner>,
}

impl EventStore {
    /// Open (creating if necessary) an event log rooted at `path/events`.
    pub fn open(root: impl Into<PathBuf>, max_segment_bytes: u64) -> Result<Self, EventStoreError> {
        let root: PathBuf = root.into();
        let events_dir = root.join("events");
        std::fs::create_dir_all(&events_dir)
            .map_err(|e| EventStoreError::StorageUnavailable(e.to_string()))?;

        let mut highest = 0u32;
        if let Ok(entries) = std::fs::read_dir(&events_dir) {
            for entry in entries.flatten() {
                if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str())
                    && let Ok(n) = stem.parse::<u32>()
                {
                    highest = highest.max(n);
                }
            }
        }
        let size = std::fs::metadata(Self::segment_path_for(&events_dir, highest))
            .map(|m| m.len())
            .unwrap_or(0);

        debug!(?root, segment = highest, "EventStore::open: called");
        Ok(Self {
            root,
            max_segment_bytes,
            inner: Mutex::new(Inner {
                segment: highest,
                segment_bytes: size,
            }),
        })
    }

    fn events_dir(&self) -> PathBuf {
        self.root.join("events")
    }

    fn segment_path_for(events_dir: &std::path::Path, segment: u32) -> PathBuf {
        events_dir.join(format!("{:05}.jsonl", segment))
    }

    fn segment_path(&self, segment: u32) -> PathBuf {
        Self::segment_path_for(&self.events_dir(), segment)
    }

    /// Atomically append one event; durable before returning.
    pub fn append(&self, event: Event) -> Result<(), EventStoreError> {
        debug!(id = %event.id, act = %event.act, "EventStore::append: called");
        let mut inner = self.inner.lock().unwrap();
        let line = serde_json::to_string(&event)? + "\n";

        let path = self.segment_path(inner.segment);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| EventStoreError::StorageUnavailable(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| EventStoreError::StorageUnavailable(e.to_string()))?;
        file.flush().map_err(|e| EventStoreError::StorageUnavailable(e.to_string()))?;

        inner.segment_bytes += line.len() as u64;
        if inner.segment_bytes >= self.max_segment_bytes {
            inner.segment += 1;
            inner.segment_bytes = 0;
            debug!(new_segment = inner.segment, "EventStore::append: rotated");
        }
        Ok(())
    }

    /// Close the current segment and start a new one, regardless of size.
    pub fn rotate(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.segment += 1;
        inner.segment_bytes = 0;
        debug!(new_segment = inner.segment, "EventStore::rotate: called");
    }

    fn all_segments(&self) -> Vec<u32> {
        let mut segments = Vec::new();
        if let Ok(entries) = std::fs::read_dir(self.events_dir()) {
            for entry in entries.flatten() {
                if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str())
                    && let Ok(n) = stem.parse::<u32>()
                {
                    segments.push(n);
                }
            }
        }
        segments.sort_unstable();
        segments
    }

    /// Read every event across all segments, dropping any torn trailing write.
    fn read_all(&self) -> Vec<Event> {
        let mut out = Vec::new();
        for segment in self.all_segments() {
            let path = self.segment_path(segment);
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let lines: Vec<&str> = content.lines().collect();
            for (idx, line) in lines.iter().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Event>(line) {
                    Ok(event) => out.push(event),
                    Err(e) => {
                        if idx + 1 == lines.len() {
                            debug!(%e, "EventStore::read_all: dropping torn trailing write");
                        }
                    }
                }
            }
        }
        out
    }

    /// Return the most recent events matching `filter`, newest first, capped at `limit`.
    pub fn tail(&self, limit: usize, filter: &EventFilter) -> Vec<Event> {
        debug!(limit, "EventStore::tail: called");
        let mut matching: Vec<Event> = self.read_all().into_iter().filter(|e| filter.matches(e)).collect();
        matching.sort_by(|a, b| b.id.cmp(&a.id));
        matching.truncate(limit);
        matching
    }

    /// Every event ever appended, oldest first. Used by C2 replay on startup.
    pub fn replay(&self) -> Vec<Event> {
        let mut events = self.read_all();
        events.sort_by(|a, b| a.id.cmp(&b.id));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Actor;
    use tempfile::tempdir;

    #[test]
    fn append_then_tail_round_trips() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path(), DEFAULT_SEGMENT_BYTES).unwrap();
        store
            .append(Event::new(Actor::Scheduler, "task_created", serde_json::json!({"id": "t1"})))
            .unwrap();
        let tail = store.tail(10, &EventFilter::default());
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].act, "task_created");
    }

    #[test]
    fn tail_returns_newest_first() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path(), DEFAULT_SEGMENT_BYTES).unwrap();
        for act in ["a", "b", "c"] {
            store.append(Event::new(Actor::System, act, serde_json::json!({}))).unwrap();
        }
        let tail = store.tail(10, &EventFilter::default());
        assert_eq!(tail.iter().map(|e| e.act.as_str()).collect::<Vec<_>>(), vec!["c", "b", "a"]);
    }

    #[test]
    fn tail_filters_by_conv_id() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path(), DEFAULT_SEGMENT_BYTES).unwrap();
        store
            .append(Event::new(Actor::System, "a", serde_json::json!({})).with_conv("c1"))
            .unwrap();
        store
            .append(Event::new(Actor::System, "b", serde_json::json!({})).with_conv("c2"))
            .unwrap();

        let filter = EventFilter {
            conv_id: Some("c1".to_string()),
            ..Default::default()
        };
        let tail = store.tail(10, &filter);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].act, "a");
    }

    #[test]
    fn rotation_starts_new_segment_file() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path(), DEFAULT_SEGMENT_BYTES).unwrap();
        store.append(Event::new(Actor::System, "a", serde_json::json!({}))).unwrap();
        store.rotate();
        store.append(Event::new(Actor::System, "b", serde_json::json!({}))).unwrap();

        assert!(store.events_dir().join("00000.jsonl").exists());
        assert!(store.events_dir().join("00001.jsonl").exists());
        assert_eq!(store.tail(10, &EventFilter::default()).len(), 2);
    }

    #[test]
    fn small_segment_threshold_rotates_automatically() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path(), 10).unwrap();
        for act in ["a", "b", "c"] {
            store.append(Event::new(Actor::System, act, serde_json::json!({}))).unwrap();
        }
        assert!(store.all_segments().len() > 1);
    }

    #[test]
    fn torn_trailing_write_is_dropped_not_fatal() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path(), DEFAULT_SEGMENT_BYTES).unwrap();
        store.append(Event::new(Actor::System, "a", serde_json::json!({}))).unwrap();

        let path = store.events_dir().join("00000.jsonl");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\": \"broken").unwrap();

        let reopened = EventStore::open(dir.path(), DEFAULT_SEGMENT_BYTES).unwrap();
        let tail = reopened.tail(10, &EventFilter::default());
        assert_eq!(tail.len(), 1);
    }

    #[test]
    fn replay_returns_oldest_first() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path(), DEFAULT_SEGMENT_BYTES).unwrap();
        for act in ["a", "b", "c"] {
            store.append(Event::new(Actor::System, act, serde_json::json!({}))).unwrap();
        }
        let replayed = store.replay();
        assert_eq!(replayed.iter().map(|e| e.act.as_str()).collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }
}
