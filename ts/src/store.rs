use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::RwLock;

use serde_json::Value;
use tracing::debug;

use crate::{Filter, Record, StoreError};

const TOMBSTONE_KEY: &str = "_tombstone";

/// A directory of JSONL-backed collections, one file per `Record` type.
///
/// Each collection is loaded into memory lazily on first access and kept there;
/// writes append to the file and update the in-memory copy. `sync` compacts a
/// collection's file down to its latest snapshot per id, dropping history - the
/// JSONL file itself is the durability mechanism, the in-memory map is the index.
pub struct Store {
    root: PathBuf,
    collections: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl Store {
    /// Open (creating if necessary) a store rooted at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = path.into();
        debug!(?root, "Store::open: called");
        std::fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.display().to_string(),
            source,
        })?;
        Ok(Self {
            root,
            collections: RwLock::new(HashMap::new()),
        })
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{collection}.jsonl"))
    }

    fn ensure_loaded(&self, collection: &str) -> Result<(), StoreError> {
        if self.collections.read().unwrap().contains_key(collection) {
            return Ok(());
        }
        let loaded = self.load_collection(collection)?;
        self.collections.write().unwrap().insert(collection.to_string(), loaded);
        Ok(())
    }

    /// Replay a collection's JSONL file, keeping the latest write per id.
    /// A trailing line that fails to parse (a torn write from a crash mid-append)
    /// is dropped rather than treated as an error.
    fn load_collection(&self, collection: &str) -> Result<HashMap<String, Value>, StoreError> {
        let path = self.collection_path(collection);
        debug!(?path, "Store::load_collection: called");
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut out: HashMap<String, Value> = HashMap::new();
        let lines: Vec<&str> = content.lines().collect();
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(value) => {
                    let Some(id) = value.get("id").and_then(Value::as_str) else {
                        continue;
                    };
                    if value.get(TOMBSTONE_KEY).is_some() {
                        out.remove(id);
                    } else {
                        out.insert(id.to_string(), value);
                    }
                }
                Err(e) => {
                    // Only the final line of a file can be a torn write; anything
                    // earlier that fails to parse is real corruption.
                    if idx + 1 == lines.len() {
                        debug!(%e, "Store::load_collection: dropping torn trailing write");
                    } else {
                        return Err(StoreError::Serde(e));
                    }
                }
            }
        }
        Ok(out)
    }

    fn append_line(&self, collection: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.collection_path(collection);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let line = serde_json::to_string(value)? + "\n";
        file.write_all(line.as_bytes()).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        file.flush().map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    fn write_record<T: Record>(&self, record: &T) -> Result<(), StoreError> {
        let collection = T::collection_name();
        self.ensure_loaded(collection)?;
        let value = serde_json::to_value(record)?;
        self.append_line(collection, &value)?;
        self.collections
            .write()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .insert(record.id().to_string(), value);
        Ok(())
    }

    /// Persist a new record. Returns the record's id.
    pub fn create<T: Record>(&self, record: T) -> Result<String, StoreError> {
        debug!(id = record.id(), collection = T::collection_name(), "Store::create: called");
        let id = record.id().to_string();
        self.write_record(&record)?;
        Ok(id)
    }

    /// Overwrite the persisted record sharing this id with a new snapshot.
    pub fn update<T: Record>(&self, record: T) -> Result<(), StoreError> {
        debug!(id = record.id(), collection = T::collection_name(), "Store::update: called");
        self.write_record(&record)
    }

    /// Fetch one record by id.
    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>, StoreError> {
        let collection = T::collection_name();
        self.ensure_loaded(collection)?;
        let guard = self.collections.read().unwrap();
        let Some(value) = guard.get(collection).and_then(|c| c.get(id)) else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(value.clone())?))
    }

    /// List every record in the collection matching all of `filters`.
    pub fn list<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>, StoreError> {
        let collection = T::collection_name();
        self.ensure_loaded(collection)?;
        let guard = self.collections.read().unwrap();
        let Some(entries) = guard.get(collection) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for value in entries.values() {
            let record: T = serde_json::from_value(value.clone())?;
            let fields = record.indexed_fields();
            if filters.iter().all(|f| f.matches(&fields)) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Remove a record by id (appends a tombstone; does not rewrite history).
    pub fn delete<T: Record>(&self, id: &str) -> Result<(), StoreError> {
        let collection = T::collection_name();
        debug!(%id, %collection, "Store::delete: called");
        self.ensure_loaded(collection)?;
        let tombstone = serde_json::json!({ "id": id, TOMBSTONE_KEY: true });
        self.append_line(collection, &tombstone)?;
        if let Some(c) = self.collections.write().unwrap().get_mut(collection) {
            c.remove(id);
        }
        Ok(())
    }

    /// Rewrite a collection's file down to its current in-memory snapshot,
    /// dropping superseded history. Returns the number of records retained.
    pub fn sync(&self) -> Result<(), StoreError> {
        debug!("Store::sync: called");
        let guard = self.collections.read().unwrap();
        for (collection, entries) in guard.iter() {
            let path = self.collection_path(collection);
            let mut content = String::new();
            for value in entries.values() {
                content.push_str(&serde_json::to_string(value)?);
                content.push('\n');
            }
            std::fs::write(&path, content).map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Force a collection to be reloaded from disk, discarding the in-memory copy.
    pub fn rebuild_indexes<T: Record>(&self) -> Result<usize, StoreError> {
        let collection = T::collection_name();
        debug!(%collection, "Store::rebuild_indexes: called");
        let loaded = self.load_collection(collection)?;
        let count = loaded.len();
        self.collections.write().unwrap().insert(collection.to_string(), loaded);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Filter, IndexValue};
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Widget {
        id: String,
        status: String,
        updated_at: i64,
    }

    impl Record for Widget {
        fn id(&self) -> &str {
            &self.id
        }
        fn updated_at(&self) -> i64 {
            self.updated_at
        }
        fn collection_name() -> &'static str {
            "widgets"
        }
        fn indexed_fields(&self) -> HashMap<String, IndexValue> {
            let mut m = HashMap::new();
            m.insert("status".to_string(), IndexValue::String(self.status.clone()));
            m
        }
    }

    #[test]
    fn create_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let w = Widget {
            id: "w1".to_string(),
            status: "pending".to_string(),
            updated_at: 1,
        };
        store.create(w.clone()).unwrap();

        let fetched: Widget = store.get::<Widget>("w1").unwrap().unwrap();
        assert_eq!(fetched, w);
    }

    #[test]
    fn update_overwrites_latest_snapshot() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        store
            .create(Widget {
                id: "w1".to_string(),
                status: "pending".to_string(),
                updated_at: 1,
            })
            .unwrap();
        store
            .update(Widget {
                id: "w1".to_string(),
                status: "active".to_string(),
                updated_at: 2,
            })
            .unwrap();

        let fetched = store.get::<Widget>("w1").unwrap().unwrap();
        assert_eq!(fetched.status, "active");
    }

    #[test]
    fn list_filters_by_indexed_field() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        for (id, status) in [("w1", "pending"), ("w2", "active"), ("w3", "pending")] {
            store
                .create(Widget {
                    id: id.to_string(),
                    status: status.to_string(),
                    updated_at: 1,
                })
                .unwrap();
        }

        let pending = store
            .list::<Widget>(&[Filter::eq("status", IndexValue::String("pending".to_string()))])
            .unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn delete_removes_from_subsequent_list() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        store
            .create(Widget {
                id: "w1".to_string(),
                status: "pending".to_string(),
                updated_at: 1,
            })
            .unwrap();
        store.delete::<Widget>("w1").unwrap();

        assert!(store.get::<Widget>("w1").unwrap().is_none());
    }

    #[test]
    fn reopening_store_replays_jsonl_file() {
        let dir = tempdir().unwrap();
        {
            let store = Store::open(dir.path()).unwrap();
            store
                .create(Widget {
                    id: "w1".to_string(),
                    status: "pending".to_string(),
                    updated_at: 1,
                })
                .unwrap();
            store
                .update(Widget {
                    id: "w1".to_string(),
                    status: "active".to_string(),
                    updated_at: 2,
                })
                .unwrap();
        }

        let reopened = Store::open(dir.path()).unwrap();
        let fetched = reopened.get::<Widget>("w1").unwrap().unwrap();
        assert_eq!(fetched.status, "active");
    }

    #[test]
    fn torn_trailing_write_is_dropped_not_fatal() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store
            .create(Widget {
                id: "w1".to_string(),
                status: "pending".to_string(),
                updated_at: 1,
            })
            .unwrap();

        let path = dir.path().join("widgets.jsonl");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\": \"w2\", \"status\": \"acti").unwrap();

        let reopened = Store::open(dir.path()).unwrap();
        assert!(reopened.get::<Widget>("w1").unwrap().is_some());
        assert!(reopened.get::<Widget>("w2").unwrap().is_none());
    }

    #[test]
    fn sync_compacts_file_to_current_snapshot() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        for i in 0..5 {
            store
                .update(Widget {
                    id: "w1".to_string(),
                    status: "pending".to_string(),
                    updated_at: i,
                })
                .unwrap();
        }
        store.sync().unwrap();

        let path = dir.path().join("widgets.jsonl");
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn rebuild_indexes_reloads_from_disk() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store
            .create(Widget {
                id: "w1".to_string(),
                status: "pending".to_string(),
                updated_at: 1,
            })
            .unwrap();

        let count = store.rebuild_indexes::<Widget>().unwrap();
        assert_eq!(count, 1);
    }
}
