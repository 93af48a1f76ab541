//! Generic persistent record store.
//!
//! Each collection is a single JSONL file (one record per line, newest write wins
//! on replay) plus an in-memory secondary index rebuilt from the file on open.
//! Record types opt in by implementing [`Record`] and declaring which fields they
//! want indexed; callers query those fields through [`Filter`] without the store
//! knowing anything about the record's shape beyond its `serde_json::Value` form.

mod error;
mod filter;
mod store;

pub use error::StoreError;
pub use filter::{Filter, FilterOp, IndexValue};
pub use store::Store;

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Serialize, de::DeserializeOwned};

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A type that can be persisted in a [`Store`].
///
/// `collection_name()` picks the JSONL file; `id()` and `updated_at()` let the
/// store dedupe on replay (the last record with a given id wins); `indexed_fields()`
/// declares the secondary index the store maintains for `List`/`Filter` queries.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn updated_at(&self) -> i64;
    fn collection_name() -> &'static str;
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }
}
