//! Append-only event log: the single source of truth for history (C1, §4.1).
//!
//! Entity writes in [`crate::state`] go through this store first ("write-ahead")
//! before updating the in-memory entity map, so a crash between the two leaves
//! the event log as the durable record to replay from.

mod event;
mod store;

pub use event::{Actor, Event, next_event_id};
pub use store::{DEFAULT_SEGMENT_BYTES, EventFilter, EventStore, EventStoreError};
