//! Entity store actor (C2, §4.2): owns the persisted `Task`/`Goal`/`Approval`
//! collections behind a channel, write-ahead logged through the event store.

mod manager;
mod messages;

pub use manager::{StateEvent, StateManager, read_state_version};
pub use messages::{StateCommand, StateError, StateResponse};
