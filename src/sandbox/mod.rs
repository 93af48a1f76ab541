//! Sandbox Runtime: isolated worker processes hosting plugin/tool code,
//! with a mediated host API (C5, §4.5).

mod error;
mod message;
mod runtime;
mod worker;

pub use error::SandboxError;
pub use message::{HostToWorker, WorkerToHost};
pub use runtime::{HostApi, HostApiRegistry, LearningApi, MessageApi, ScheduleApi};
pub use worker::{DEFAULT_CALL_TIMEOUT, DEFAULT_LOAD_TIMEOUT, DEFAULT_MEMORY_CEILING_BYTES, SandboxWorker, WorkerState};
