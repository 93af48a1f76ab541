//! Domain types for the orchestrator (§3 Data Model).
//!
//! `Task`, `Goal`, and `Approval` are the three entity kinds tracked by the
//! entity store (C2); all implement the `Record` trait for `taskstore`
//! persistence. `Priority` orders task dispatch; `id` generates the
//! time-ordered ids shared by every entity kind.

mod approval;
mod goal;
mod id;
mod learning;
mod plugin;
mod priority;
mod task;

pub use approval::{AlreadyDecided, Approval, ApprovalLevel, ApprovalType, Decision};
pub use goal::{Goal, GoalStatus};
pub use id::{DomainId, IdResolver, generate_id};
pub use learning::{CONFIDENCE_FLOOR, DECAY_HORIZON_MS, Learning, REINFORCEMENT_STEP};
pub use plugin::{Plugin, PluginBindingError, PluginLifecycle};
pub use priority::Priority;
pub use task::{AttemptRecord, IllegalTransition, Task, TaskOrigin, TaskStatus};

// Re-export taskstore types for convenience
pub use taskstore::{Filter, FilterOp, IndexValue, Record, Store, now_ms};
