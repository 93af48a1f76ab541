//! taskorc - an autonomous task orchestrator: a daemon that decomposes goals
//! into dependency-ordered tasks, dispatches them to a pool of LLM-backed
//! agent workers through a guardrail-gated tool registry, and learns from
//! what worked.
//!
//! # Modules
//!
//! - [`domain`] - persisted entity types (Task, Goal, Approval, Plugin, Learning)
//! - [`events`] - append-only event log (C1)
//! - [`state`] - entity store actor (C2)
//! - [`guardrail`] - policy gate (C3)
//! - [`approval`] - human-in-the-loop gate queue (C4)
//! - [`sandbox`] - isolated plugin/tool execution (C5)
//! - [`tools`] - native + plugin tool registry (C6)
//! - [`pool`] - agent worker pool (C7)
//! - [`scheduler`] - the tick loop coordinating everything else (C8)
//! - [`planning`] - goal decomposition adapter (C9)
//! - [`learning`] - decaying-confidence observation store (C10)
//! - [`llm`] - LLM client trait and provider implementations
//! - [`app`] - top-level composition wiring all of the above together
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod app;
pub mod approval;
pub mod cli;
pub mod config;
pub mod domain;
pub mod events;
pub mod guardrail;
pub mod learning;
pub mod llm;
pub mod planning;
pub mod pool;
pub mod sandbox;
pub mod scheduler;
pub mod state;
pub mod tools;

pub use app::App;
pub use config::Config;
pub use domain::{Goal, GoalStatus, Priority, Task, TaskOrigin, TaskStatus};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerError, SchedulerStatus};
pub use state::StateManager;
