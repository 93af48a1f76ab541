//! Goal decomposition adapter (C9, §4.9).
//!
//! ```text
//! Goal (draft) --decompose()--> TaskSpec[] --validated--> Tasks (goal active)
//! ```
//!
//! [`GoalDecomposer`] asks the LLM collaborator for a dependency-ordered task
//! list, validates the response structurally, and hands the result back to
//! the caller (the scheduler's goal-activation step, §4.8) to persist through
//! the entity store.

mod decomposer;

pub use decomposer::{Complexity, DecomposeError, DecomposerConfig, GoalDecomposer, TaskSpec};
