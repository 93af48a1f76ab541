//! State manager messages
//!
//! Commands and responses for the entity-store actor pattern (C2, §4.2).

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Goal, IllegalTransition, Task};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    StoreError(String),

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    #[error("channel error")]
    ChannelError,
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // Task operations
    CreateTask {
        task: Task,
        reply: oneshot::Sender<StateResponse<String>>,
    },
    GetTask {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Task>>>,
    },
    UpdateTask {
        task: Task,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ListTasks {
        status_filter: Option<String>,
        goal_filter: Option<String>,
        reply: oneshot::Sender<StateResponse<Vec<Task>>>,
    },
    DeleteTask {
        id: String,
        reply: oneshot::Sender<StateResponse<()>>,
    },

    // Goal operations
    CreateGoal {
        goal: Goal,
        reply: oneshot::Sender<StateResponse<String>>,
    },
    GetGoal {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Goal>>>,
    },
    UpdateGoal {
        goal: Goal,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ListGoals {
        status_filter: Option<String>,
        reply: oneshot::Sender<StateResponse<Vec<Goal>>>,
    },

    // Maintenance
    Sync {
        reply: oneshot::Sender<StateResponse<()>>,
    },
    RebuildIndexes {
        reply: oneshot::Sender<StateResponse<usize>>,
    },

    Shutdown,
}
