//! Messages exchanged between the pool actor, its workers, and callers (C7, §4.7).

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::domain::{AttemptRecord, Learning, Priority};

/// A task handed to a worker, with its learning-injected prompt context
/// already attached (§4.8 step 5 does the attaching; the pool just carries it).
/// `cancel` is flipped by the pool on a cancel request and polled by the
/// worker at each cooperative checkpoint (§5 Cancellation and timeouts).
#[derive(Debug, Clone)]
pub struct Assignment {
    pub task_id: String,
    pub description: String,
    pub priority: Priority,
    pub learnings: Vec<Learning>,
    pub attempt_no: u32,
    pub cancel: Arc<AtomicBool>,
}

/// Sent from the pool actor into a worker's private channel.
pub enum WorkerCommand {
    Run(Assignment),
    Shutdown,
}

/// Sent from a worker back to the pool actor when it finishes (or fails) a task.
#[derive(Debug, Clone)]
pub enum WorkerOutcome {
    Completed {
        task_id: String,
        worker_id: usize,
        attempt: AttemptRecord,
    },
    Failed {
        task_id: String,
        worker_id: usize,
        attempt: AttemptRecord,
        transient: bool,
    },
    /// A worker crashed or its channel closed mid-call; the pool has already
    /// either re-queued the task at the head of its priority class or, if
    /// `max_attempts` crash-retries were exhausted, marked it terminally here.
    Crashed {
        task_id: String,
        worker_id: usize,
        requeued: bool,
    },
    /// A cancel request reached the worker handling this task (§4.8 Cancellation).
    Cancelled { task_id: String, worker_id: usize },
}

/// Per-worker status for `Status()` (§4.7 contract, §6 `Status()`).
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub worker_id: usize,
    pub busy: bool,
    pub current_task: Option<String>,
    pub completed_count: u64,
}

/// `Status()` response: per-worker state plus queue depth.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub workers: Vec<WorkerStatus>,
    pub queue_length: usize,
}

/// Commands accepted by the pool actor.
pub enum PoolCommand {
    Submit {
        assignment: Assignment,
        reply: tokio::sync::oneshot::Sender<String>,
    },
    Status {
        reply: tokio::sync::oneshot::Sender<PoolStatus>,
    },
    /// Cooperatively cancel a task if it is currently running; a no-op if it
    /// isn't (the caller, the scheduler, already checked the task was `active`).
    Cancel {
        task_id: String,
        reply: tokio::sync::oneshot::Sender<bool>,
    },
    Shutdown {
        grace: std::time::Duration,
        reply: tokio::sync::oneshot::Sender<()>,
    },
}
