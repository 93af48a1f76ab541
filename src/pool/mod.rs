//! Agent Worker Pool: a fixed-size pool of long-lived workers that run LLM
//! tool-use conversations to completion (C7, §4.7). Submitted assignments are
//! dispatched FIFO-within-priority; crashed workers are respawned and their
//! in-flight task re-queued up to a bounded number of crash-retries. Only the
//! scheduler (C8) may act on a [`WorkerOutcome`] against C2 — this module
//! never mutates task/goal state itself.

mod messages;
mod pool;
mod worker;

pub use messages::{PoolCommand, PoolStatus, WorkerCommand, WorkerOutcome, WorkerStatus};

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::config::PoolConfig;
use crate::domain::{Learning, Priority};
use crate::events::EventStore;
use crate::llm::LlmClient;
use crate::tools::ToolRegistry;

use messages::Assignment;
use pool::PoolActor;

/// Handle to send commands to the Agent Worker Pool actor, mirroring
/// [`crate::state::StateManager`]'s spawn-and-clone handle pattern.
#[derive(Clone)]
pub struct AgentWorkerPool {
    tx: mpsc::Sender<PoolCommand>,
}

impl AgentWorkerPool {
    /// Spawn the pool's supervisory task, which in turn spawns `config.size`
    /// workers, and return a handle to it along with the outcome receiver the
    /// scheduler's "drain completions" tick step (§4.8 step 1) polls — this is
    /// the only channel through which a [`WorkerOutcome`] leaves the pool.
    pub fn spawn(
        config: PoolConfig,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        events: Arc<EventStore>,
        worktree: std::path::PathBuf,
    ) -> (Self, mpsc::Receiver<WorkerOutcome>) {
        debug!(size = config.size, "AgentWorkerPool::spawn: called");
        let (tx, rx) = mpsc::channel(64);
        let (outcome_tx, outcome_rx) = mpsc::channel(64);
        let actor = PoolActor::new(config, llm, tools, events, worktree, outcome_tx);
        tokio::spawn(actor.run(rx));
        (Self { tx }, outcome_rx)
    }

    /// Submit a task for execution, attaching its learning context. Returns
    /// a cancellation flag the caller (the scheduler) can flip via
    /// [`AgentWorkerPool::cancel`]; `None` only if the pool has shut down.
    pub async fn submit(&self, task_id: String, description: String, priority: Priority, learnings: Vec<Learning>, attempt_no: u32) -> Option<Arc<AtomicBool>> {
        let cancel = Arc::new(AtomicBool::new(false));
        let assignment = Assignment {
            task_id,
            description,
            priority,
            learnings,
            attempt_no,
            cancel: Arc::clone(&cancel),
        };
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.tx.send(PoolCommand::Submit { assignment, reply }).await.ok()?;
        rx.await.ok()?;
        Some(cancel)
    }

    pub async fn status(&self) -> Option<PoolStatus> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.tx.send(PoolCommand::Status { reply }).await.ok()?;
        rx.await.ok()
    }

    pub async fn cancel(&self, task_id: String) -> bool {
        let (reply, rx) = tokio::sync::oneshot::channel();
        if self.tx.send(PoolCommand::Cancel { task_id, reply }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn shutdown(&self, grace: Duration) {
        let (reply, rx) = tokio::sync::oneshot::channel();
        if self.tx.send(PoolCommand::Shutdown { grace, reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}
