//! Agent Worker Pool actor (C7, §4.7).
//!
//! Owns `size` long-lived workers and a FIFO-within-priority submit queue.
//! Workers run inside a `JoinSet` so a panic surfaces as a `JoinError` rather
//! than silently vanishing; the pool then re-queues the in-flight task at the
//! head of its priority class up to `max_attempts` pool-level crash-retries
//! before giving up on it and respawns a replacement worker with backoff.
//! Only the scheduler (C8) may act on `WorkerOutcome`s against C2 — this
//! actor just produces them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{Id, JoinSet};
use tracing::{info, warn};

use crate::config::PoolConfig;
use crate::domain::Priority;
use crate::events::EventStore;
use crate::llm::LlmClient;
use crate::tools::ToolRegistry;

use super::messages::{Assignment, PoolCommand, PoolStatus, WorkerCommand, WorkerOutcome, WorkerStatus};
use super::worker::run_worker;

struct Slot {
    command_tx: mpsc::Sender<WorkerCommand>,
    current: Option<Assignment>,
    completed_count: u64,
}

/// C7: spawns and supervises `PoolConfig::size` workers, FIFO-within-priority
/// queue, crash recovery with bounded exponential respawn backoff. Driven
/// from its own task by [`super::AgentWorkerPool::spawn`]; callers only ever
/// see the channel-backed handle in `mod.rs`.
pub(super) struct PoolActor {
    config: PoolConfig,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    events: Arc<EventStore>,
    worktree: std::path::PathBuf,
    slots: Vec<Slot>,
    joinset: JoinSet<()>,
    task_ids: HashMap<Id, usize>,
    outcome_tx: mpsc::Sender<WorkerOutcome>,
    outcome_rx: mpsc::Receiver<WorkerOutcome>,
    /// Forwards every outcome on to the scheduler's drain-completions step
    /// (§4.8 step 1) — the only place a `WorkerOutcome` is allowed to act on C2.
    forward_tx: mpsc::Sender<WorkerOutcome>,
    queue: HashMap<Priority, VecDeque<Assignment>>,
    cancel_flags: HashMap<String, Arc<AtomicBool>>,
    /// Crash-retry count keyed by task id, surviving across respawns of
    /// whichever worker slot ends up running the requeued task next.
    crash_counts: HashMap<String, u32>,
}

const PRIORITY_ORDER: [Priority; 4] = [Priority::Critical, Priority::High, Priority::Medium, Priority::Low];

impl PoolActor {
    pub(super) fn new(
        config: PoolConfig,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        events: Arc<EventStore>,
        worktree: std::path::PathBuf,
        forward_tx: mpsc::Sender<WorkerOutcome>,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::channel(config.size.max(1) * 4);
        let mut pool = Self {
            config,
            llm,
            tools,
            events,
            worktree,
            slots: Vec::new(),
            joinset: JoinSet::new(),
            task_ids: HashMap::new(),
            outcome_tx,
            outcome_rx,
            forward_tx,
            queue: HashMap::new(),
            cancel_flags: HashMap::new(),
            crash_counts: HashMap::new(),
        };
        for id in 0..pool.config.size {
            pool.spawn_slot(id);
        }
        pool
    }

    fn spawn_slot(&mut self, worker_id: usize) {
        let (command_tx, command_rx) = mpsc::channel(4);
        let abort_handle = self.joinset.spawn(run_worker(
            worker_id,
            command_rx,
            self.outcome_tx.clone(),
            Arc::clone(&self.llm),
            Arc::clone(&self.tools),
            Arc::clone(&self.events),
            self.worktree.clone(),
        ));
        self.task_ids.insert(abort_handle.id(), worker_id);
        let slot = Slot {
            command_tx,
            current: None,
            completed_count: 0,
        };
        if worker_id < self.slots.len() {
            self.slots[worker_id] = slot;
        } else {
            self.slots.push(slot);
        }
    }

    fn enqueue(&mut self, assignment: Assignment) {
        self.queue.entry(assignment.priority).or_default().push_back(assignment);
    }

    /// Requeue at the head of the task's priority class (§4.7 crash recovery).
    fn requeue_front(&mut self, assignment: Assignment) {
        self.queue.entry(assignment.priority).or_default().push_front(assignment);
    }

    fn next_queued(&mut self) -> Option<Assignment> {
        for priority in PRIORITY_ORDER {
            if let Some(q) = self.queue.get_mut(&priority)
                && let Some(item) = q.pop_front()
            {
                return Some(item);
            }
        }
        None
    }

    fn idle_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.current.is_none())
    }

    /// Hand queued work to any idle worker. Called after submit, after a
    /// worker finishes, and after a crashed worker's replacement comes up.
    fn dispatch_ready(&mut self) {
        while let Some(slot_id) = self.idle_slot() {
            let Some(assignment) = self.next_queued() else { break };
            let command_tx = self.slots[slot_id].command_tx.clone();
            self.slots[slot_id].current = Some(assignment.clone());
            tokio::spawn(async move {
                let _ = command_tx.send(WorkerCommand::Run(assignment)).await;
            });
        }
    }

    fn queue_len(&self) -> usize {
        self.queue.values().map(|q| q.len()).sum()
    }

    /// Drives the pool: services `PoolCommand`s, worker outcomes, and worker
    /// crashes until the command channel closes or `Shutdown` is handled.
    pub(super) async fn run(mut self, mut commands: mpsc::Receiver<PoolCommand>) {
        loop {
            tokio::select! {
                Some(command) = commands.recv() => {
                    if self.handle_command(command).await {
                        break;
                    }
                }
                Some(outcome) = self.outcome_rx.recv() => {
                    self.handle_outcome(outcome).await;
                }
                Some(result) = self.joinset.join_next_with_id(), if !self.joinset.is_empty() => {
                    self.handle_join(result).await;
                }
                else => break,
            }
        }
    }

    async fn handle_command(&mut self, command: PoolCommand) -> bool {
        match command {
            PoolCommand::Submit { assignment, reply } => {
                let task_id = assignment.task_id.clone();
                self.cancel_flags.insert(task_id.clone(), Arc::clone(&assignment.cancel));
                self.enqueue(assignment);
                self.dispatch_ready();
                let _ = reply.send(task_id);
                false
            }
            PoolCommand::Status { reply } => {
                let workers = self
                    .slots
                    .iter()
                    .enumerate()
                    .map(|(worker_id, s)| WorkerStatus {
                        worker_id,
                        busy: s.current.is_some(),
                        current_task: s.current.as_ref().map(|a| a.task_id.clone()),
                        completed_count: s.completed_count,
                    })
                    .collect();
                let _ = reply.send(PoolStatus {
                    workers,
                    queue_length: self.queue_len(),
                });
                false
            }
            PoolCommand::Cancel { task_id, reply } => {
                let cancelled = if let Some(flag) = self.cancel_flags.get(&task_id) {
                    flag.store(true, Ordering::SeqCst);
                    true
                } else {
                    false
                };
                let _ = reply.send(cancelled);
                false
            }
            PoolCommand::Shutdown { grace, reply } => {
                self.shutdown(grace).await;
                let _ = reply.send(());
                true
            }
        }
    }

    async fn handle_outcome(&mut self, outcome: WorkerOutcome) {
        match &outcome {
            WorkerOutcome::Completed { task_id, worker_id, .. } => {
                self.cancel_flags.remove(task_id);
                self.crash_counts.remove(task_id);
                if let Some(slot) = self.slots.get_mut(*worker_id) {
                    slot.current = None;
                    slot.completed_count += 1;
                }
                self.dispatch_ready();
            }
            WorkerOutcome::Failed { task_id, worker_id, .. } | WorkerOutcome::Cancelled { task_id, worker_id } => {
                self.cancel_flags.remove(task_id);
                self.crash_counts.remove(task_id);
                if let Some(slot) = self.slots.get_mut(*worker_id) {
                    slot.current = None;
                }
                self.dispatch_ready();
            }
            // A worker only emits this itself if it observes another worker's
            // crash, which doesn't happen in this design; crashes are caught
            // by `handle_join` instead. Kept so the variant has a consumer.
            WorkerOutcome::Crashed { .. } => {
                self.dispatch_ready();
            }
        }
        let _ = self.forward_tx.send(outcome).await;
    }

    /// A worker task ended without going through `WorkerCommand::Shutdown`:
    /// either it panicked (`Err`), or its loop exited some other way. Either
    /// way the slot is dead and must be replaced.
    async fn handle_join(&mut self, result: Result<(Id, ()), tokio::task::JoinError>) {
        let (join_id, panicked) = match result {
            Ok((id, ())) => (id, false),
            Err(err) => (err.id(), true),
        };
        let Some(worker_id) = self.task_ids.remove(&join_id) else { return };
        if !panicked {
            return;
        }

        let assignment = self.slots.get_mut(worker_id).and_then(|s| s.current.take());
        if let Some(assignment) = assignment {
            let task_id = assignment.task_id.clone();
            let count = {
                let entry = self.crash_counts.entry(task_id.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            if count >= self.config.max_attempts {
                info!(worker_id, task_id, count, "AgentWorkerPool::handle_join: crash-retry cap exhausted, failing task");
                self.cancel_flags.remove(&task_id);
                self.crash_counts.remove(&task_id);
                let _ = self.events.append(crate::events::Event::new(
                    crate::events::Actor::System,
                    "task.crash_exhausted",
                    serde_json::json!({"task_id": task_id, "worker_id": worker_id, "attempts": count}),
                ));
                let _ = self.outcome_tx.try_send(WorkerOutcome::Crashed {
                    task_id,
                    worker_id,
                    requeued: false,
                });
            } else {
                warn!(worker_id, task_id, count, "AgentWorkerPool::handle_join: worker crashed, requeuing at head of priority class");
                let _ = self.events.append(crate::events::Event::new(
                    crate::events::Actor::System,
                    "task.crash_requeued",
                    serde_json::json!({"task_id": task_id, "worker_id": worker_id, "attempts": count}),
                ));
                self.requeue_front(assignment);
            }
        }

        self.respawn(worker_id, panicked).await;
        self.dispatch_ready();
    }

    /// Respawns a dead worker after a backoff that doubles per crash, capped
    /// at `respawn_backoff_max_ms` (§5 crash recovery).
    async fn respawn(&mut self, worker_id: usize, after_crash: bool) {
        if after_crash {
            let exponent = self.crash_counts.values().copied().max().unwrap_or(1).min(16);
            let backoff = self.config.respawn_backoff_ms.saturating_mul(1u64 << exponent).min(self.config.respawn_backoff_max_ms);
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
        self.spawn_slot(worker_id);
    }

    async fn shutdown(&mut self, grace: Duration) {
        for slot in &self.slots {
            let _ = slot.command_tx.send(WorkerCommand::Shutdown).await;
        }
        let sleep = tokio::time::sleep(grace);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                result = self.joinset.join_next() => {
                    if result.is_none() {
                        break;
                    }
                }
            }
        }
        if !self.joinset.is_empty() {
            warn!("AgentWorkerPool::shutdown: hard-killing workers past grace period");
            self.joinset.abort_all();
            while self.joinset.join_next().await.is_some() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(p: Priority, id: &str) -> Assignment {
        Assignment {
            task_id: id.to_string(),
            description: String::new(),
            priority: p,
            learnings: Vec::new(),
            attempt_no: 1,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn priority_order_drains_critical_before_low() {
        let mut queue: HashMap<Priority, VecDeque<Assignment>> = HashMap::new();
        queue.entry(Priority::Low).or_default().push_back(assignment(Priority::Low, "low"));
        queue.entry(Priority::Critical).or_default().push_back(assignment(Priority::Critical, "crit"));

        let mut order = Vec::new();
        for priority in PRIORITY_ORDER {
            if let Some(q) = queue.get_mut(&priority) {
                while let Some(item) = q.pop_front() {
                    order.push(item.task_id);
                }
            }
        }
        assert_eq!(order, vec!["crit".to_string(), "low".to_string()]);
    }
}
