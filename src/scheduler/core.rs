//! The tick loop: the central coordinating actor (C8, §4.8).
//!
//! Single-threaded by design — concurrency lives in the pool (C7) and the
//! sandbox (C5). Each tick is meant to be idempotent: re-running it with no
//! external input between ticks produces the same next state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::approval::{ApprovalQueue, ApprovalQueueError};
use crate::domain::{Decision, GoalStatus, Learning, Task, TaskOrigin, TaskStatus};
use crate::events::{Actor, Event, EventStore};
use crate::guardrail::{Action, Classification, GuardrailEngine};
use crate::learning::LearningStore;
use crate::planning::{DecomposeError, GoalDecomposer};
use crate::pool::{AgentWorkerPool, PoolStatus, WorkerOutcome};
use crate::state::{StateError, StateManager};

use super::config::SchedulerConfig;
use super::queue::dispatchable_candidates;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("task {0} is already in a terminal state")]
    Terminal(String),
    #[error("task {0} was denied: {1}")]
    Denied(String, String),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Approval(#[from] ApprovalQueueError),
    #[error(transparent)]
    Decompose(#[from] DecomposeError),
    #[error(transparent)]
    EventStore(#[from] crate::events::EventStoreError),
    #[error("scheduler actor has shut down")]
    ChannelClosed,
}

/// `Status()` response (§6).
#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub running: bool,
    pub pool_status: PoolStatus,
    pub queue_length: usize,
    pub pending_approvals: usize,
}

enum SchedulerCommand {
    RunTask {
        task_id: String,
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
    Cancel {
        task_id: String,
        reply: oneshot::Sender<Result<bool, SchedulerError>>,
    },
    ActivateGoal {
        goal_id: String,
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
    Status {
        reply: oneshot::Sender<SchedulerStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the scheduler actor, mirroring the spawn-and-clone pattern used
/// by [`StateManager`] and [`AgentWorkerPool`].
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::Sender<SchedulerCommand>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        config: SchedulerConfig,
        state: StateManager,
        approvals: Arc<ApprovalQueue>,
        guardrail: Arc<GuardrailEngine>,
        pool: AgentWorkerPool,
        outcome_rx: mpsc::Receiver<WorkerOutcome>,
        learning: Arc<LearningStore>,
        decomposer: Arc<GoalDecomposer>,
        events: Arc<EventStore>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let actor = SchedulerActor {
            config,
            state,
            approvals,
            guardrail,
            pool,
            outcome_rx,
            learning,
            decomposer,
            events,
            retry_counts: HashMap::new(),
            submitted_learnings: HashMap::new(),
            stale_goal_notified: HashSet::new(),
            blocked_task_notified: HashSet::new(),
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    /// Immediate dispatch bypassing queue order, still subject to C3 (§6 `RunTask`).
    pub async fn run_task(&self, task_id: impl Into<String>) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::RunTask {
            task_id: task_id.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SchedulerError::ChannelClosed)?
    }

    pub async fn cancel(&self, task_id: impl Into<String>) -> Result<bool, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::Cancel {
            task_id: task_id.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SchedulerError::ChannelClosed)?
    }

    pub async fn activate_goal(&self, goal_id: impl Into<String>) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::ActivateGoal {
            goal_id: goal_id.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SchedulerError::ChannelClosed)?
    }

    pub async fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::Status { reply }).await?;
        rx.await.map_err(|_| SchedulerError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::Shutdown { reply }).await?;
        let _ = rx.await;
        Ok(())
    }

    async fn send(&self, cmd: SchedulerCommand) -> Result<(), SchedulerError> {
        self.tx.send(cmd).await.map_err(|_| SchedulerError::ChannelClosed)
    }
}

struct SchedulerActor {
    config: SchedulerConfig,
    state: StateManager,
    approvals: Arc<ApprovalQueue>,
    guardrail: Arc<GuardrailEngine>,
    pool: AgentWorkerPool,
    outcome_rx: mpsc::Receiver<WorkerOutcome>,
    learning: Arc<LearningStore>,
    decomposer: Arc<GoalDecomposer>,
    events: Arc<EventStore>,
    /// Ephemeral retry counters, separate from `Task::attempts` (which is an
    /// append-only audit trail, §3). Reconstructed lazily: a task that is
    /// still `pending`/`active` on restart starts its counter at its current
    /// failure count, which only under-counts a transient reset that happened
    /// in a previous process lifetime — a deliberately accepted approximation.
    retry_counts: HashMap<String, u32>,
    /// Learning ids attached to a task's most recent dispatch, so a
    /// successful completion can reinforce the ones that helped.
    submitted_learnings: HashMap<String, Vec<String>>,
    stale_goal_notified: HashSet<String>,
    blocked_task_notified: HashSet<String>,
}

impl SchedulerActor {
    async fn run(mut self, mut commands: mpsc::Receiver<SchedulerCommand>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Scheduler: tick loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "Scheduler: tick failed");
                    }
                }
                Some(command) = commands.recv() => {
                    if self.handle_command(command).await {
                        break;
                    }
                }
                else => break,
            }
        }
        info!("Scheduler: tick loop stopped");
    }

    async fn handle_command(&mut self, command: SchedulerCommand) -> bool {
        match command {
            SchedulerCommand::RunTask { task_id, reply } => {
                let _ = reply.send(self.run_task(&task_id).await);
                false
            }
            SchedulerCommand::Cancel { task_id, reply } => {
                let _ = reply.send(self.cancel_task(&task_id).await);
                false
            }
            SchedulerCommand::ActivateGoal { goal_id, reply } => {
                let _ = reply.send(self.activate_goal(&goal_id).await);
                false
            }
            SchedulerCommand::Status { reply } => {
                let pool_status = self.pool.status().await.unwrap_or(PoolStatus {
                    workers: Vec::new(),
                    queue_length: 0,
                });
                let pending_approvals = self.approvals.pending().map(|p| p.len()).unwrap_or(0);
                let queue_length = self
                    .state
                    .list_tasks(Some(TaskStatus::Pending), None)
                    .await
                    .map(|t| t.len())
                    .unwrap_or(0);
                let _ = reply.send(SchedulerStatus {
                    running: true,
                    pool_status,
                    queue_length,
                    pending_approvals,
                });
                false
            }
            SchedulerCommand::Shutdown { reply } => {
                let _ = reply.send(());
                true
            }
        }
    }

    /// §4.8: drain completions, check approvals, evaluate triggers, select
    /// and dispatch, with learning injection folded into dispatch.
    async fn tick(&mut self) -> Result<(), SchedulerError> {
        debug!("Scheduler: tick started");
        self.drain_completions().await?;
        self.check_approvals().await?;
        self.evaluate_triggers().await?;
        self.select_and_dispatch().await?;
        Ok(())
    }

    async fn drain_completions(&mut self) -> Result<(), SchedulerError> {
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            self.apply_outcome(outcome).await?;
        }
        Ok(())
    }

    async fn apply_outcome(&mut self, outcome: WorkerOutcome) -> Result<(), SchedulerError> {
        match outcome {
            WorkerOutcome::Completed { task_id, attempt, .. } => {
                let mut task = self.state.get_task_required(&task_id).await?;
                task.record_attempt(attempt);
                task.set_status(TaskStatus::Completed).ok();
                self.state.update_task(task.clone()).await?;
                self.retry_counts.remove(&task_id);
                if let Some(learning_ids) = self.submitted_learnings.remove(&task_id) {
                    for id in learning_ids {
                        let _ = self.learning.reinforce(&id);
                    }
                }
                self.maybe_complete_goal(task.goal_id.as_deref()).await?;
            }
            WorkerOutcome::Failed { task_id, attempt, transient, .. } => {
                self.submitted_learnings.remove(&task_id);
                let mut task = self.state.get_task_required(&task_id).await?;
                task.record_attempt(attempt);

                let counter = self.retry_counts.entry(task_id.clone()).or_insert(0);
                *counter += 1;
                if transient {
                    *counter /= 2;
                }

                if *counter < self.config.max_attempts {
                    task.set_status(TaskStatus::Pending).ok();
                } else {
                    task.set_status(TaskStatus::Failed).ok();
                    self.retry_counts.remove(&task_id);
                }
                self.state.update_task(task).await?;
            }
            WorkerOutcome::Cancelled { task_id, .. } => {
                self.submitted_learnings.remove(&task_id);
                self.retry_counts.remove(&task_id);
                if let Some(mut task) = self.state.get_task(&task_id).await? {
                    task.set_status(TaskStatus::Cancelled).ok();
                    self.state.update_task(task).await?;
                }
            }
            WorkerOutcome::Crashed { task_id, .. } => {
                self.submitted_learnings.remove(&task_id);
                self.retry_counts.remove(&task_id);
                let mut task = self.state.get_task_required(&task_id).await?;
                task.set_status(TaskStatus::Failed).ok();
                self.state.update_task(task).await?;
                self.events.append(Event::new(
                    Actor::Scheduler,
                    "task.crash_exhausted_terminal",
                    serde_json::json!({"task_id": task_id}),
                ))?;
            }
        }
        Ok(())
    }

    async fn maybe_complete_goal(&mut self, goal_id: Option<&str>) -> Result<(), SchedulerError> {
        let Some(goal_id) = goal_id else { return Ok(()) };
        let Some(mut goal) = self.state.get_goal(goal_id).await? else {
            return Ok(());
        };
        let completed: HashSet<String> = self
            .state
            .list_tasks(Some(TaskStatus::Completed), Some(goal_id.to_string()))
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();
        if goal.maybe_complete(&completed) {
            self.state.update_goal(goal).await?;
        }
        Ok(())
    }

    /// §4.8 step 2: an approval decided since we last looked is applied to
    /// its linked task exactly once — idempotent because `task.approved` and
    /// terminal status both make the branch a no-op on a repeat tick.
    async fn check_approvals(&mut self) -> Result<(), SchedulerError> {
        for approval in self.approvals.decided()? {
            let Some(task_id) = approval.task_id.as_ref() else { continue };
            let Some(mut task) = self.state.get_task(task_id).await? else { continue };
            match approval.decision {
                Some(Decision::Approved) if !task.approved && !task.is_terminal() => {
                    task.approve();
                    self.state.update_task(task).await?;
                }
                Some(Decision::Rejected) if !task.is_terminal() => {
                    task.set_status(TaskStatus::Cancelled).ok();
                    self.state.update_task(task).await?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// §4.8 step 3: informational events only, no state mutation.
    async fn evaluate_triggers(&mut self) -> Result<(), SchedulerError> {
        let now = taskstore::now_ms();
        let stale_ms = self.config.stale_goal_days * 24 * 60 * 60 * 1000;
        for goal in self.state.list_goals(Some(GoalStatus::Active.to_string())).await? {
            if now - goal.updated_at > stale_ms && self.stale_goal_notified.insert(goal.id.clone()) {
                self.events.append(Event::new(
                    Actor::Scheduler,
                    "goal.stale",
                    serde_json::json!({"goal_id": goal.id, "days_since_update": (now - goal.updated_at) / 86_400_000}),
                ))?;
            }
        }

        let blocked_ms = self.config.blocked_task_hours * 60 * 60 * 1000;
        for task in self.state.list_tasks(Some(TaskStatus::Blocked), None).await? {
            if now - task.updated_at > blocked_ms && self.blocked_task_notified.insert(task.id.clone()) {
                self.events.append(Event::new(
                    Actor::Scheduler,
                    "task.blocked_too_long",
                    serde_json::json!({"task_id": task.id, "hours_blocked": (now - task.updated_at) / 3_600_000}),
                ))?;
            }
        }
        Ok(())
    }

    /// §4.8 step 4 + 5: walk every currently dispatchable candidate, classify
    /// each through C3, and submit what's allowed with its learning context
    /// attached. Candidates that need approval are skipped (left `pending`,
    /// an Approval now exists for a human to resolve); denied candidates are
    /// failed immediately.
    async fn select_and_dispatch(&mut self) -> Result<(), SchedulerError> {
        let pending = self.state.list_tasks(Some(TaskStatus::Pending), None).await?;
        let completed_ids: HashSet<String> = self
            .state
            .list_tasks(Some(TaskStatus::Completed), None)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();
        let candidates = dispatchable_candidates(pending, &completed_ids);

        for task in candidates {
            self.dispatch_one(task).await?;
        }
        Ok(())
    }

    /// Shared by the tick's dispatch step and `RunTask`'s immediate dispatch.
    async fn dispatch_one(&mut self, mut task: Task) -> Result<(), SchedulerError> {
        if task.approved {
            self.submit(task).await?;
            return Ok(());
        }

        let action = Action::new(task.description.clone(), "task_execution", "scheduler").with_args(serde_json::json!({"task_id": task.id}));
        match self.guardrail.classify(&action) {
            Classification::Allow => {
                self.submit(task).await?;
            }
            Classification::Deny(reason) => {
                task.set_status(TaskStatus::Failed).ok();
                self.state.update_task(task.clone()).await?;
                self.events.append(Event::new(
                    Actor::Scheduler,
                    "task.denied",
                    serde_json::json!({"task_id": task.id, "reason": reason}),
                ))?;
            }
            Classification::RequireApproval(level, reason) => {
                let approval = crate::domain::Approval::new(
                    Some(task.id.clone()),
                    crate::domain::ApprovalType::TaskExecution,
                    level,
                    reason.clone(),
                    serde_json::json!({"task_id": task.id}),
                );
                self.approvals.request(approval)?;
                self.events.append(Event::new(
                    Actor::Scheduler,
                    "task.approval_requested",
                    serde_json::json!({"task_id": task.id, "reason": reason}),
                ))?;
            }
        }
        Ok(())
    }

    async fn submit(&mut self, mut task: Task) -> Result<(), SchedulerError> {
        let learnings: Vec<Learning> = self
            .learning
            .top_k(&task.tags, self.config.min_confidence, self.config.learning_top_k)
            .unwrap_or_default();
        self.submitted_learnings
            .insert(task.id.clone(), learnings.iter().map(|l| l.id.clone()).collect());

        task.set_status(TaskStatus::Active).ok();
        self.state.update_task(task.clone()).await?;

        let attempt_no = task.attempts.len() as u32 + 1;
        self.pool
            .submit(task.id.clone(), task.description.clone(), task.priority, learnings, attempt_no)
            .await;
        Ok(())
    }

    async fn run_task(&mut self, task_id: &str) -> Result<(), SchedulerError> {
        let task = self.state.get_task_required(task_id).await?;
        if task.is_terminal() {
            return Err(SchedulerError::Terminal(task_id.to_string()));
        }
        self.dispatch_one(task).await
    }

    async fn cancel_task(&mut self, task_id: &str) -> Result<bool, SchedulerError> {
        let task = self.state.get_task_required(task_id).await?;
        if task.is_terminal() {
            return Ok(false);
        }
        if task.status == TaskStatus::Active {
            Ok(self.pool.cancel(task_id.to_string()).await)
        } else {
            let mut task = task;
            task.set_status(TaskStatus::Cancelled).ok();
            self.state.update_task(task).await?;
            Ok(true)
        }
    }

    /// §4.9 + §6 `ActivateGoal`: decompose, create the linked tasks with
    /// dependency indexes mapped to real ids, then transition the goal.
    async fn activate_goal(&mut self, goal_id: &str) -> Result<(), SchedulerError> {
        let goal = self
            .state
            .get_goal(goal_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("goal {goal_id}")))?;

        let specs = self.decomposer.decompose(&goal).await?;

        let mut created_ids: Vec<String> = Vec::with_capacity(specs.len());
        for spec in &specs {
            let dependencies: Vec<String> = spec.dependencies.iter().map(|&idx| created_ids[idx].clone()).collect();
            let task = Task::new(spec.description.clone(), TaskOrigin::Decomposition, crate::domain::Priority::Medium)
                .with_goal(goal_id)
                .with_dependencies(dependencies);
            let id = self.state.create_task(task).await?;
            created_ids.push(id);
        }

        let mut goal = goal;
        for id in &created_ids {
            goal.link_task(id.clone());
        }
        goal.set_status(GoalStatus::Active);
        self.state.update_goal(goal).await?;
        Ok(())
    }
}
