//! StateManager - actor that owns the entity Store (C2 Entity Store, §4.2)
//!
//! Every mutation is written to the event log first (write-ahead), then
//! applied to the in-memory/JSONL `Store` snapshot. On startup the snapshot
//! loads first and any event newer than what the snapshot reflects is
//! replayed back in, so a crash between the two writes never loses a record.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::{Approval, Filter, FilterOp, Goal, IndexValue, Record, Store, Task, TaskStatus};
use crate::events::{Actor, Event, EventStore};

use super::messages::{StateCommand, StateError, StateResponse};

/// Path to the state change notification file: a monotonically increasing
/// counter bumped on every write, so other processes can poll for changes
/// without re-reading the whole store.
fn state_notify_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("taskorc")
        .join(".state_version")
}

fn notify_state_change() {
    let path = state_notify_path();
    let version: u64 = std::fs::read_to_string(&path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(&path, format!("{}", version + 1)) {
        debug!(error = %e, "failed to write state notification file");
    }
}

/// Read the current state version (for external processes to poll).
pub fn read_state_version() -> u64 {
    std::fs::read_to_string(state_notify_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

/// Event broadcast when state changes that a frontend might react to.
#[derive(Debug, Clone)]
pub enum StateEvent {
    TaskUpdated { id: String },
    GoalUpdated { id: String },
}

/// Handle to send commands to the StateManager actor.
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
    event_tx: tokio::sync::broadcast::Sender<StateEvent>,
}

/// Replay the event log into the store on startup. Only events newer than
/// the persisted record's own `updated_at` are reapplied, so a clean
/// snapshot (the common case) replays nothing.
fn replay_into_store(store: &Store, events: &EventStore) -> Result<(), StateError> {
    let mut replayed = 0usize;
    for event in events.replay() {
        let outcome = match event.act.as_str() {
            "task.upserted" => apply_if_newer::<Task>(store, &event.payload),
            "goal.upserted" => apply_if_newer::<Goal>(store, &event.payload),
            _ => Ok(false),
        };
        match outcome {
            Ok(true) => replayed += 1,
            Ok(false) => {}
            Err(e) => warn!(act = %event.act, error = %e, "replay_into_store: skipping unreadable event"),
        }
    }
    if replayed > 0 {
        info!(replayed, "replay_into_store: reapplied events missing from the snapshot");
    }
    Ok(())
}

fn apply_if_newer<T: Record>(store: &Store, payload: &serde_json::Value) -> Result<bool, StateError> {
    let record: T = serde_json::from_value(payload.clone()).map_err(|e| StateError::StoreError(e.to_string()))?;
    let existing: Option<T> = store.get(record.id()).map_err(|e| StateError::StoreError(e.to_string()))?;
    if existing.as_ref().is_some_and(|e| e.updated_at() >= record.updated_at()) {
        return Ok(false);
    }
    store.update(record).map_err(|e| StateError::StoreError(e.to_string()))?;
    Ok(true)
}

impl StateManager {
    /// Spawn a new StateManager actor rooted at `store_path`, sharing the
    /// process-wide event log (C1) passed in by the caller — every component
    /// that appends events writes to the same rotated segment log (§6).
    pub fn spawn(store_path: impl AsRef<Path>, events: Arc<EventStore>) -> eyre::Result<Self> {
        debug!(store_path = %store_path.as_ref().display(), "StateManager::spawn: called");
        let store = Store::open(store_path.as_ref())?;

        replay_into_store(&store, &events)?;

        let (tx, rx) = mpsc::channel(256);
        let (event_tx, _) = tokio::sync::broadcast::channel(64);

        tokio::spawn(actor_loop(store, events, rx));
        info!("StateManager spawned");

        Ok(Self { tx, event_tx })
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<StateEvent> {
        self.event_tx.subscribe()
    }

    // === Task operations ===

    pub async fn create_task(&self, task: Task) -> StateResponse<String> {
        debug!(task_id = %task.id, "create_task: called");
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.send(StateCommand::CreateTask { task, reply }).await?;
        let result = rx.await.map_err(|_| StateError::ChannelError)?;
        if let Ok(ref id) = result {
            let _ = self.event_tx.send(StateEvent::TaskUpdated { id: id.clone() });
            notify_state_change();
        }
        result
    }

    pub async fn get_task(&self, id: &str) -> StateResponse<Option<Task>> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.send(StateCommand::GetTask { id: id.to_string(), reply }).await?;
        rx.await.map_err(|_| StateError::ChannelError)?
    }

    pub async fn get_task_required(&self, id: &str) -> StateResponse<Task> {
        self.get_task(id).await?.ok_or_else(|| StateError::NotFound(format!("task {id}")))
    }

    pub async fn update_task(&self, task: Task) -> StateResponse<()> {
        debug!(task_id = %task.id, status = %task.status, "update_task: called");
        let (reply, rx) = tokio::sync::oneshot::channel();
        let id = task.id.clone();
        self.send(StateCommand::UpdateTask { task, reply }).await?;
        let result = rx.await.map_err(|_| StateError::ChannelError)?;
        if result.is_ok() {
            let _ = self.event_tx.send(StateEvent::TaskUpdated { id });
            notify_state_change();
        }
        result
    }

    pub async fn list_tasks(&self, status_filter: Option<TaskStatus>, goal_filter: Option<String>) -> StateResponse<Vec<Task>> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.send(StateCommand::ListTasks {
            status_filter: status_filter.map(|s| s.to_string()),
            goal_filter,
            reply,
        })
        .await?;
        rx.await.map_err(|_| StateError::ChannelError)?
    }

    pub async fn delete_task(&self, id: &str) -> StateResponse<()> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.send(StateCommand::DeleteTask { id: id.to_string(), reply }).await?;
        rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === Goal operations ===

    pub async fn create_goal(&self, goal: Goal) -> StateResponse<String> {
        debug!(goal_id = %goal.id, "create_goal: called");
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.send(StateCommand::CreateGoal { goal, reply }).await?;
        let result = rx.await.map_err(|_| StateError::ChannelError)?;
        if let Ok(ref id) = result {
            let _ = self.event_tx.send(StateEvent::GoalUpdated { id: id.clone() });
            notify_state_change();
        }
        result
    }

    pub async fn get_goal(&self, id: &str) -> StateResponse<Option<Goal>> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.send(StateCommand::GetGoal { id: id.to_string(), reply }).await?;
        rx.await.map_err(|_| StateError::ChannelError)?
    }

    pub async fn update_goal(&self, goal: Goal) -> StateResponse<()> {
        debug!(goal_id = %goal.id, status = %goal.status, "update_goal: called");
        let (reply, rx) = tokio::sync::oneshot::channel();
        let id = goal.id.clone();
        self.send(StateCommand::UpdateGoal { goal, reply }).await?;
        let result = rx.await.map_err(|_| StateError::ChannelError)?;
        if result.is_ok() {
            let _ = self.event_tx.send(StateEvent::GoalUpdated { id });
            notify_state_change();
        }
        result
    }

    pub async fn list_goals(&self, status_filter: Option<String>) -> StateResponse<Vec<Goal>> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.send(StateCommand::ListGoals { status_filter, reply }).await?;
        rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === Maintenance ===

    pub async fn sync(&self) -> StateResponse<()> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.send(StateCommand::Sync { reply }).await?;
        rx.await.map_err(|_| StateError::ChannelError)?
    }

    pub async fn rebuild_indexes(&self) -> StateResponse<usize> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.send(StateCommand::RebuildIndexes { reply }).await?;
        rx.await.map_err(|_| StateError::ChannelError)?
    }

    pub async fn shutdown(&self) -> Result<(), StateError> {
        self.tx.send(StateCommand::Shutdown).await.map_err(|_| StateError::ChannelError)
    }

    async fn send(&self, cmd: StateCommand) -> Result<(), StateError> {
        self.tx.send(cmd).await.map_err(|_| StateError::ChannelError)
    }
}

fn write_ahead<T: Record + serde::Serialize>(events: &EventStore, act: &str, record: &T) -> Result<(), StateError> {
    let payload = serde_json::to_value(record).map_err(|e| StateError::StoreError(e.to_string()))?;
    events
        .append(Event::new(Actor::System, act, payload))
        .map_err(|e| StateError::StoreError(e.to_string()))
}

/// The actor loop that owns the Store and processes commands against the
/// shared EventStore.
async fn actor_loop(store: Store, events: Arc<EventStore>, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("actor_loop: started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::CreateTask { task, reply } => {
                let result = write_ahead(&events, "task.upserted", &task)
                    .and_then(|_| store.create(task).map_err(|e| StateError::StoreError(e.to_string())));
                let _ = reply.send(result);
            }
            StateCommand::GetTask { id, reply } => {
                let result = store.get::<Task>(&id).map_err(|e| StateError::StoreError(e.to_string()));
                let _ = reply.send(result);
            }
            StateCommand::UpdateTask { task, reply } => {
                let result = (|| {
                    if let Some(existing) = store.get::<Task>(&task.id).map_err(|e| StateError::StoreError(e.to_string()))?
                        && existing.is_terminal()
                        && existing.status != task.status
                    {
                        return Err(StateError::IllegalTransition(crate::domain::IllegalTransition {
                            from: existing.status,
                            to: task.status,
                        }));
                    }
                    write_ahead(&events, "task.upserted", &task)?;
                    store.update(task).map_err(|e| StateError::StoreError(e.to_string()))
                })();
                let _ = reply.send(result);
            }
            StateCommand::ListTasks {
                status_filter,
                goal_filter,
                reply,
            } => {
                let mut filters = Vec::new();
                if let Some(status) = status_filter {
                    filters.push(Filter {
                        field: "status".to_string(),
                        op: FilterOp::Eq,
                        value: IndexValue::String(status),
                    });
                }
                if let Some(goal_id) = goal_filter {
                    filters.push(Filter {
                        field: "goal_id".to_string(),
                        op: FilterOp::Eq,
                        value: IndexValue::String(goal_id),
                    });
                }
                let result = store.list::<Task>(&filters).map_err(|e| StateError::StoreError(e.to_string()));
                let _ = reply.send(result);
            }
            StateCommand::DeleteTask { id, reply } => {
                let result = store.delete::<Task>(&id).map_err(|e| StateError::StoreError(e.to_string()));
                let _ = reply.send(result);
            }
            StateCommand::CreateGoal { goal, reply } => {
                let result = write_ahead(&events, "goal.upserted", &goal)
                    .and_then(|_| store.create(goal).map_err(|e| StateError::StoreError(e.to_string())));
                let _ = reply.send(result);
            }
            StateCommand::GetGoal { id, reply } => {
                let result = store.get::<Goal>(&id).map_err(|e| StateError::StoreError(e.to_string()));
                let _ = reply.send(result);
            }
            StateCommand::UpdateGoal { goal, reply } => {
                let result = write_ahead(&events, "goal.upserted", &goal)
                    .and_then(|_| store.update(goal).map_err(|e| StateError::StoreError(e.to_string())));
                let _ = reply.send(result);
            }
            StateCommand::ListGoals { status_filter, reply } => {
                let mut filters = Vec::new();
                if let Some(status) = status_filter {
                    filters.push(Filter {
                        field: "status".to_string(),
                        op: FilterOp::Eq,
                        value: IndexValue::String(status),
                    });
                }
                let result = store.list::<Goal>(&filters).map_err(|e| StateError::StoreError(e.to_string()));
                let _ = reply.send(result);
            }
            StateCommand::Sync { reply } => {
                let result = store.sync().map_err(|e| StateError::StoreError(e.to_string()));
                let _ = reply.send(result);
            }
            StateCommand::RebuildIndexes { reply } => {
                let mut count = 0;
                if let Ok(c) = store.rebuild_indexes::<Task>() {
                    count += c;
                }
                if let Ok(c) = store.rebuild_indexes::<Goal>() {
                    count += c;
                }
                if let Ok(c) = store.rebuild_indexes::<Approval>() {
                    count += c;
                }
                let _ = reply.send(Ok(count));
            }
            StateCommand::Shutdown => {
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("actor_loop: stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskOrigin;
    use tempfile::tempdir;

    fn spawn() -> (StateManager, tempfile::TempDir) {
        let temp = tempdir().unwrap();
        let events = Arc::new(EventStore::open(temp.path().join("events"), crate::events::DEFAULT_SEGMENT_BYTES).unwrap());
        let manager = StateManager::spawn(temp.path().join("store"), events).unwrap();
        (manager, temp)
    }

    #[tokio::test]
    async fn create_and_get_task_round_trips() {
        let (manager, _temp) = spawn();
        let task = Task::new("write tests", TaskOrigin::User, crate::domain::Priority::Medium);
        let id = manager.create_task(task.clone()).await.unwrap();
        assert_eq!(id, task.id);
        let retrieved = manager.get_task(&id).await.unwrap().unwrap();
        assert_eq!(retrieved.description, "write tests");
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn update_of_terminal_task_rejects_further_transitions() {
        let (manager, _temp) = spawn();
        let mut task = Task::new("one-shot", TaskOrigin::User, crate::domain::Priority::Medium);
        manager.create_task(task.clone()).await.unwrap();
        task.set_status(TaskStatus::Completed).unwrap();
        manager.update_task(task.clone()).await.unwrap();

        let mut reopened = task.clone();
        reopened.status = TaskStatus::Active;
        let result = manager.update_task(reopened).await;
        assert!(matches!(result, Err(StateError::IllegalTransition(_))));
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn list_tasks_filters_by_status() {
        let (manager, _temp) = spawn();
        let mut t1 = Task::new("a", TaskOrigin::User, crate::domain::Priority::Medium);
        let t2 = Task::new("b", TaskOrigin::User, crate::domain::Priority::Medium);
        manager.create_task(t1.clone()).await.unwrap();
        manager.create_task(t2).await.unwrap();
        t1.set_status(TaskStatus::Active).unwrap();
        manager.update_task(t1).await.unwrap();

        let active = manager.list_tasks(Some(TaskStatus::Active), None).await.unwrap();
        assert_eq!(active.len(), 1);
        let pending = manager.list_tasks(Some(TaskStatus::Pending), None).await.unwrap();
        assert_eq!(pending.len(), 1);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn replay_restores_a_record_missing_from_the_snapshot() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("store");
        let events_path = temp.path().join("events");

        let events = Arc::new(EventStore::open(&events_path, crate::events::DEFAULT_SEGMENT_BYTES).unwrap());
        let task = Task::new("recovered after crash", TaskOrigin::User, crate::domain::Priority::Medium);
        write_ahead(&events, "task.upserted", &task).unwrap();
        // No corresponding write into `store` here - simulates a crash between
        // the event append and the snapshot write.

        let manager = StateManager::spawn(&store_path, events).unwrap();
        let retrieved = manager.get_task(&task.id).await.unwrap();
        assert_eq!(retrieved.unwrap().description, "recovered after crash");
        manager.shutdown().await.unwrap();
    }
}
