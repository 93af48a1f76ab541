//! Top-level composition: wires C1-C10 into one running process against the
//! persistent state layout rooted at [`crate::config::StorageConfig::root`]
//! (§6, §10.5).
//!
//! Every component that appends to the event log (C1) shares the same
//! [`EventStore`] instance so `events/NNNNN.jsonl` stays a single ordered
//! log (§6, P1/P7) rather than one per owner — [`crate::state::StateManager`]
//! is the only component that used to open its own; it now takes the shared
//! handle like everything else.

use std::sync::Arc;

use eyre::{Context, Result};

use crate::approval::ApprovalQueue;
use crate::config::Config;
use crate::events::{DEFAULT_SEGMENT_BYTES, EventStore};
use crate::guardrail::GuardrailEngine;
use crate::learning::LearningStore;
use crate::llm;
use crate::planning::{DecomposerConfig, GoalDecomposer};
use crate::pool::AgentWorkerPool;
use crate::sandbox::{HostApiRegistry, LearningApi, MessageApi, ScheduleApi};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::state::StateManager;
use crate::tools::ToolRegistry;
use crate::tools::builtin::{EchoTool, ReadFileTool, WriteFileTool};
use taskstore::Store;

/// Every handle a frontend (CLI, IPC listener) needs to drive the system.
/// Cloning an `App` is cheap — every field is itself a clone-able handle or
/// an `Arc`.
#[derive(Clone)]
pub struct App {
    pub state: StateManager,
    pub approvals: Arc<ApprovalQueue>,
    pub guardrail: Arc<GuardrailEngine>,
    pub tools: Arc<ToolRegistry>,
    pub pool: AgentWorkerPool,
    pub scheduler: Scheduler,
    pub learning: Arc<LearningStore>,
    pub events: Arc<EventStore>,
}

impl App {
    /// Construct every component and start the scheduler's tick loop and the
    /// agent worker pool's supervisory task. Returns once everything is
    /// listening; the tick loop itself runs in the background.
    pub async fn bootstrap(config: Config) -> Result<Self> {
        let root = config.storage.root.clone();
        std::fs::create_dir_all(&root).context("failed to create storage root")?;

        let events = Arc::new(
            EventStore::open(root.join("events"), DEFAULT_SEGMENT_BYTES).context("failed to open event store")?,
        );

        let state = StateManager::spawn(root.join("snapshots"), events.clone())
            .context("failed to spawn state manager")?;

        let approval_store = Store::open(root.join("snapshots")).context("failed to open approval store")?;
        let approvals = Arc::new(ApprovalQueue::new(approval_store, events.clone()));

        let learning_store = Store::open(root.join("snapshots")).context("failed to open learning store")?;
        let learning = Arc::new(LearningStore::new(learning_store));

        let guardrail = Arc::new(GuardrailEngine::new(config.guardrails.clone(), config.rate_limit.per_tool_per_min));

        let mut host_apis = HostApiRegistry::new();
        host_apis.register(Box::new(MessageApi::new(events.clone())));
        host_apis.register(Box::new(LearningApi::new(learning.clone())));
        host_apis.register(Box::new(ScheduleApi::new(events.clone())));
        let host_apis = Arc::new(host_apis);

        let tools = Arc::new(ToolRegistry::new(
            config.tool.clone(),
            config.regression.clone(),
            config.sandbox.clone(),
            guardrail.clone(),
            approvals.clone(),
            events.clone(),
            host_apis,
        ));
        tools.register_native(Box::new(EchoTool)).await;
        tools.register_native(Box::new(ReadFileTool)).await;
        tools.register_native(Box::new(WriteFileTool)).await;

        let llm_client = llm::create_client(&config.llm).context("failed to construct LLM client")?;

        let worktree_root = root.join("worktree");
        std::fs::create_dir_all(&worktree_root).context("failed to create worktree root")?;
        let (pool, outcome_rx) = AgentWorkerPool::spawn(config.pool.clone(), llm_client.clone(), tools.clone(), events.clone(), worktree_root);

        let decomposer = Arc::new(GoalDecomposer::new(llm_client, DecomposerConfig::default()));

        let scheduler_config: SchedulerConfig = (&config).into();
        let scheduler = Scheduler::spawn(
            scheduler_config,
            state.clone(),
            approvals.clone(),
            guardrail.clone(),
            pool.clone(),
            outcome_rx,
            learning.clone(),
            decomposer,
            events.clone(),
        );

        Ok(Self {
            state,
            approvals,
            guardrail,
            tools,
            pool,
            scheduler,
            learning,
            events,
        })
    }

    pub async fn shutdown(&self, grace: std::time::Duration) -> Result<()> {
        self.scheduler.shutdown().await?;
        self.pool.shutdown(grace).await;
        self.state.shutdown().await?;
        Ok(())
    }
}
