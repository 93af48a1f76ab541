//! Per-worker agent conversation loop (C7, §4.7).
//!
//! Each worker owns one long-lived task that pulls [`WorkerCommand`]s from its
//! private channel, drives an LLM tool-use conversation to completion for
//! each [`Assignment`], and reports the outcome back to the pool actor. The
//! worker never touches C2 directly; it only emits events and outcomes.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::AttemptRecord;
use crate::events::{Actor, Event, EventStore};
use crate::llm::{CompletionRequest, ContentBlock, LlmClient, Message, StopReason, ToolDefinition as LlmToolDefinition};
use crate::tools::{ToolContext, ToolRegistry};

use super::messages::{Assignment, WorkerCommand, WorkerOutcome};

/// Turn cap: a conversation that hasn't stopped on its own after this many
/// LLM round-trips is treated as a failed attempt rather than left to run
/// forever (the spec names no explicit bound; this mirrors the tool
/// timeout/retry caps elsewhere in §4.6 erring toward a hard ceiling).
const MAX_TURNS: u32 = 30;

/// Drives one worker's lifetime: receive assignments, run them, report
/// outcomes, until the pool sends `WorkerCommand::Shutdown` or the channel closes.
pub async fn run_worker(
    worker_id: usize,
    mut commands: mpsc::Receiver<WorkerCommand>,
    outcomes: mpsc::Sender<WorkerOutcome>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    events: Arc<EventStore>,
    worktree: std::path::PathBuf,
) {
    debug!(worker_id, "run_worker: started");
    while let Some(command) = commands.recv().await {
        match command {
            WorkerCommand::Shutdown => {
                debug!(worker_id, "run_worker: shutdown received");
                break;
            }
            WorkerCommand::Run(assignment) => {
                let task_id = assignment.task_id.clone();
                let outcome = run_assignment(worker_id, &assignment, &llm, &tools, &events, &worktree).await;
                if outcomes.send(outcome).await.is_err() {
                    warn!(worker_id, task_id, "run_worker: pool hung up, dropping outcome");
                    break;
                }
            }
        }
    }
    debug!(worker_id, "run_worker: exiting");
}

/// Runs one assignment to a terminal outcome: `Completed`, `Failed`, or
/// `Cancelled` if the pool flips the cancellation flag mid-conversation.
async fn run_assignment(
    worker_id: usize,
    assignment: &Assignment,
    llm: &Arc<dyn LlmClient>,
    tools: &Arc<ToolRegistry>,
    events: &Arc<EventStore>,
    worktree: &std::path::Path,
) -> WorkerOutcome {
    let task_id = assignment.task_id.clone();
    let started_at = taskstore::now_ms();
    let start = Instant::now();

    let _ = events.append(Event::new(
        Actor::System,
        "task.attempt_started",
        serde_json::json!({"task_id": task_id, "worker_id": worker_id, "attempt_no": assignment.attempt_no}),
    ));

    let ctx = ToolContext::new(worktree.to_path_buf(), format!("{task_id}-{}", assignment.attempt_no));
    let tool_defs: Vec<LlmToolDefinition> = tools
        .list()
        .await
        .into_iter()
        .map(|t| LlmToolDefinition::new(t.name, t.description, t.input_schema))
        .collect();

    let mut messages = vec![Message::user(build_prompt(assignment))];

    for turn in 0..MAX_TURNS {
        if assignment.cancel.load(Ordering::SeqCst) {
            let _ = events.append(Event::new(
                Actor::System,
                "task.cancelled",
                serde_json::json!({"task_id": task_id, "worker_id": worker_id}),
            ));
            return WorkerOutcome::Cancelled { task_id, worker_id };
        }

        let request = CompletionRequest {
            system_prompt: AGENT_SYSTEM_PROMPT.to_string(),
            messages: messages.clone(),
            tools: tool_defs.clone(),
            max_tokens: 4096,
        };

        let response = match llm.complete(request).await {
            Ok(response) => response,
            Err(err) => {
                return failed_outcome(worker_id, task_id, started_at, start, format!("llm error: {err}"), true);
            }
        };

        let reached_end = response.stop_reason != StopReason::ToolUse;
        let mut assistant_blocks = Vec::new();
        if let Some(text) = &response.content {
            assistant_blocks.push(ContentBlock::text(text.clone()));
        }
        for call in &response.tool_calls {
            assistant_blocks.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            });
        }
        if !assistant_blocks.is_empty() {
            messages.push(Message::assistant_blocks(assistant_blocks));
        }

        if reached_end {
            let preview = response.content.unwrap_or_default();
            let _ = events.append(Event::new(
                Actor::System,
                "task.attempt_finished",
                serde_json::json!({"task_id": task_id, "worker_id": worker_id, "turns": turn + 1}),
            ));
            return WorkerOutcome::Completed {
                task_id: task_id.clone(),
                worker_id,
                attempt: AttemptRecord {
                    success: true,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    output_preview: preview.chars().take(2000).collect(),
                    error: None,
                    started_at,
                },
            };
        }

        if assignment.cancel.load(Ordering::SeqCst) {
            let _ = events.append(Event::new(
                Actor::System,
                "task.cancelled",
                serde_json::json!({"task_id": task_id, "worker_id": worker_id}),
            ));
            return WorkerOutcome::Cancelled { task_id, worker_id };
        }

        let mut result_blocks = Vec::with_capacity(response.tool_calls.len());
        for call in &response.tool_calls {
            let outcome = tools.invoke(&call.name, call.input.clone(), &ctx, "assistant", Some(&task_id)).await;
            let block = match outcome {
                Ok(result) => ContentBlock::tool_result(call.id.clone(), result.content, result.is_error),
                // Approval-pending and guardrail-denied calls are fed back to the
                // model as an error result rather than aborting the whole attempt;
                // the agent may have another path forward.
                Err(err) => ContentBlock::tool_result(call.id.clone(), err.to_string(), true),
            };
            result_blocks.push(block);
        }
        messages.push(Message::user_blocks(result_blocks));
    }

    failed_outcome(worker_id, task_id, started_at, start, format!("exceeded {MAX_TURNS} turns without finishing"), false)
}

fn failed_outcome(worker_id: usize, task_id: String, started_at: i64, start: Instant, error: String, transient: bool) -> WorkerOutcome {
    WorkerOutcome::Failed {
        task_id,
        worker_id,
        attempt: AttemptRecord {
            success: false,
            elapsed_ms: start.elapsed().as_millis() as u64,
            output_preview: String::new(),
            error: Some(error),
            started_at,
        },
        transient,
    }
}

fn build_prompt(assignment: &Assignment) -> String {
    let mut prompt = String::new();
    prompt.push_str(&assignment.description);
    if !assignment.learnings.is_empty() {
        prompt.push_str("\n\nRelevant learnings from past attempts:\n");
        for learning in &assignment.learnings {
            prompt.push_str(&format!("- ({}) {}\n", learning.observation_type, learning.observation));
        }
    }
    prompt
}

const AGENT_SYSTEM_PROMPT: &str = "You are an autonomous task worker. Use the available tools to make \
concrete progress on the assigned task, then summarize what was done in your final message.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;
    use std::sync::atomic::AtomicBool;

    fn assignment() -> Assignment {
        Assignment {
            task_id: "t1".to_string(),
            description: "do the thing".to_string(),
            priority: Priority::Medium,
            learnings: Vec::new(),
            attempt_no: 1,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn build_prompt_includes_learnings() {
        let mut a = assignment();
        a.learnings.push(crate::domain::Learning::new("tip", "ctx", "prefer X over Y", vec![]));
        let prompt = build_prompt(&a);
        assert!(prompt.contains("do the thing"));
        assert!(prompt.contains("prefer X over Y"));
    }

    #[test]
    fn build_prompt_without_learnings_is_just_description() {
        let a = assignment();
        assert_eq!(build_prompt(&a), "do the thing");
    }
}
