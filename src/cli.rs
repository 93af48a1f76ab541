//! CLI command definitions: the reference frontend talks directly to the
//! in-process scheduler/entity-store handles (§6 External Interfaces), not
//! through a network protocol.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::Priority;

#[derive(Parser)]
#[command(
    name = "taskorc",
    about = "Autonomous task orchestrator",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/taskorc/logs/taskorc.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands, one per §6 frontend operation plus `serve`, the
/// long-running mode that keeps the scheduler's tick loop ticking.
#[derive(Subcommand)]
pub enum Command {
    /// Run the scheduler tick loop and agent worker pool until interrupted.
    Serve,

    /// Create a standalone task.
    CreateTask {
        description: String,
        #[arg(short, long, default_value = "medium")]
        priority: Priority,
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Create a goal; it stays `draft` until activated.
    CreateGoal {
        description: String,
        #[arg(short, long)]
        success_criteria: Option<String>,
    },

    /// Decompose a goal into tasks and transition it to `active`.
    ActivateGoal { goal_id: String },

    /// Dispatch a task immediately, bypassing queue order (still subject to
    /// the guardrail engine).
    RunTask { task_id: String },

    /// Cancel a pending or active task.
    Cancel { task_id: String },

    /// List tasks, optionally filtered by status and/or goal. `status` is
    /// one of pending/active/blocked/completed/failed/cancelled.
    ListTasks {
        #[arg(short, long)]
        status: Option<String>,
        #[arg(short, long)]
        goal: Option<String>,
    },

    /// List goals, optionally filtered by status (draft/active/completed).
    ListGoals {
        #[arg(short, long)]
        status: Option<String>,
    },

    /// List approvals still awaiting a decision.
    ListApprovals,

    /// Resolve a pending approval. `decision` is `approved` or `rejected`.
    Decide {
        approval_id: String,
        decision: String,
        #[arg(short, long, default_value = "cli")]
        by: String,
    },

    /// Print pool/queue/approval summary.
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_no_command() {
        let cli = Cli::parse_from(["taskorc"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn parse_create_task_with_defaults() {
        let cli = Cli::parse_from(["taskorc", "create-task", "write the report"]);
        match cli.command {
            Some(Command::CreateTask { description, priority, tags }) => {
                assert_eq!(description, "write the report");
                assert_eq!(priority, Priority::Medium);
                assert!(tags.is_empty());
            }
            _ => panic!("expected CreateTask"),
        }
    }

    #[test]
    fn parse_create_task_with_priority_and_tags() {
        let cli = Cli::parse_from(["taskorc", "create-task", "ship it", "--priority", "high", "--tags", "ops,urgent"]);
        match cli.command {
            Some(Command::CreateTask { priority, tags, .. }) => {
                assert_eq!(priority, Priority::High);
                assert_eq!(tags, vec!["ops".to_string(), "urgent".to_string()]);
            }
            _ => panic!("expected CreateTask"),
        }
    }

    #[test]
    fn parse_decide() {
        let cli = Cli::parse_from(["taskorc", "decide", "appr-1", "approved", "--by", "alice"]);
        match cli.command {
            Some(Command::Decide { approval_id, decision, by }) => {
                assert_eq!(approval_id, "appr-1");
                assert_eq!(decision, "approved");
                assert_eq!(by, "alice");
            }
            _ => panic!("expected Decide"),
        }
    }

    #[test]
    fn parse_serve() {
        let cli = Cli::parse_from(["taskorc", "serve"]);
        assert!(matches!(cli.command, Some(Command::Serve)));
    }
}
