//! taskorc - autonomous task orchestrator.
//!
//! CLI entry point: the reference frontend bootstraps the whole process
//! in-process (§6) and either dispatches one command or, for `serve`, keeps
//! the scheduler's tick loop running until interrupted.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use taskorc::app::App;
use taskorc::cli::{Cli, Command};
use taskorc::config::Config;
use taskorc::domain::{Decision, Goal, Task, TaskOrigin, TaskStatus};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskorc")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Logging initialized");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!(provider = %config.llm.provider, model = %config.llm.model, "taskorc starting");

    let app = App::bootstrap(config).await.context("Failed to bootstrap orchestrator")?;

    match cli.command {
        None | Some(Command::Status) => print_status(&app).await?,
        Some(Command::Serve) => {
            info!("taskorc serving — scheduler tick loop running, press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
            info!("shutting down");
            app.shutdown(std::time::Duration::from_secs(5)).await?;
        }
        Some(Command::CreateTask { description, priority, tags }) => {
            let task = Task::new(description, TaskOrigin::User, priority).with_tags(tags);
            let id = app.state.create_task(task).await?;
            println!("{id}");
        }
        Some(Command::CreateGoal { description, success_criteria }) => {
            let goal = Goal::new(description, success_criteria);
            let id = app.state.create_goal(goal).await?;
            println!("{id}");
        }
        Some(Command::ActivateGoal { goal_id }) => {
            app.scheduler.activate_goal(goal_id).await?;
        }
        Some(Command::RunTask { task_id }) => {
            app.scheduler.run_task(task_id).await?;
        }
        Some(Command::Cancel { task_id }) => {
            let cancelled = app.scheduler.cancel(task_id).await?;
            println!("{cancelled}");
        }
        Some(Command::ListTasks { status, goal }) => {
            let status: Option<TaskStatus> = status
                .map(|s| serde_json::from_value(serde_json::Value::String(s)))
                .transpose()
                .context("invalid --status value")?;
            for task in app.state.list_tasks(status, goal).await? {
                println!("{}\t{}\t{}\t{}", task.id, task.status, task.priority, task.description);
            }
        }
        Some(Command::ListGoals { status }) => {
            for goal in app.state.list_goals(status).await? {
                println!("{}\t{}\t{}", goal.id, goal.status, goal.description);
            }
        }
        Some(Command::ListApprovals) => {
            for approval in app.approvals.pending()? {
                println!("{}\t{:?}\t{}", approval.id, approval.approval_type, approval.reason);
            }
        }
        Some(Command::Decide { approval_id, decision, by }) => {
            let decision = match decision.to_lowercase().as_str() {
                "approved" | "approve" => Decision::Approved,
                "rejected" | "reject" => Decision::Rejected,
                other => eyre::bail!("decision must be `approved` or `rejected`, got `{other}`"),
            };
            app.approvals.decide(&approval_id, decision, by)?;
        }
    }

    Ok(())
}

async fn print_status(app: &App) -> Result<()> {
    let status = app.scheduler.status().await?;
    println!("running: {}", status.running);
    println!("queue_length: {}", status.queue_length);
    println!("pending_approvals: {}", status.pending_approvals);
    println!("pool_queue_length: {}", status.pool_status.queue_length);
    for worker in &status.pool_status.workers {
        println!("  worker {}: busy={} current_task={:?}", worker.worker_id, worker.busy, worker.current_task);
    }
    Ok(())
}
