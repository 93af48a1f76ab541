//! Sandboxed worker process: lifecycle, spawning, and the stdio call link (§4.5).

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::error::SandboxError;
use super::message::{HostToWorker, WorkerToHost};
use super::runtime::HostApiRegistry;
use crate::domain::Plugin;
use crate::guardrail::redact;

/// Default memory ceiling for a worker process, §4.5.
pub const DEFAULT_MEMORY_CEILING_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// States and transitions a worker moves through (§4.5 Lifecycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Spawning,
    Loaded,
    Idle,
    Running,
    Terminating,
    Dead,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Spawning => "spawning",
            Self::Loaded => "loaded",
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Terminating => "terminating",
            Self::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

/// A single isolated worker process bound to one plugin.
pub struct SandboxWorker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    state: WorkerState,
    exports: Vec<String>,
    next_call_id: u64,
    memory_ceiling_bytes: u64,
}

impl SandboxWorker {
    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    /// Spawns the plugin's entry point as a stripped-down child process and
    /// waits for its `Ready` handshake. The command to run comes from the
    /// plugin manifest's `"command"` field (an interpreter invocation, e.g.
    /// `"node"` or a compiled binary path); `entry_point_bytes` is written to
    /// a temp file passed as that command's sole argument.
    pub async fn spawn(plugin: &Plugin, load_timeout: Duration, memory_ceiling_bytes: u64) -> Result<Self, SandboxError> {
        debug!(plugin = %plugin.name, "SandboxWorker::spawn: called");

        let command_name = plugin
            .manifest
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("true")
            .to_string();

        let entry_path = std::env::temp_dir().join(format!("taskorc-plugin-{}", plugin.id));
        tokio::fs::write(&entry_path, &plugin.entry_point_bytes).await?;

        let mut command = Command::new(&command_name);
        command
            .arg(&entry_path)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = BufReader::new(child.stdout.take().expect("piped stdout"));

        let mut worker = Self {
            child,
            stdin,
            stdout,
            state: WorkerState::Spawning,
            exports: Vec::new(),
            next_call_id: 0,
            memory_ceiling_bytes,
        };

        match timeout(load_timeout, worker.read_ready()).await {
            Ok(Ok(exports)) => {
                worker.exports = exports;
                worker.state = WorkerState::Loaded;
                Ok(worker)
            }
            Ok(Err(err)) => {
                worker.state = WorkerState::Dead;
                Err(err)
            }
            Err(_) => {
                worker.state = WorkerState::Dead;
                let _ = worker.child.start_kill();
                Err(SandboxError::LoadTimeout)
            }
        }
    }

    async fn read_ready(&mut self) -> Result<Vec<String>, SandboxError> {
        match self.read_message().await? {
            WorkerToHost::Ready { exports } => Ok(exports),
            other => Err(SandboxError::WorkerCrashed(format!("expected ready handshake, got {other:?}"))),
        }
    }

    /// `Call(name, args)`: sends a request and drives the stdio link until
    /// the matching reply arrives, bounded by `call_timeout`. Any `HostCall`s
    /// the worker issues while the call is in flight are dispatched through
    /// `apis` and answered inline before the loop resumes waiting.
    pub async fn call(
        &mut self,
        name: &str,
        args: serde_json::Value,
        call_timeout: Duration,
        apis: &HostApiRegistry,
    ) -> Result<serde_json::Value, SandboxError> {
        if !matches!(self.state, WorkerState::Loaded | WorkerState::Idle) {
            return Err(SandboxError::NotCallable(self.state.to_string()));
        }
        self.state = WorkerState::Running;

        let id = self.next_call_id;
        self.next_call_id += 1;
        self.write_message(&HostToWorker::Call {
            id,
            name: name.to_string(),
            args,
        })
        .await?;

        let result = timeout(call_timeout, self.drive_until_reply(id, apis)).await;
        match result {
            Ok(Ok(value)) => {
                self.state = WorkerState::Idle;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.state = WorkerState::Dead;
                Err(err)
            }
            Err(_) => {
                self.state = WorkerState::Terminating;
                let _ = self.child.start_kill();
                self.state = WorkerState::Dead;
                Err(SandboxError::Timeout(name.to_string()))
            }
        }
    }

    async fn drive_until_reply(&mut self, id: u64, apis: &HostApiRegistry) -> Result<serde_json::Value, SandboxError> {
        loop {
            match self.read_message().await? {
                WorkerToHost::Result { id: rid, value } if rid == id => return Ok(value),
                WorkerToHost::Error { id: rid, message } if rid == id => {
                    return Err(SandboxError::WorkerCrashed(message));
                }
                WorkerToHost::HostCall {
                    id: call_id,
                    namespace,
                    method,
                    args,
                } => {
                    let redacted_args = redact(&args);
                    let reply = match apis.dispatch(&namespace, &method, redacted_args).await {
                        Ok(value) => HostToWorker::HostCallResult { id: call_id, value },
                        Err(err) => HostToWorker::HostCallError {
                            id: call_id,
                            message: err.to_string(),
                        },
                    };
                    self.write_message(&reply).await?;
                }
                other => {
                    warn!(?other, "SandboxWorker::drive_until_reply: unexpected message, ignoring");
                }
            }
        }
    }

    async fn write_message(&mut self, msg: &HostToWorker) -> Result<(), SandboxError> {
        let mut line = serde_json::to_vec(msg)?;
        line.push(b'\n');
        self.stdin.write_all(&line).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_message(&mut self) -> Result<WorkerToHost, SandboxError> {
        let mut line = String::new();
        let bytes_read = self.stdout.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Err(SandboxError::WorkerCrashed("unexpected EOF".to_string()));
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }

    /// Memory ceiling this worker is supposed to honor. Enforcement is left to
    /// the OS/container layer the process is spawned under; this is advisory
    /// metadata surfaced to callers deciding whether to respawn with a smaller
    /// plugin.
    pub fn memory_ceiling_bytes(&self) -> u64 {
        self.memory_ceiling_bytes
    }

    pub async fn terminate(&mut self) {
        if self.state == WorkerState::Dead {
            return;
        }
        self.state = WorkerState::Terminating;
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        self.state = WorkerState::Dead;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin_with_command(command: &str) -> Plugin {
        Plugin::new("echoer", "1.0.0", serde_json::json!({"command": command}), vec![])
    }

    #[tokio::test]
    async fn spawning_a_nonexistent_command_fails_before_timeout() {
        let plugin = plugin_with_command("/nonexistent/taskorc-plugin-host-binary");
        let result = SandboxWorker::spawn(&plugin, Duration::from_millis(200), DEFAULT_MEMORY_CEILING_BYTES).await;
        assert!(result.is_err());
    }

}
