//! Wire messages exchanged with a sandboxed worker over its stdio link (§4.5).

use serde::{Deserialize, Serialize};

/// A message the host sends into a worker: either `Call(name, args)`, or the
/// reply to a `HostCall` the worker made mid-execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostToWorker {
    Call { id: u64, name: String, args: serde_json::Value },
    HostCallResult { id: u64, value: serde_json::Value },
    HostCallError { id: u64, message: String },
}

/// A worker's reply to a `HostToWorker` call, or an unsolicited `HostCall`
/// the worker makes back into the host's registered API surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerToHost {
    /// Worker signals it finished loading and is ready to accept calls.
    Ready { exports: Vec<String> },
    /// Reply to a prior `HostToWorker::id`.
    Result { id: u64, value: serde_json::Value },
    /// Reply to a prior `HostToWorker::id` that failed inside the worker.
    Error { id: u64, message: String },
    /// Worker invokes a host-mediated API: `HostCall(namespace, method, args)`.
    HostCall {
        id: u64,
        namespace: String,
        method: String,
        args: serde_json::Value,
    },
}
