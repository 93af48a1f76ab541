//! Tool Registry: `List`/`Invoke` over native and plugin-backed tools, with
//! guardrail gating, output caps, and regression-triggered rollback (C6, §4.6).

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::approval::ApprovalQueue;
use crate::config::{RegressionConfig, SandboxConfig, ToolConfig};
use crate::domain::{Approval, ApprovalType, Plugin};
use crate::events::{Actor, Event, EventStore};
use crate::guardrail::{Action, Classification, GuardrailEngine};
use crate::sandbox::{HostApiRegistry, SandboxWorker};

use super::context::ToolContext;
use super::error::ToolError;
use super::traits::{Tool, ToolResult};

/// Name+schema pair returned by `list()` for whatever the caller (typically
/// the agent worker building a `CompletionRequest`) needs to expose to the LLM.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A registered tool: a compiled-in implementation, or a plugin-exported one.
/// Plugin entries keep their last-known-good bytes so a regression can revert
/// without waiting on a human to re-approve anything (§4.6 rollback).
enum ToolEntry {
    Native(Box<dyn Tool>),
    Plugin { current: Plugin, previous: Option<Plugin> },
}

/// Rolling latency/error-rate stats used for regression detection and
/// error-count rollback (§4.6: "K failures in a sliding window W" and
/// "latency or error rate drifts past a configured delta from baseline").
#[derive(Default)]
struct ToolMetrics {
    baseline: Vec<(u64, bool)>,
    window: VecDeque<(u64, bool)>,
    failures: VecDeque<i64>,
}

impl ToolMetrics {
    fn record(&mut self, latency_ms: u64, ok: bool, now: i64, baseline_size: usize, window_size: usize) {
        if self.baseline.len() < baseline_size {
            self.baseline.push((latency_ms, ok));
        } else {
            self.window.push_back((latency_ms, ok));
            while self.window.len() > window_size {
                self.window.pop_front();
            }
        }
        if !ok {
            self.failures.push_back(now);
        }
    }

    fn evict_failures(&mut self, window_ms: u64, now: i64) {
        while let Some(&oldest) = self.failures.front() {
            if now - oldest > window_ms as i64 {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_error_rollback(&mut self, threshold: u32, window_ms: u64, now: i64) -> bool {
        self.evict_failures(window_ms, now);
        self.failures.len() as u32 >= threshold
    }

    /// `None` until both the baseline has filled and the window has at least
    /// one sample — there's nothing to compare against yet.
    fn is_regression(&self, latency_delta_ms: u64, error_rate_delta: f64, baseline_size: usize) -> Option<bool> {
        if self.baseline.len() < baseline_size || self.window.is_empty() {
            return None;
        }
        let avg = |samples: &[(u64, bool)]| -> (f64, f64) {
            let n = samples.len() as f64;
            let latency_sum: u64 = samples.iter().map(|(l, _)| l).sum();
            let errors = samples.iter().filter(|(_, ok)| !ok).count() as f64;
            (latency_sum as f64 / n, errors / n)
        };
        let (baseline_latency, baseline_errors) = avg(&self.baseline);
        let window: Vec<(u64, bool)> = self.window.iter().copied().collect();
        let (window_latency, window_errors) = avg(&window);

        let latency_regressed = window_latency - baseline_latency > latency_delta_ms as f64;
        let error_rate_regressed = window_errors - baseline_errors > error_rate_delta;
        Some(latency_regressed || error_rate_regressed)
    }
}

/// C6: the single path through which any tool call — native or plugin-backed
/// — reaches execution. Nothing calls a `Tool` or spawns a `SandboxWorker`
/// except this registry.
pub struct ToolRegistry {
    config: ToolConfig,
    regression: RegressionConfig,
    sandbox_config: SandboxConfig,
    guardrail: Arc<GuardrailEngine>,
    approvals: Arc<ApprovalQueue>,
    events: Arc<EventStore>,
    host_apis: Arc<HostApiRegistry>,
    entries: Mutex<HashMap<String, ToolEntry>>,
    metrics: Mutex<HashMap<String, ToolMetrics>>,
}

impl ToolRegistry {
    pub fn new(
        config: ToolConfig,
        regression: RegressionConfig,
        sandbox_config: SandboxConfig,
        guardrail: Arc<GuardrailEngine>,
        approvals: Arc<ApprovalQueue>,
        events: Arc<EventStore>,
        host_apis: Arc<HostApiRegistry>,
    ) -> Self {
        Self {
            config,
            regression,
            sandbox_config,
            guardrail,
            approvals,
            events,
            host_apis,
            entries: Mutex::new(HashMap::new()),
            metrics: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register_native(&self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.entries.lock().await.insert(name, ToolEntry::Native(tool));
    }

    /// A freshly-installed plugin has no "previous" generation to roll back
    /// to; that only exists once a later self-extension replaces it.
    pub async fn register_plugin(&self, tool_name: String, plugin: Plugin) {
        self.entries.lock().await.insert(
            tool_name,
            ToolEntry::Plugin {
                current: plugin,
                previous: None,
            },
        );
    }

    /// Replace a plugin tool's current generation, keeping the outgoing one
    /// as the rollback target (§4.3 policy 6: self-extension).
    pub async fn replace_plugin(&self, tool_name: &str, plugin: Plugin) {
        let mut entries = self.entries.lock().await;
        if let Some(ToolEntry::Plugin { current, .. }) = entries.get(tool_name) {
            let previous = Some(current.clone());
            entries.insert(tool_name.to_string(), ToolEntry::Plugin { current: plugin, previous });
        } else {
            entries.insert(
                tool_name.to_string(),
                ToolEntry::Plugin {
                    current: plugin,
                    previous: None,
                },
            );
        }
    }

    pub async fn list(&self) -> Vec<ToolDefinition> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .map(|(name, entry)| match entry {
                ToolEntry::Native(tool) => ToolDefinition {
                    name: name.clone(),
                    description: tool.description().to_string(),
                    input_schema: tool.input_schema(),
                },
                ToolEntry::Plugin { current, .. } => ToolDefinition {
                    name: name.clone(),
                    description: current
                        .manifest
                        .get("description")
                        .and_then(|v| v.as_str())
                        .unwrap_or("plugin-provided tool")
                        .to_string(),
                    input_schema: plugin_tool_schema(current, name),
                },
            })
            .collect()
    }

    /// §4.6's six-step pipeline. Step (1) consult C3 and step (3) rate-limit
    /// are a single call here: [`GuardrailEngine::classify`] already runs the
    /// per-`(actor, tool)` rate limiter as one of its policy kinds, so a
    /// second limiter at this layer would just duplicate that bookkeeping.
    pub async fn invoke(&self, name: &str, args: Value, ctx: &ToolContext, caller: &str, task_id: Option<&str>) -> Result<ToolResult, ToolError> {
        debug!(tool = name, caller, "ToolRegistry::invoke: called");

        let target_paths = extract_path_args(&args);
        let action = Action::new(format!("invoke tool {name}"), name, caller).with_args(args.clone()).with_target_paths(target_paths);

        match self.guardrail.classify(&action) {
            Classification::Allow => {}
            Classification::Deny(reason) => {
                self.events
                    .append(Event::new(Actor::System, "tool.denied", serde_json::json!({"tool": name, "reason": reason})))?;
                return Err(ToolError::GuardrailDenied(reason));
            }
            Classification::RequireApproval(level, reason) => {
                let approval = Approval::new(
                    task_id.map(str::to_string),
                    ApprovalType::TaskExecution,
                    level,
                    reason.clone(),
                    serde_json::json!({"tool": name, "args": self.guardrail.redact(&args)}),
                );
                let approval_id = self.approvals.request(approval).map_err(|e| ToolError::ApprovalRequired(e.to_string()))?;
                self.events.append(Event::new(
                    Actor::System,
                    "tool.approval_requested",
                    serde_json::json!({"tool": name, "approval_id": approval_id, "reason": reason}),
                ))?;
                return Err(ToolError::ApprovalRequired(format!("approval {approval_id} pending: {reason}")));
            }
        }

        if let Some(schema) = self.input_schema_for(name).await {
            validate_against_schema(&schema, &args).map_err(ToolError::SchemaInvalid)?;
        }

        let start = std::time::Instant::now();
        let now = taskstore::now_ms();
        self.events.append(Event::new(Actor::System, "tool.started", serde_json::json!({"tool": name})))?;

        let outcome = self.dispatch(name, args, ctx).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let (ok, result) = match outcome {
            Ok(mut result) => {
                result.content = cap_output(result.content, self.config.max_output_bytes);
                (!result.is_error, Ok(result))
            }
            Err(err) => (false, Err(err)),
        };

        self.events.append(Event::new(
            Actor::System,
            if ok { "tool.finished" } else { "tool.errored" },
            serde_json::json!({"tool": name, "latency_ms": latency_ms}),
        ))?;

        self.after_call(name, latency_ms, ok, now).await;
        result
    }

    async fn dispatch(&self, name: &str, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let entries = self.entries.lock().await;
        match entries.get(name) {
            None => Err(ToolError::UnknownTool { name: name.to_string() }),
            Some(ToolEntry::Native(tool)) => {
                let timeout = Duration::from_millis(self.config.timeout_ms);
                match tokio::time::timeout(timeout, tool.execute(args, ctx)).await {
                    Ok(result) => Ok(result),
                    Err(_) => Err(ToolError::Timeout(self.config.timeout_ms)),
                }
            }
            Some(ToolEntry::Plugin { current, .. }) => {
                let plugin = current.clone();
                drop(entries);
                self.invoke_plugin(name, &plugin, args).await
            }
        }
    }

    /// Plugin tools are spawned fresh per call and torn down right after; C6
    /// doesn't pool worker processes across invocations (that's C7's job, for
    /// agent sessions, not individual tool calls).
    async fn invoke_plugin(&self, name: &str, plugin: &Plugin, args: Value) -> Result<ToolResult, ToolError> {
        plugin.check_load_binding(None).map_err(crate::sandbox::SandboxError::from)?;

        let load_timeout = Duration::from_millis(self.sandbox_config.load_timeout_ms);
        let call_timeout = Duration::from_millis(self.sandbox_config.call_timeout_ms);
        let memory_ceiling = self.sandbox_config.max_memory_mib * 1024 * 1024;

        let mut worker = SandboxWorker::spawn(plugin, load_timeout, memory_ceiling).await?;
        let export_name = plugin
            .manifest
            .get("tools")
            .and_then(|t| t.get(name))
            .and_then(|t| t.get("export"))
            .and_then(|v| v.as_str())
            .unwrap_or(name);

        let call_result = worker.call(export_name, args, call_timeout, &self.host_apis).await;
        worker.terminate().await;

        let value = call_result?;
        match value.as_str() {
            Some(text) => Ok(ToolResult::success(text.to_string())),
            None => Ok(ToolResult::success(value.to_string())),
        }
    }

    async fn input_schema_for(&self, name: &str) -> Option<Value> {
        let entries = self.entries.lock().await;
        match entries.get(name)? {
            ToolEntry::Native(tool) => Some(tool.input_schema()),
            ToolEntry::Plugin { current, .. } => Some(plugin_tool_schema(current, name)).filter(|s| !s.is_null()),
        }
    }

    /// Step 6 of §4.6: update metrics, then check error-count rollback and
    /// baseline/window regression. Native tools can only be marked, since
    /// there's no previous compiled generation to swap back to.
    async fn after_call(&self, name: &str, latency_ms: u64, ok: bool, now: i64) {
        let mut metrics = self.metrics.lock().await;
        let entry = metrics.entry(name.to_string()).or_default();
        entry.record(latency_ms, ok, now, self.regression.baseline_size, self.regression.window_size);

        let error_rollback = entry.is_error_rollback(self.config.error_threshold, self.config.error_window_ms, now);
        let regressed = entry
            .is_regression(self.regression.latency_delta_ms, self.regression.error_rate_delta, self.regression.baseline_size)
            .unwrap_or(false);
        drop(metrics);

        if !error_rollback && !regressed {
            return;
        }

        let reason = if error_rollback { "error_threshold" } else { "regression" };
        let mut entries = self.entries.lock().await;
        match entries.get_mut(name) {
            Some(ToolEntry::Plugin { current, previous }) => {
                if let Some(prev) = previous.take() {
                    warn!(tool = name, reason, "ToolRegistry::after_call: rolling back to previous plugin generation");
                    let reverted_from = current.clone();
                    *current = prev;
                    *previous = Some(reverted_from);
                    let _ = self.events.append(Event::new(
                        Actor::System,
                        "tool.reverted",
                        serde_json::json!({"tool": name, "reason": reason}),
                    ));
                } else {
                    let _ = self.events.append(Event::new(
                        Actor::System,
                        "tool.regression_detected",
                        serde_json::json!({"tool": name, "reason": reason, "reverted": false}),
                    ));
                }
            }
            Some(ToolEntry::Native(_)) => {
                warn!(tool = name, reason, "ToolRegistry::after_call: native tool regressed, no prior generation to revert to");
                let _ = self.events.append(Event::new(
                    Actor::System,
                    "tool.regression_detected",
                    serde_json::json!({"tool": name, "reason": reason, "reverted": false}),
                ));
            }
            None => {}
        }
    }
}

fn plugin_tool_schema(plugin: &Plugin, tool_name: &str) -> Value {
    plugin
        .manifest
        .get("tools")
        .and_then(|t| t.get(tool_name))
        .and_then(|t| t.get("input_schema"))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Tool arguments that name a `"path"` field get that path registered as a
/// target path so the guardrail engine's path policies (denied/allowed/
/// sensitive fragments) apply to it.
fn extract_path_args(args: &Value) -> Vec<PathBuf> {
    args.get("path").and_then(|v| v.as_str()).map(|s| vec![PathBuf::from(s)]).unwrap_or_default()
}

/// Truncate output past `max_bytes`, leaving a visible marker with the
/// original size so a caller knows data was dropped rather than silently
/// reading a short result.
fn cap_output(content: String, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content;
    }
    let original_len = content.len();
    let mut truncated: String = content.chars().take(max_bytes).collect();
    truncated.push_str(&format!("\n... [truncated, {original_len} bytes total]"));
    truncated
}

/// A small, hand-rolled JSON Schema subset validator: `type`, `properties`,
/// `required`, `enum`, `minLength`/`maxLength`. The registry's native tools
/// only ever declare `object`/`string`/`integer` schemas, so a full
/// implementation of the spec would be pure surface area with no caller.
fn validate_against_schema(schema: &Value, value: &Value) -> Result<(), String> {
    let Some(schema_type) = schema.get("type").and_then(|t| t.as_str()) else {
        return Ok(());
    };

    match schema_type {
        "object" => {
            if !value.is_object() {
                return Err("expected an object".to_string());
            }
            if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
                for field in required {
                    let Some(field) = field.as_str() else { continue };
                    if value.get(field).is_none() {
                        return Err(format!("missing required field '{field}'"));
                    }
                }
            }
            if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
                for (field, field_schema) in properties {
                    if let Some(field_value) = value.get(field) {
                        validate_against_schema(field_schema, field_value)?;
                    }
                }
            }
            Ok(())
        }
        "string" => {
            let Some(s) = value.as_str() else {
                return Err("expected a string".to_string());
            };
            if let Some(min_len) = schema.get("minLength").and_then(|v| v.as_u64())
                && (s.len() as u64) < min_len
            {
                return Err(format!("string shorter than minLength {min_len}"));
            }
            if let Some(max_len) = schema.get("maxLength").and_then(|v| v.as_u64())
                && (s.len() as u64) > max_len
            {
                return Err(format!("string longer than maxLength {max_len}"));
            }
            if let Some(allowed) = schema.get("enum").and_then(|v| v.as_array())
                && !allowed.iter().any(|a| a.as_str() == Some(s))
            {
                return Err(format!("'{s}' is not one of the allowed enum values"));
            }
            Ok(())
        }
        "integer" | "number" => {
            if !value.is_number() {
                return Err("expected a number".to_string());
            }
            Ok(())
        }
        "boolean" => {
            if !value.is_boolean() {
                return Err("expected a boolean".to_string());
            }
            Ok(())
        }
        "array" => {
            let Some(items) = value.as_array() else {
                return Err("expected an array".to_string());
            };
            if let Some(item_schema) = schema.get("items") {
                for item in items {
                    validate_against_schema(item_schema, item)?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
