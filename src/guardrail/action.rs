//! The action description fed into `Classify` (§4.3)

use std::path::PathBuf;

/// A candidate action (tool invocation, plugin install, task dispatch) about
/// to be gated by the guardrail engine.
#[derive(Debug, Clone)]
pub struct Action {
    pub description: String,
    pub tool_name: String,
    pub args: serde_json::Value,
    pub target_paths: Vec<PathBuf>,
    pub caller: String,
    /// Set when this action would create or replace a plugin/tool module (§4.3 policy 6).
    pub is_self_extension: bool,
}

impl Action {
    pub fn new(description: impl Into<String>, tool_name: impl Into<String>, caller: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            tool_name: tool_name.into(),
            args: serde_json::json!({}),
            target_paths: Vec::new(),
            caller: caller.into(),
            is_self_extension: false,
        }
    }

    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_target_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.target_paths = paths;
        self
    }

    pub fn self_extension(mut self) -> Self {
        self.is_self_extension = true;
        self
    }
}
