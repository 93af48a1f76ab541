//! Goal Decomposer Adapter: Goal -> LLM -> task-spec DAG (C9, §4.9)

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::Goal;
use crate::llm::{CompletionRequest, LlmClient, LlmError, Message, ToolDefinition};

const DEFAULT_DECOMPOSE_PROMPT: &str = "You decompose a goal into a dependency-ordered sequence of concrete, \
independently-executable tasks. Each task must be small enough for a single agent worker to complete in one pass.";

/// Estimated effort for a decomposed task, informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// One entry of the LLM's decomposition output. `dependencies` are indexes
/// into the same array, referencing tasks earlier in the sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<usize>,
    pub estimated_complexity: Complexity,
}

#[derive(Debug, Error)]
pub enum DecomposeError {
    #[error("decomposition failed: {0}")]
    DecompositionFailed(String),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Configuration for decomposition prompting.
#[derive(Debug, Clone)]
pub struct DecomposerConfig {
    pub system_prompt: String,
    pub max_tokens: u32,
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_DECOMPOSE_PROMPT.to_string(),
            max_tokens: 4096,
        }
    }
}

/// Breaks a [`Goal`] into a validated, dependency-ordered list of [`TaskSpec`]s.
pub struct GoalDecomposer {
    llm: Arc<dyn LlmClient>,
    config: DecomposerConfig,
}

impl GoalDecomposer {
    pub fn new(llm: Arc<dyn LlmClient>, config: DecomposerConfig) -> Self {
        Self { llm, config }
    }

    /// §4.9: calls the LLM with a structured prompt, validates the response
    /// is a non-empty JSON array where every dependency index is less than
    /// its own index and every description is non-empty. On any validation
    /// failure the goal is left untouched by the caller (stays `draft`).
    pub async fn decompose(&self, goal: &Goal) -> Result<Vec<TaskSpec>, DecomposeError> {
        info!(goal_id = %goal.id, "GoalDecomposer::decompose: called");

        let request = CompletionRequest {
            system_prompt: self.config.system_prompt.clone(),
            messages: vec![Message::user(self.build_prompt(goal))],
            tools: vec![self.submit_tool()],
            max_tokens: self.config.max_tokens,
        };

        let response = self.llm.complete(request).await?;

        let raw = response
            .tool_calls
            .iter()
            .find(|call| call.name == "submit_decomposition")
            .map(|call| call.input.clone())
            .or_else(|| response.content.as_deref().and_then(|c| serde_json::from_str(c).ok()))
            .ok_or_else(|| DecomposeError::DecompositionFailed("LLM did not produce a decomposition".to_string()))?;

        let specs: Vec<TaskSpec> = raw
            .get("tasks")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e: serde_json::Error| DecomposeError::DecompositionFailed(e.to_string()))?
            .ok_or_else(|| DecomposeError::DecompositionFailed("missing 'tasks' field".to_string()))?;

        self.validate(&specs)?;
        Ok(specs)
    }

    fn build_prompt(&self, goal: &Goal) -> String {
        let mut prompt = format!("Goal: {}", goal.description);
        if let Some(ref criteria) = goal.success_criteria {
            prompt.push_str(&format!("\nSuccess criteria: {criteria}"));
        }
        prompt
    }

    fn submit_tool(&self) -> ToolDefinition {
        ToolDefinition::new(
            "submit_decomposition",
            "Submit the task decomposition for this goal. Call this once with the full task list.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "tasks": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "description": { "type": "string" },
                                "dependencies": {
                                    "type": "array",
                                    "items": { "type": "integer" },
                                    "description": "indexes into this same array, must each be < this task's own index"
                                },
                                "estimated_complexity": {
                                    "type": "string",
                                    "enum": ["low", "medium", "high"]
                                }
                            },
                            "required": ["description", "estimated_complexity"]
                        }
                    }
                },
                "required": ["tasks"]
            }),
        )
    }

    fn validate(&self, specs: &[TaskSpec]) -> Result<(), DecomposeError> {
        if specs.is_empty() {
            return Err(DecomposeError::DecompositionFailed("decomposition produced zero tasks".to_string()));
        }
        for (idx, spec) in specs.iter().enumerate() {
            if spec.description.trim().is_empty() {
                return Err(DecomposeError::DecompositionFailed(format!("task {idx} has an empty description")));
            }
            for &dep in &spec.dependencies {
                if dep >= idx {
                    warn!(idx, dep, "GoalDecomposer::validate: dependency does not precede its own task");
                    return Err(DecomposeError::DecompositionFailed(format!(
                        "task {idx} depends on index {dep}, which is not strictly earlier"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, StopReason, StreamChunk, TokenUsage, ToolCall};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct StubLlm {
        body: serde_json::Value,
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "1".to_string(),
                    name: "submit_decomposition".to_string(),
                    input: self.body.clone(),
                }],
                stop_reason: StopReason::ToolUse,
                usage: TokenUsage::default(),
            })
        }

        async fn stream(
            &self,
            request: CompletionRequest,
            _chunk_tx: mpsc::Sender<StreamChunk>,
        ) -> Result<CompletionResponse, LlmError> {
            self.complete(request).await
        }
    }

    fn goal() -> Goal {
        Goal::new("set up CI", None)
    }

    #[tokio::test]
    async fn valid_decomposition_is_accepted() {
        let llm = Arc::new(StubLlm {
            body: serde_json::json!({
                "tasks": [
                    {"description": "write workflow file", "dependencies": [], "estimated_complexity": "low"},
                    {"description": "add status badge", "dependencies": [0], "estimated_complexity": "low"},
                ]
            }),
        });
        let decomposer = GoalDecomposer::new(llm, DecomposerConfig::default());
        let specs = decomposer.decompose(&goal()).await.unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].dependencies, vec![0]);
    }

    #[tokio::test]
    async fn forward_dependency_is_rejected() {
        let llm = Arc::new(StubLlm {
            body: serde_json::json!({
                "tasks": [
                    {"description": "a", "dependencies": [1], "estimated_complexity": "low"},
                    {"description": "b", "dependencies": [], "estimated_complexity": "low"},
                ]
            }),
        });
        let decomposer = GoalDecomposer::new(llm, DecomposerConfig::default());
        let err = decomposer.decompose(&goal()).await;
        assert!(matches!(err, Err(DecomposeError::DecompositionFailed(_))));
    }

    #[tokio::test]
    async fn empty_task_list_is_rejected() {
        let llm = Arc::new(StubLlm {
            body: serde_json::json!({"tasks": []}),
        });
        let decomposer = GoalDecomposer::new(llm, DecomposerConfig::default());
        let err = decomposer.decompose(&goal()).await;
        assert!(matches!(err, Err(DecomposeError::DecompositionFailed(_))));
    }

    #[tokio::test]
    async fn empty_description_is_rejected() {
        let llm = Arc::new(StubLlm {
            body: serde_json::json!({
                "tasks": [{"description": "  ", "dependencies": [], "estimated_complexity": "low"}]
            }),
        });
        let decomposer = GoalDecomposer::new(llm, DecomposerConfig::default());
        let err = decomposer.decompose(&goal()).await;
        assert!(matches!(err, Err(DecomposeError::DecompositionFailed(_))));
    }
}
