//! echo tool - returns its input verbatim, used as the minimal smoke-test
//! tool for the plain task lifecycle (§8 S1).

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolContext, ToolResult};

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn description(&self) -> &'static str {
        "Echo the given text back. Used for smoke-testing the task pipeline."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolResult {
        match input["text"].as_str() {
            Some(text) => ToolResult::success(text.to_string()),
            None => ToolResult::error("text is required"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_text_back() {
        let ctx = ToolContext::new(std::env::temp_dir(), "test".to_string());
        let result = EchoTool.execute(serde_json::json!({"text": "hello"}), &ctx).await;
        assert!(!result.is_error);
        assert_eq!(result.content, "hello");
    }

    #[tokio::test]
    async fn missing_text_is_an_error() {
        let ctx = ToolContext::new(std::env::temp_dir(), "test".to_string());
        let result = EchoTool.execute(serde_json::json!({}), &ctx).await;
        assert!(result.is_error);
    }
}
