//! LlmClient trait - provider-agnostic chat completion boundary (§6 LLM collaborator)
//!
//! The scheduler, the goal decomposer, and the agent worker pool never branch
//! on provider: they hold an `Arc<dyn LlmClient>` and call `complete`/`stream`.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{CompletionRequest, CompletionResponse, LlmError, StreamChunk};

/// A chat-completion backed LLM collaborator.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion request to termination and return the full response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Run one completion request, forwarding incremental chunks as they arrive.
    /// Still returns the full response once the stream ends.
    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError>;
}
