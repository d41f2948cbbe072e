//! The provider abstraction every LLM backend implements.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crewgate_core::types::{ChatMessage, LlmResponse, StreamChunk, ToolDefinition};

/// Per-call request parameters.
#[derive(Clone, Debug)]
pub struct LlmRequestConfig {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for LlmRequestConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// Uniform interface over LLM backends.
///
/// `chat` never panics and never propagates transport errors as `Err`:
/// failures come back as `LlmResponse::error(...)` with `transport_error`
/// set, so the agent loop can decide about secondary-model fallback.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> LlmResponse;

    /// Streaming variant. Intermediate chunks carry content deltas for UI
    /// side effects; the final chunk carries `finish_reason` and any tool
    /// calls. Providers without streaming fall back to one terminal chunk.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> mpsc::Receiver<StreamChunk> {
        let (tx, rx) = mpsc::channel(1);
        let response = self.chat(messages, tools, model, config).await;
        let chunk = StreamChunk {
            delta: response.content.unwrap_or_default(),
            finish_reason: response.finish_reason.or_else(|| Some("stop".into())),
            tool_calls: response.tool_calls,
        };
        let _ = tx.send(chunk).await;
        rx
    }

    fn default_model(&self) -> &str;

    fn display_name(&self) -> &str;
}
