use async_trait::async_trait;
use klasta_core::ModelConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::stream::StreamEvent;

/// A single message in the conversation history.
///
/// Role mapping at this boundary is fixed: student turns arrive as `User`,
/// trickster turns as `Assistant`. Adapters re-map to whatever the vendor
/// API expects (e.g. Gemini's "model").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Tool definition in the neutral schema: a name, a description, and a JSON
/// Schema `parameters` object. Adapters convert to the vendor shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Token usage from a completed AI call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// The full AI call payload, assembled by the context layer.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub model: ModelConfig,
    pub tools: Option<Vec<ToolDefinition>>,
}

/// Result of a non-streaming call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: UsageInfo,
}

/// Common interface for all model providers (Gemini, Anthropic, Mock).
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Stream response events through a channel.
    ///
    /// Text chunks and tool-call events are written to `tx` in emission
    /// order; all events belong to a single model response (modulo retried
    /// duplicate prefixes). The future resolves after the last event with
    /// the call's usage, or `None` when the vendor reported none. Sending
    /// into a full channel is the backpressure suspension point.
    async fn stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<Option<UsageInfo>, ProviderError>;

    /// Send a non-streaming request and wait for the full response.
    ///
    /// The returned text concatenates chunks in the same order `stream`
    /// would have yielded them.
    async fn complete(&self, req: &ChatRequest) -> Result<Completion, ProviderError>;
}

impl std::fmt::Debug for dyn AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiProvider").field("name", &self.name()).finish()
    }
}
