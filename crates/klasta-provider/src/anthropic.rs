use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::provider::{AiProvider, ChatRequest, Completion, ToolDefinition, UsageInfo};
use crate::retry;
use crate::stream::StreamEvent;

const API_VERSION: &str = "2023-06-01";
const DEFAULT_TEMPERATURE: f64 = 0.85;
// Sufficient for trickster dialogue (200-500 tokens typical).
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }

    async fn send_request(
        &self,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry_after * 1000,
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        Ok(resp)
    }
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<Option<UsageInfo>, ProviderError> {
        let body = build_request_body(req, true);

        let mut attempt = 0;
        loop {
            attempt += 1;
            if attempt > 1 {
                retry::wait_before_retry("anthropic", "stream", attempt - 1).await;
            }

            debug!(model = %req.model.model_id, attempt, "sending streaming request to Anthropic");

            let result = match self.send_request(&body).await {
                Ok(resp) => crate::anthropic_stream::process_stream(resp, &tx).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(usage) => return Ok(usage),
                Err(e) if e.is_transient() && attempt < retry::MAX_ATTEMPTS => continue,
                Err(e) => return Err(e),
            }
        }
    }

    async fn complete(&self, req: &ChatRequest) -> Result<Completion, ProviderError> {
        let body = build_request_body(req, false);

        let mut attempt = 0;
        loop {
            attempt += 1;
            if attempt > 1 {
                retry::wait_before_retry("anthropic", "complete", attempt - 1).await;
            }

            debug!(model = %req.model.model_id, attempt, "sending request to Anthropic");

            let result = match self.send_request(&body).await {
                Ok(resp) => {
                    resp.json::<ApiResponse>()
                        .await
                        .map_err(|e| ProviderError::Parse(e.to_string()))
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(api_resp) => return Ok(parse_response(api_resp)),
                Err(e) if e.is_transient() && attempt < retry::MAX_ATTEMPTS => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

fn build_request_body(req: &ChatRequest, stream: bool) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role,
                "content": m.content,
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": req.model.model_id,
        "max_tokens": DEFAULT_MAX_TOKENS,
        "temperature": DEFAULT_TEMPERATURE,
        "system": req.system_prompt,
        "messages": messages,
        "stream": stream,
    });

    if let Some(ref tools) = req.tools {
        body["tools"] = serde_json::Value::Array(tools.iter().map(build_tool).collect());
    }

    // The Messages API has no generic reasoning-budget knob in this shape.
    if req.model.thinking_budget > 0 {
        debug!(
            thinking_budget = req.model.thinking_budget,
            "thinking_budget ignored for Anthropic provider"
        );
    }

    body
}

/// Neutral tool schema → Anthropic shape (`parameters` becomes `input_schema`).
fn build_tool(tool: &ToolDefinition) -> serde_json::Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

fn parse_response(resp: ApiResponse) -> Completion {
    let mut text_parts: Vec<String> = Vec::new();
    for block in resp.content {
        if let ContentBlock::Text { text } = block {
            text_parts.push(text);
        }
    }

    Completion {
        text: text_parts.join(""),
        usage: UsageInfo {
            prompt_tokens: resp.usage.input_tokens,
            completion_tokens: resp.usage.output_tokens,
        },
    }
}

// Anthropic API response types (private: only used for deserialization)

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    /// Internal reasoning block: never surfaced to callers.
    #[serde(rename = "thinking")]
    #[allow(dead_code)]
    Thinking { thinking: String },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}
