//! Google Gemini provider over the Generative Language REST API.
//!
//! Streaming uses `:streamGenerateContent?alt=sse`; non-streaming uses
//! `:generateContent`. The thinking budget is passed through
//! `generationConfig.thinkingConfig`; thought parts are filtered out of the
//! yielded text and empty candidates (safety-blocked alternatives) are
//! skipped.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::provider::{AiProvider, ChatRequest, Completion, Role, ToolDefinition, UsageInfo};
use crate::retry;
use crate::stream::StreamEvent;

const DEFAULT_TEMPERATURE: f64 = 0.85;
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
        }
    }

    fn endpoint(&self, model: &str, streaming: bool) -> String {
        if streaming {
            format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                self.base_url, model
            )
        } else {
            format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
        }
    }

    async fn send_request(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_ms: 5000,
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Gemini API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        Ok(resp)
    }
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<Option<UsageInfo>, ProviderError> {
        let body = build_request_body(req);
        let url = self.endpoint(&req.model.model_id, true);

        let mut attempt = 0;
        loop {
            attempt += 1;
            if attempt > 1 {
                retry::wait_before_retry("gemini", "stream", attempt - 1).await;
            }

            debug!(model = %req.model.model_id, attempt, "sending streaming request to Gemini");

            let result = match self.send_request(&url, &body).await {
                Ok(resp) => crate::gemini_stream::process_stream(resp, &tx).await,
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
        let body = build_request_body(req);
        let url = self.endpoint(&req.model.model_id, false);

        let mut attempt = 0;
        loop {
            attempt += 1;
            if attempt > 1 {
                retry::wait_before_retry("gemini", "complete", attempt - 1).await;
            }

            debug!(model = %req.model.model_id, attempt, "sending request to Gemini");

            let result = match self.send_request(&url, &body).await {
                Ok(resp) => {
                    resp.json::<GenerateContentResponse>()
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

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let contents: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                // Gemini calls the assistant side "model".
                Role::Assistant => "model",
            };
            serde_json::json!({
                "role": role,
                "parts": [{ "text": m.content }],
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "contents": contents,
        "systemInstruction": {
            "parts": [{ "text": req.system_prompt }],
        },
        "generationConfig": {
            "temperature": DEFAULT_TEMPERATURE,
            "maxOutputTokens": DEFAULT_MAX_TOKENS,
            "thinkingConfig": {
                "thinkingBudget": req.model.thinking_budget,
            },
        },
    });

    if let Some(ref tools) = req.tools {
        let declarations: Vec<serde_json::Value> = tools.iter().map(build_declaration).collect();
        body["tools"] = serde_json::json!([{ "functionDeclarations": declarations }]);
    }

    body
}

/// Neutral tool schema → Gemini function declaration.
fn build_declaration(tool: &ToolDefinition) -> serde_json::Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.parameters,
    })
}

fn parse_response(resp: GenerateContentResponse) -> Completion {
    let mut text_parts: Vec<String> = Vec::new();
    for candidate in resp.candidates {
        let Some(content) = candidate.content else {
            continue;
        };
        for part in content.parts {
            if part.thought {
                continue;
            }
            if let Some(text) = part.text {
                text_parts.push(text);
            }
        }
    }

    let usage = resp
        .usage_metadata
        .map(|u| UsageInfo {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
        })
        .unwrap_or(UsageInfo {
            prompt_tokens: 0,
            completion_tokens: 0,
        });

    Completion {
        text: text_parts.join(""),
        usage,
    }
}

// Gemini API response types (private: deserialization only), shared with
// the SSE processor.

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    pub(crate) candidates: Vec<Candidate>,
    pub(crate) usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
pub(crate) struct Candidate {
    pub(crate) content: Option<CandidateContent>,
}

#[derive(Deserialize)]
pub(crate) struct CandidateContent {
    #[serde(default)]
    pub(crate) parts: Vec<Part>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Part {
    pub(crate) text: Option<String>,
    #[serde(default)]
    pub(crate) thought: bool,
    pub(crate) function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
pub(crate) struct FunctionCall {
    pub(crate) name: Option<String>,
    #[serde(default)]
    pub(crate) args: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UsageMetadata {
    #[serde(default)]
    pub(crate) prompt_token_count: u32,
    #[serde(default)]
    pub(crate) candidates_token_count: u32,
}
