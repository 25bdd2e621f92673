//! Deterministic mock provider for tests and keyless development.
//!
//! Yields canned text chunks in order, then tool-call events, and reports
//! usage exactly as configured. Multi-call scripts let tests drive retry
//! paths; the last request is captured for inspection.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::provider::{AiProvider, ChatRequest, Completion, UsageInfo};
use crate::stream::StreamEvent;

const DEFAULT_RESPONSE: &str = "Sveikas — čia MockProvider";
const DEFAULT_USAGE: UsageInfo = UsageInfo {
    prompt_tokens: 10,
    completion_tokens: 5,
};

/// One scripted model response: text chunks first, then tool calls.
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    pub chunks: Vec<String>,
    pub tool_calls: Vec<(String, serde_json::Value)>,
}

impl MockScript {
    pub fn text(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_call(mut self, name: &str, arguments: serde_json::Value) -> Self {
        self.tool_calls.push((name.to_string(), arguments));
        self
    }
}

/// Simulated failure modes, mapped to fresh [`ProviderError`]s per call.
#[derive(Debug, Clone, Copy)]
pub enum MockFailure {
    RateLimited,
    ServerError,
    BadRequest,
}

impl MockFailure {
    fn to_error(self) -> ProviderError {
        match self {
            MockFailure::RateLimited => ProviderError::RateLimited { retry_after_ms: 0 },
            MockFailure::ServerError => ProviderError::Api {
                status: 503,
                message: "mock server error".to_string(),
            },
            MockFailure::BadRequest => ProviderError::Api {
                status: 400,
                message: "mock bad request".to_string(),
            },
        }
    }
}

pub struct MockProvider {
    /// Per-call scripts, popped front-first. When empty, `fallback` repeats.
    scripts: Mutex<VecDeque<MockScript>>,
    fallback: MockScript,
    usage: Option<UsageInfo>,
    failure: Option<MockFailure>,
    /// The last request seen, for test inspection.
    pub last_request: Mutex<Option<ChatRequest>>,
    calls: Mutex<u32>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(&[DEFAULT_RESPONSE])
    }
}

impl MockProvider {
    /// Provider that replies with the same chunks on every call.
    pub fn new(responses: &[&str]) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            fallback: MockScript::text(responses),
            usage: None,
            failure: None,
            last_request: Mutex::new(None),
            calls: Mutex::new(0),
        }
    }

    /// Provider that pops one script per call, then repeats an empty reply.
    pub fn scripted(scripts: Vec<MockScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            fallback: MockScript::default(),
            usage: None,
            failure: None,
            last_request: Mutex::new(None),
            calls: Mutex::new(0),
        }
    }

    pub fn with_tool_call(mut self, name: &str, arguments: serde_json::Value) -> Self {
        self.fallback.tool_calls.push((name.to_string(), arguments));
        self
    }

    pub fn with_usage(mut self, usage: UsageInfo) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_failure(mut self, failure: MockFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// How many stream/complete calls this provider has served.
    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }

    fn next_script(&self, req: &ChatRequest) -> MockScript {
        *self.calls.lock().unwrap() += 1;
        *self.last_request.lock().unwrap() = Some(req.clone());
        self.scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl AiProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<Option<UsageInfo>, ProviderError> {
        if let Some(failure) = self.failure {
            return Err(failure.to_error());
        }

        let script = self.next_script(req);

        for text in script.chunks {
            if tx.send(StreamEvent::TextChunk { text }).await.is_err() {
                return Err(ProviderError::Cancelled);
            }
        }
        for (name, arguments) in script.tool_calls {
            if tx.send(StreamEvent::ToolCall { name, arguments }).await.is_err() {
                return Err(ProviderError::Cancelled);
            }
        }

        Ok(self.usage)
    }

    async fn complete(&self, req: &ChatRequest) -> Result<Completion, ProviderError> {
        if let Some(failure) = self.failure {
            return Err(failure.to_error());
        }

        let script = self.next_script(req);

        Ok(Completion {
            text: script.chunks.concat(),
            usage: self.usage.unwrap_or(DEFAULT_USAGE),
        })
    }
}
