//! Provider-neutral streaming abstraction over chat-style models, plus the
//! concrete adapters (Gemini, Anthropic) and the deterministic mock.
//!
//! Adapters normalise vendor responses into [`StreamEvent`]s written to a
//! bounded channel; usage is captured per call and returned when the stream
//! future resolves. Transient failures (429, 5xx, transport drops) are
//! retried with exponential backoff; a retry after partial streaming may
//! re-emit previously-yielded text, which downstream consumers tolerate.

mod anthropic;
mod anthropic_stream;
mod error;
mod factory;
mod gemini;
mod gemini_stream;
mod mock;
mod provider;
mod retry;
mod stream;

pub use anthropic::AnthropicProvider;
pub use error::ProviderError;
pub use factory::build_provider;
pub use gemini::GeminiProvider;
pub use mock::{MockFailure, MockProvider, MockScript};
pub use provider::{AiProvider, ChatRequest, Completion, Message, Role, ToolDefinition, UsageInfo};
pub use stream::StreamEvent;
