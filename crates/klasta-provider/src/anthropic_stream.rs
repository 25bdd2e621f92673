//! Anthropic SSE stream processing.
//!
//! Reads the reqwest byte stream, reassembles SSE lines, and writes
//! normalised [`StreamEvent`]s into the caller's channel. Thinking deltas
//! are filtered out; tool input JSON is accumulated across deltas and
//! emitted as a single tool-call event when its block closes.

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::provider::UsageInfo;
use crate::stream::{parse_sse_line, SseParsed, StreamEvent};

/// Accumulation state for the current response.
#[derive(Default)]
struct StreamState {
    current_event: String,
    // Content block type reported by `content_block_start` ("text",
    // "thinking", or "tool_use") so deltas know what to emit.
    current_block_type: String,
    tool_use_name: String,
    tool_use_input_json: String,
    tokens_in: u32,
    tokens_out: u32,
    saw_message: bool,
}

/// Parse the Anthropic streaming SSE response and emit stream events.
///
/// Resolves with the call's usage once the byte stream is exhausted, or with
/// an error: transport drops surface as transient HTTP errors, a vendor
/// `error` event as a server error, a dropped receiver as cancellation.
pub async fn process_stream(
    resp: reqwest::Response,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<Option<UsageInfo>, ProviderError> {
    use futures_util::StreamExt;

    let mut state = StreamState::default();
    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk?;
        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        // SSE arrives as multiple lines per chunk; keep the incomplete last
        // line in the buffer.
        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match parse_sse_line(line) {
                Some(SseParsed::Event(ev)) => state.current_event = ev,
                Some(SseParsed::Data(data)) => {
                    if let Some(event) = parse_data_block(&data, &mut state)? {
                        if tx.send(event).await.is_err() {
                            // receiver dropped
                            return Err(ProviderError::Cancelled);
                        }
                    }
                }
                None => {}
            }
        }

        line_buf = remainder;
    }

    if state.saw_message {
        Ok(Some(UsageInfo {
            prompt_tokens: state.tokens_in,
            completion_tokens: state.tokens_out,
        }))
    } else {
        Ok(None)
    }
}

/// Parse a single SSE data block based on the current event type.
fn parse_data_block(
    data: &str,
    state: &mut StreamState,
) -> Result<Option<StreamEvent>, ProviderError> {
    match state.current_event.as_str() {
        "message_start" => {
            if let Ok(msg) = serde_json::from_str::<MessageStart>(data) {
                state.saw_message = true;
                state.tokens_in = msg.message.usage.input_tokens;
            }
            Ok(None)
        }

        "content_block_start" => {
            // Record block type so deltas know which event to emit. For
            // tool_use blocks, also capture the tool name.
            if let Ok(block_start) = serde_json::from_str::<ContentBlockStart>(data) {
                state.current_block_type = block_start.content_block.block_type.clone();
                if block_start.content_block.block_type == "tool_use" {
                    state.tool_use_name = block_start.content_block.name.unwrap_or_default();
                    state.tool_use_input_json.clear();
                }
            }
            Ok(None)
        }

        "content_block_delta" => {
            if let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(data) {
                match delta.delta.delta_type.as_str() {
                    "text_delta" => {
                        if let Some(text) = delta.delta.text {
                            return Ok(Some(StreamEvent::TextChunk { text }));
                        }
                    }
                    // Internal reasoning: never yielded downstream.
                    "thinking_delta" => {}
                    "input_json_delta" => {
                        if let Some(partial) = delta.delta.partial_json {
                            state.tool_use_input_json.push_str(&partial);
                        }
                    }
                    other => {
                        debug!(delta_type = other, "unhandled delta type");
                    }
                }
            }
            Ok(None)
        }

        "content_block_stop" => {
            // When a tool_use block closes, emit the fully accumulated input.
            if state.current_block_type == "tool_use" {
                let arguments =
                    serde_json::from_str::<serde_json::Value>(&state.tool_use_input_json)
                        .unwrap_or(serde_json::Value::Object(Default::default()));
                let event = StreamEvent::ToolCall {
                    name: std::mem::take(&mut state.tool_use_name),
                    arguments,
                };
                state.tool_use_input_json.clear();
                state.current_block_type.clear();
                return Ok(Some(event));
            }
            state.current_block_type.clear();
            Ok(None)
        }

        "message_delta" => {
            if let Ok(delta) = serde_json::from_str::<MessageDelta>(data) {
                state.tokens_out = delta.usage.output_tokens;
            }
            Ok(None)
        }

        "error" => {
            warn!(data, "anthropic stream error");
            Err(ProviderError::Api {
                status: 500,
                message: data.to_string(),
            })
        }

        // message_stop, ping, and unknown events: no action needed
        _ => Ok(None),
    }
}

// Anthropic SSE data types (private: deserialization only)

#[derive(Deserialize)]
struct MessageStart {
    message: MessageStartInner,
}

#[derive(Deserialize)]
struct MessageStartInner {
    usage: InputUsage,
}

#[derive(Deserialize)]
struct InputUsage {
    input_tokens: u32,
}

#[derive(Deserialize)]
struct ContentBlockStart {
    content_block: ContentBlockMeta,
}

#[derive(Deserialize)]
struct ContentBlockMeta {
    #[serde(rename = "type")]
    block_type: String,
    /// Populated for `tool_use` blocks: the tool name.
    name: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Deserialize)]
struct DeltaContent {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
    partial_json: Option<String>,
}

#[derive(Deserialize)]
struct MessageDelta {
    usage: OutputUsage,
}

#[derive(Deserialize)]
struct OutputUsage {
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_state() -> StreamState {
        StreamState::default()
    }

    #[test]
    fn text_delta_yields_chunk() {
        let mut state = fresh_state();
        state.current_event = "content_block_delta".to_string();
        let event = parse_data_block(
            r#"{"delta": {"type": "text_delta", "text": "Na, "}}"#,
            &mut state,
        )
        .expect("parse");
        assert!(matches!(event, Some(StreamEvent::TextChunk { text }) if text == "Na, "));
    }

    #[test]
    fn thinking_delta_is_filtered() {
        let mut state = fresh_state();
        state.current_event = "content_block_delta".to_string();
        let event = parse_data_block(
            r#"{"delta": {"type": "thinking_delta", "thinking": "slapta"}}"#,
            &mut state,
        )
        .expect("parse");
        assert!(event.is_none());
    }

    #[test]
    fn tool_use_block_accumulates_input_json() {
        let mut state = fresh_state();

        state.current_event = "content_block_start".to_string();
        parse_data_block(
            r#"{"content_block": {"type": "tool_use", "id": "t1", "name": "transition_phase"}}"#,
            &mut state,
        )
        .expect("start");

        state.current_event = "content_block_delta".to_string();
        parse_data_block(
            r#"{"delta": {"type": "input_json_delta", "partial_json": "{\"signal\":"}}"#,
            &mut state,
        )
        .expect("delta 1");
        parse_data_block(
            r#"{"delta": {"type": "input_json_delta", "partial_json": "\"understood\"}"}}"#,
            &mut state,
        )
        .expect("delta 2");

        state.current_event = "content_block_stop".to_string();
        let event = parse_data_block("{}", &mut state).expect("stop");
        match event {
            Some(StreamEvent::ToolCall { name, arguments }) => {
                assert_eq!(name, "transition_phase");
                assert_eq!(arguments["signal"], "understood");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn usage_collected_from_start_and_delta() {
        let mut state = fresh_state();

        state.current_event = "message_start".to_string();
        parse_data_block(
            r#"{"message": {"usage": {"input_tokens": 42}}}"#,
            &mut state,
        )
        .expect("start");

        state.current_event = "message_delta".to_string();
        parse_data_block(r#"{"usage": {"output_tokens": 17}}"#, &mut state).expect("delta");

        assert!(state.saw_message);
        assert_eq!(state.tokens_in, 42);
        assert_eq!(state.tokens_out, 17);
    }

    #[test]
    fn error_event_is_server_error() {
        let mut state = fresh_state();
        state.current_event = "error".to_string();
        let err = parse_data_block(r#"{"type": "overloaded_error"}"#, &mut state).unwrap_err();
        assert!(err.is_transient());
    }
}
