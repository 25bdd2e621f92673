//! Gemini SSE stream processing.
//!
//! The `alt=sse` endpoint sends one `data: <GenerateContentResponse>` line
//! per chunk. Usage metadata rides on the final chunks; the last non-empty
//! value wins.

use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::gemini::GenerateContentResponse;
use crate::provider::UsageInfo;
use crate::stream::{parse_sse_line, SseParsed, StreamEvent};

/// Parse the Gemini streaming SSE response and emit stream events.
pub async fn process_stream(
    resp: reqwest::Response,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<Option<UsageInfo>, ProviderError> {
    use futures_util::StreamExt;

    let mut usage: Option<UsageInfo> = None;
    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk?;
        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(SseParsed::Data(data)) = parse_sse_line(line) {
                let parsed: GenerateContentResponse = match serde_json::from_str(&data) {
                    Ok(p) => p,
                    Err(e) => {
                        return Err(ProviderError::Parse(format!(
                            "invalid Gemini stream chunk: {e}"
                        )))
                    }
                };

                if let Some(u) = parsed.usage_metadata {
                    usage = Some(UsageInfo {
                        prompt_tokens: u.prompt_token_count,
                        completion_tokens: u.candidates_token_count,
                    });
                }

                for event in chunk_events(parsed.candidates) {
                    if tx.send(event).await.is_err() {
                        // receiver dropped
                        return Err(ProviderError::Cancelled);
                    }
                }
            }
        }

        line_buf = remainder;
    }

    Ok(usage)
}

/// Flatten one chunk's candidates into stream events.
///
/// Empty candidates (safety-blocked alternatives) are skipped; thought parts
/// are filtered out.
fn chunk_events(candidates: Vec<crate::gemini::Candidate>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    for candidate in candidates {
        let Some(content) = candidate.content else {
            continue;
        };
        for part in content.parts {
            if part.thought {
                continue;
            }
            if let Some(call) = part.function_call {
                events.push(StreamEvent::ToolCall {
                    name: call.name.unwrap_or_default(),
                    arguments: call.args,
                });
            } else if let Some(text) = part.text {
                events.push(StreamEvent::TextChunk { text });
            }
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_events_yield_text_and_tool_calls_in_order() {
        let raw = r#"{
            "candidates": [{"content": {"parts": [
                {"text": "Puiku, supratai!"},
                {"functionCall": {"name": "transition_phase", "args": {"signal": "understood"}}}
            ]}}]
        }"#;
        let resp: GenerateContentResponse = serde_json::from_str(raw).expect("parse");
        let events = chunk_events(resp.candidates);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], StreamEvent::TextChunk { text } if text == "Puiku, supratai!"));
        match &events[1] {
            StreamEvent::ToolCall { name, arguments } => {
                assert_eq!(name, "transition_phase");
                assert_eq!(arguments["signal"], "understood");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn chunk_events_skip_thoughts_and_blocked_candidates() {
        let raw = r#"{
            "candidates": [
                {},
                {"content": {"parts": [{"text": "mąstau", "thought": true}]}}
            ]
        }"#;
        let resp: GenerateContentResponse = serde_json::from_str(raw).expect("parse");
        assert!(chunk_events(resp.candidates).is_empty());
    }
}
