/// Events emitted during a streaming model response.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental text content from the model.
    TextChunk { text: String },

    /// The model invoked a tool. Emitted at its position within the
    /// response; the dialogue engine intercepts these for phase
    /// transitions.
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
}

/// Parse a single SSE line.
/// SSE format: `event: <type>\ndata: <json>\n\n`
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_and_data_lines() {
        assert!(matches!(
            parse_sse_line("event: message_start"),
            Some(SseParsed::Event(e)) if e == "message_start"
        ));
        assert!(matches!(
            parse_sse_line(r#"data: {"x":1}"#),
            Some(SseParsed::Data(d)) if d == r#"{"x":1}"#
        ));
        assert!(parse_sse_line(": keepalive").is_none());
    }
}
