// Stream Decoder (C5): turns the accumulated raw bytes of a streaming
// response into a sequence of JSON frames, or recognizes an AWS binary
// event-stream without decoding it.
//
// Three shapes are handled, selected by the provider descriptor's
// `response.sse.format`:
//   - `sse`: lines prefixed `data: ` (six bytes including the space).
//   - `json_lines`: each line stripped of surrounding `,[]` and parsed alone.
//   - `sse_or_json_lines`: try SSE framing, fall back to json_lines per line.

use serde_json::Value;

pub const AWS_EVENTSTREAM_CONTENT_TYPE: &str = "application/vnd.amazon.eventstream";
pub const SSE_CONTENT_TYPE: &str = "text/event-stream";

pub fn is_sse_content_type(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains(SSE_CONTENT_TYPE)
}

pub fn is_eventstream_content_type(content_type: &str) -> bool {
    content_type
        .to_ascii_lowercase()
        .contains(AWS_EVENTSTREAM_CONTENT_TYPE)
}

/// One decoded frame: the parsed JSON payload plus, for SSE, the `type`
/// field if present (used by the event-type gate during extraction).
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Value,
}

impl Frame {
    pub fn event_type(&self) -> Option<&str> {
        self.data.get("type").and_then(|v| v.as_str())
    }
}

/// Parses `sse` / `sse_or_json_lines` framed text: strips the `data: `
/// prefix, skips the optional done marker, ignores malformed lines.
pub fn parse_sse_frames(body: &str, done_marker: Option<&str>) -> Vec<Frame> {
    let mut frames = Vec::new();
    for raw_line in body.lines() {
        let line = raw_line.trim_end_matches('\r');
        let Some(payload) = line.strip_prefix("data: ") else {
            continue;
        };
        if let Some(marker) = done_marker {
            if payload == marker {
                continue;
            }
        }
        if payload.is_empty() {
            continue;
        }
        if let Ok(data) = serde_json::from_str::<Value>(payload) {
            frames.push(Frame { data });
        }
    }
    frames
}

/// Parses `json_lines` framed text: each line has surrounding `,[]`
/// characters stripped, then is parsed independently. Returns every
/// successfully parsed line in order, so the caller can take the last one.
pub fn parse_json_lines(body: &str) -> Vec<Frame> {
    let mut frames = Vec::new();
    for raw_line in body.lines() {
        let trimmed = raw_line.trim().trim_matches(|c| c == ',' || c == '[' || c == ']');
        if trimmed.is_empty() {
            continue;
        }
        if let Ok(data) = serde_json::from_str::<Value>(trimmed) {
            frames.push(Frame { data });
        }
    }
    frames
}

/// Attempts to parse the whole body as a single top-level JSON array and
/// returns its last element, used when `use_last_chunk` is set (e.g.
/// Gemini's `streamGenerateContent`, which returns one JSON array).
pub fn parse_last_chunk(body: &str) -> Option<Value> {
    let parsed: Value = serde_json::from_str(body.trim()).ok()?;
    parsed.as_array()?.last().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_data_prefix_and_skips_done_marker() {
        let body = "data: {\"a\":1}\n\ndata: [DONE]\n";
        let frames = parse_sse_frames(body, Some("[DONE]"));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, serde_json::json!({"a": 1}));
    }

    #[test]
    fn anthropic_streaming_scenario_frames() {
        let body = "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"model\":\"claude-sonnet-4\",\"usage\":{\"input_tokens\":42,\"cache_read_input_tokens\":7}}}\n\nevent: message_delta\ndata: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":9},\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n";
        let frames = parse_sse_frames(body, None);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event_type(), Some("message_start"));
        assert_eq!(frames[1].event_type(), Some("message_delta"));
    }

    #[test]
    fn json_lines_strips_brackets_and_commas() {
        let body = "[\n{\"a\":1},\n{\"a\":2}\n]";
        let frames = parse_json_lines(body);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames.last().unwrap().data, serde_json::json!({"a": 2}));
    }

    #[test]
    fn last_chunk_reads_final_array_element() {
        let body = r#"[{"usageMetadata":{"promptTokenCount":1}},{"usageMetadata":{"promptTokenCount":11,"candidatesTokenCount":4,"cachedContentTokenCount":1}}]"#;
        let last = parse_last_chunk(body).unwrap();
        assert_eq!(last["usageMetadata"]["promptTokenCount"], 11);
    }

    #[test]
    fn eventstream_content_type_recognized() {
        assert!(is_eventstream_content_type("application/vnd.amazon.eventstream"));
        assert!(!is_eventstream_content_type("application/json"));
    }
}
