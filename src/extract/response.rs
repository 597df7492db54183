// Response Extractor (C4): dispatches on (is_streaming, sse_config present)
// and produces a normalized UsageRecord, delegating frame decoding to the
// Stream Decoder (C5).

use crate::model::{Provider, StreamFormat, UsageRecord};
use crate::pathexpr::PathEngine;
use crate::stream::{self, Frame};
use serde_json::Value;

fn should_extract_for_event(gate: Option<&str>, frame_event: Option<&str>) -> bool {
    match gate {
        None => true,
        Some(g) if g == "*" => true,
        Some(g) => frame_event == Some(g),
    }
}

/// JSON (non-streaming) response extraction: primary+fallback paths read
/// directly from the decoded document.
pub fn extract_json_response(
    engine: &PathEngine,
    provider_name: &str,
    descriptor: &Provider,
    doc: &Value,
) -> UsageRecord {
    let json_cfg = &descriptor.response.json;
    UsageRecord {
        provider: provider_name.to_string(),
        input_tokens: engine.extract_u64(doc, json_cfg.input_tokens_path.path.as_deref(), &json_cfg.input_tokens_path.alt),
        output_tokens: engine.extract_u64(doc, json_cfg.output_tokens_path.path.as_deref(), &json_cfg.output_tokens_path.alt),
        cache_creation_tokens: engine.extract_u64(
            doc,
            json_cfg.cache_creation_tokens_path.path.as_deref(),
            &json_cfg.cache_creation_tokens_path.alt,
        ),
        cache_read_tokens: engine.extract_u64(
            doc,
            json_cfg.cache_read_tokens_path.path.as_deref(),
            &json_cfg.cache_read_tokens_path.alt,
        ),
        model: engine.extract_string(doc, json_cfg.model_path.path.as_deref(), &json_cfg.model_path.alt),
        stop_reason: engine.extract_string(doc, json_cfg.stop_reason_path.path.as_deref(), &json_cfg.stop_reason_path.alt),
    }
}

/// Applies last-write-wins extraction of one token field across an ordered
/// sequence of frames, honoring the field's event-type gate.
fn extract_field_over_frames(
    engine: &PathEngine,
    frames: &[Frame],
    event_gate: Option<&str>,
    path: Option<&str>,
    alt: &[String],
) -> Option<Value> {
    let mut result = None;
    for frame in frames {
        if !should_extract_for_event(event_gate, frame.event_type()) {
            continue;
        }
        if let Some(v) = engine.extract_with_fallbacks(&frame.data, path, alt) {
            result = Some(v);
        }
    }
    result
}

/// Streaming response extraction: decodes the accumulated chunks with C5,
/// then reads each token field across the resulting frames with
/// last-write-wins semantics.
pub fn extract_streaming_response(
    engine: &PathEngine,
    provider_name: &str,
    descriptor: &Provider,
    body: &str,
) -> UsageRecord {
    let Some(sse) = &descriptor.response.sse else {
        return UsageRecord {
            provider: provider_name.to_string(),
            ..Default::default()
        };
    };

    let mut frames = match sse.format {
        StreamFormat::Sse => stream::parse_sse_frames(body, sse.done_marker.as_deref()),
        StreamFormat::JsonLines => stream::parse_json_lines(body),
        StreamFormat::SseOrJsonLines => {
            let json_lines_frames = stream::parse_json_lines(body);
            if json_lines_frames.is_empty() {
                stream::parse_sse_frames(body, sse.done_marker.as_deref())
            } else {
                json_lines_frames
            }
        }
    };

    if sse.use_last_chunk {
        if let Some(last) = stream::parse_last_chunk(body) {
            frames.push(Frame { data: last });
        }
    }

    let get = |field: &crate::model::SseFieldConfig| -> Option<Value> {
        extract_field_over_frames(
            engine,
            &frames,
            field.event.as_deref(),
            field.path.path.as_deref(),
            &field.path.alt,
        )
    };

    UsageRecord {
        provider: provider_name.to_string(),
        input_tokens: get(&sse.input_tokens).and_then(|v| v.as_u64()).unwrap_or(0),
        output_tokens: get(&sse.output_tokens).and_then(|v| v.as_u64()).unwrap_or(0),
        cache_creation_tokens: get(&sse.cache_creation_tokens).and_then(|v| v.as_u64()).unwrap_or(0),
        cache_read_tokens: get(&sse.cache_read_tokens).and_then(|v| v.as_u64()).unwrap_or(0),
        model: get(&sse.model).and_then(|v| v.as_str().map(str::to_string)),
        stop_reason: get(&sse.stop_reason).and_then(|v| v.as_str().map(str::to_string)),
    }
}

/// AWS binary event-stream responses are recognized but not decoded; the
/// usage record carries zeros. See design note on the open question in
/// SPEC_FULL.md §9.
pub fn extract_eventstream_response(provider_name: &str, default_model: Option<String>) -> UsageRecord {
    UsageRecord {
        provider: provider_name.to_string(),
        model: default_model,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use serde_json::json;

    #[test]
    fn anthropic_non_streaming_scenario() {
        let catalog = Catalog::load().unwrap();
        let descriptor = catalog.get("anthropic").unwrap();
        let engine = PathEngine::new();
        let doc = json!({
            "model": "claude-sonnet-4",
            "usage": {"input_tokens": 10, "output_tokens": 3, "cache_creation_input_tokens": 0, "cache_read_input_tokens": 0},
            "stop_reason": "end_turn"
        });
        let usage = extract_json_response(&engine, "anthropic", &descriptor, &doc);
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 3);
        assert_eq!(usage.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn anthropic_streaming_scenario() {
        let catalog = Catalog::load().unwrap();
        let descriptor = catalog.get("anthropic").unwrap();
        let engine = PathEngine::new();
        let body = "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"model\":\"claude-sonnet-4\",\"usage\":{\"input_tokens\":42,\"cache_read_input_tokens\":7}}}\n\nevent: message_delta\ndata: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":9},\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n";
        let usage = extract_streaming_response(&engine, "anthropic", &descriptor, body);
        assert_eq!(usage.input_tokens, 42);
        assert_eq!(usage.output_tokens, 9);
        assert_eq!(usage.cache_read_tokens, 7);
    }

    #[test]
    fn openai_done_marker_scenario() {
        let catalog = Catalog::load().unwrap();
        let descriptor = catalog.get("openai").unwrap();
        let engine = PathEngine::new();
        let body = "data: {\"model\":\"gpt-4o\",\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2},\"choices\":[{\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n";
        let usage = extract_streaming_response(&engine, "openai", &descriptor, body);
        assert_eq!(usage.input_tokens, 5);
        assert_eq!(usage.output_tokens, 2);
        assert_eq!(usage.stop_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn gemini_json_array_scenario() {
        let catalog = Catalog::load().unwrap();
        let descriptor = catalog.get("gemini").unwrap();
        let engine = PathEngine::new();
        let body = r#"[{"usageMetadata":{"promptTokenCount":1}},{"usageMetadata":{"promptTokenCount":11,"candidatesTokenCount":4,"cachedContentTokenCount":1}}]"#;
        let usage = extract_streaming_response(&engine, "gemini", &descriptor, body);
        assert_eq!(usage.input_tokens, 11);
        assert_eq!(usage.output_tokens, 4);
        assert_eq!(usage.cache_read_tokens, 1);
    }

    #[test]
    fn last_write_wins_across_frames() {
        let engine = PathEngine::new();
        let frames = vec![
            Frame { data: json!({"type": "a", "tokens": 1}) },
            Frame { data: json!({"type": "a", "tokens": 2}) },
        ];
        let result = extract_field_over_frames(&engine, &frames, Some("*"), Some("tokens"), &[]);
        assert_eq!(result, Some(json!(2)));
    }
}
