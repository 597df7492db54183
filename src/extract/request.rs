// Request Extractor (C3): generic path-driven extraction with a quality
// gate, falling back to provider-specific hand-written extractors when the
// generic pass looks like it missed structure the caller clearly sent.

use crate::extract::fallback;
use crate::model::{Provider, RequestRecord};
use crate::pathexpr::PathEngine;
use serde_json::Value;

fn flatten_text(values: &[Value]) -> String {
    let mut parts = Vec::new();
    for v in values {
        collect_strings(v, &mut parts);
    }
    parts.join("\n")
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

fn quality_gate_passes(body: &Value, record: &RequestRecord) -> bool {
    let original_message_count = body
        .get("messages")
        .and_then(|m| m.as_array())
        .map(Vec::len)
        .unwrap_or(record.messages.len());
    if original_message_count > 1 && record.messages.len() == 1 {
        return false;
    }
    let original_system_nonempty = body
        .get("system")
        .and_then(|v| v.as_str())
        .map(|s| !s.is_empty())
        .unwrap_or(false);
    if original_system_nonempty && record.system.as_deref().unwrap_or("").is_empty() {
        return false;
    }
    let original_tools_nonempty = body
        .get("tools")
        .and_then(|v| v.as_array())
        .map(|a| !a.is_empty())
        .unwrap_or(false);
    if original_tools_nonempty && record.tools.is_empty() {
        return false;
    }
    true
}

/// Extracts a normalized `RequestRecord` from the raw JSON body of a request
/// matched to `provider_name`/`descriptor`.
pub fn extract_request(
    engine: &PathEngine,
    provider_name: &str,
    descriptor: &Provider,
    body: &Value,
) -> RequestRecord {
    let req = &descriptor.request;
    let model = engine.extract(body, req.model_path.as_deref(), None).and_then(|v| v.as_str().map(str::to_string));
    let messages = engine.extract_all(body, req.messages_path.as_deref());
    let system = engine
        .extract(body, req.system_path.as_deref(), None)
        .and_then(|v| v.as_str().map(str::to_string));
    let is_streaming = engine
        .extract(body, req.stream_param_path.as_deref(), Some(Value::Bool(false)))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let tools = body
        .get("tools")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let mut text_values = Vec::new();
    for field in &req.text_fields {
        text_values.extend(engine.extract_all(body, Some(field)));
    }
    let total_text = flatten_text(&text_values);

    let record = RequestRecord {
        provider: provider_name.to_string(),
        model,
        messages,
        system,
        tools,
        is_streaming,
        total_text,
    };

    if quality_gate_passes(body, &record) {
        record
    } else {
        tracing::debug!(
            provider = provider_name,
            "generic request extraction failed quality gate, falling back"
        );
        fallback::extract_request(provider_name, body).unwrap_or(record)
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
        let body = json!({"model":"claude-sonnet-4","messages":[{"role":"user","content":"hi"}]});
        let record = extract_request(&engine, "anthropic", &descriptor, &body);
        assert_eq!(record.model.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(record.messages.len(), 1);
        assert!(!record.is_streaming);
    }

    #[test]
    fn quality_gate_rejects_collapsed_messages() {
        let body = json!({"messages": [{"role":"user","content":"a"},{"role":"assistant","content":"b"}]});
        let collapsed = RequestRecord {
            messages: vec![json!({"role":"user","content":"a"})],
            ..Default::default()
        };
        assert!(!quality_gate_passes(&body, &collapsed));
    }
}
