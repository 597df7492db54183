// Hand-written per-provider request extractors, used only when the generic
// path-driven extraction in `request.rs` fails its quality gate. Each one
// enumerates the known message shapes for that provider rather than relying
// on path expressions, trading generality for a couple of known shapes
// parsed exactly right.

use crate::model::RequestRecord;
use serde_json::Value;

fn content_to_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Pulls plain text out of an Anthropic-shaped `content` value: a bare
/// string, a list of strings/typed blocks (each block contributing its
/// `text` field, or recursing into a nested `content`), or a single typed
/// block. Mirrors the original parser's recursive handling rather than
/// assuming one shape.
fn extract_text_from_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(_) => {
                    if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                        Some(text.to_string())
                    } else {
                        item.get("content").map(extract_text_from_content)
                    }
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" "),
        Value::Object(_) => {
            if let Some(text) = content.get("text").and_then(|t| t.as_str()) {
                text.to_string()
            } else if let Some(nested) = content.get("content") {
                extract_text_from_content(nested)
            } else {
                String::new()
            }
        }
        _ => String::new(),
    }
}

fn parse_anthropic(body: &Value) -> RequestRecord {
    let model = body.get("model").and_then(|v| v.as_str()).map(str::to_string);
    let mut texts = Vec::new();
    let mut messages = Vec::new();

    let system = body.get("system").and_then(|s| {
        let text = extract_text_from_content(s);
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    });
    if let Some(system_text) = &system {
        texts.push(system_text.clone());
        messages.push(serde_json::json!({"role": "system", "content": system_text}));
    }

    for msg in body.get("messages").and_then(|v| v.as_array()).into_iter().flatten() {
        let role = msg.get("role").and_then(|r| r.as_str()).unwrap_or("unknown");
        let content = msg.get("content").map(extract_text_from_content).unwrap_or_default();
        messages.push(serde_json::json!({"role": role, "content": content}));
        texts.push(content);
    }

    let tools = body.get("tools").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    let is_streaming = body.get("stream").and_then(|v| v.as_bool()).unwrap_or(false);

    RequestRecord {
        provider: "anthropic".to_string(),
        model,
        messages,
        system,
        tools,
        is_streaming,
        total_text: texts.join("\n"),
    }
}

fn parse_openai(body: &Value) -> RequestRecord {
    let model = body.get("model").and_then(|v| v.as_str()).map(str::to_string);
    let messages: Vec<Value> = body
        .get("messages")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let system = messages
        .iter()
        .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("system"))
        .and_then(|m| m.get("content"))
        .map(content_to_text);
    let total_text = messages
        .iter()
        .filter_map(|m| m.get("content"))
        .map(content_to_text)
        .collect::<Vec<_>>()
        .join("\n");
    let tools = body
        .get("tools")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let is_streaming = body.get("stream").and_then(|v| v.as_bool()).unwrap_or(false);

    RequestRecord {
        provider: "openai".to_string(),
        model,
        messages,
        system,
        tools,
        is_streaming,
        total_text,
    }
}

fn parse_gemini(body: &Value) -> RequestRecord {
    let model = body.get("model").and_then(|v| v.as_str()).map(str::to_string);
    let contents: Vec<Value> = body
        .get("contents")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let system = body
        .get("systemInstruction")
        .and_then(|si| si.get("parts"))
        .and_then(|p| p.as_array())
        .and_then(|parts| parts.first())
        .and_then(|p| p.get("text"))
        .and_then(|t| t.as_str())
        .map(str::to_string);
    let total_text = contents
        .iter()
        .filter_map(|c| c.get("parts"))
        .filter_map(|p| p.as_array())
        .flat_map(|parts| parts.iter())
        .filter_map(|p| p.get("text"))
        .filter_map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    RequestRecord {
        provider: "gemini".to_string(),
        model,
        messages: contents,
        system,
        tools: Vec::new(),
        is_streaming: false,
        total_text,
    }
}

fn parse_amazon_q(body: &Value) -> RequestRecord {
    let user_input = body
        .get("conversationState")
        .and_then(|cs| cs.get("currentMessage"))
        .and_then(|cm| cm.get("userInputMessage"));
    let model = user_input
        .and_then(|u| u.get("modelId"))
        .and_then(|m| m.as_str())
        .map(str::to_string);
    let total_text = user_input
        .and_then(|u| u.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    let history = body
        .get("conversationState")
        .and_then(|cs| cs.get("history"))
        .and_then(|h| h.as_array())
        .cloned()
        .unwrap_or_default();

    RequestRecord {
        provider: "kiro".to_string(),
        model,
        messages: history,
        system: None,
        tools: Vec::new(),
        is_streaming: true,
        total_text,
    }
}

/// Dispatches to a provider-specific extractor by name. Returns `None` for
/// providers with no hand-written fallback (the generic record is used as-is
/// in that case).
pub fn extract_request(provider_name: &str, body: &Value) -> Option<RequestRecord> {
    match provider_name {
        "anthropic" => Some(parse_anthropic(body)),
        "openai" => Some(parse_openai(body)),
        "gemini" => Some(parse_gemini(body)),
        "kiro" => Some(parse_amazon_q(body)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn anthropic_handles_string_and_typed_block_system() {
        let body = json!({
            "model": "claude-sonnet-4",
            "system": [{"type": "text", "text": "be terse"}],
            "messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}]
        });
        let record = parse_anthropic(&body);
        assert_eq!(record.system.as_deref(), Some("be terse"));
        assert_eq!(record.messages.len(), 2);
        assert_eq!(record.total_text, "be terse\nhi");
    }

    #[test]
    fn openai_pulls_system_message_out_of_messages_array() {
        let body = json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hi"}
            ]
        });
        let record = parse_openai(&body);
        assert_eq!(record.system.as_deref(), Some("be terse"));
        assert_eq!(record.messages.len(), 2);
    }

    #[test]
    fn gemini_reads_nested_parts() {
        let body = json!({
            "contents": [{"parts": [{"text": "hello"}]}],
            "systemInstruction": {"parts": [{"text": "sys"}]}
        });
        let record = parse_gemini(&body);
        assert_eq!(record.total_text, "hello");
        assert_eq!(record.system.as_deref(), Some("sys"));
    }
}
