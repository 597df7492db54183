// Structural message sanitization: redacts extracted text while preserving
// the `type` discriminator on multi-part content blocks, so downstream
// categorization (text vs. image vs. tool-use) survives even though the
// actual content never leaves the process. Used for every persisted event
// unless the global debug flag is set.

use serde_json::{json, Value};

const REDACTED: &str = "[REDACTED]";

fn sanitize_content(content: &Value) -> Value {
    match content {
        Value::String(s) if s.is_empty() => json!(""),
        Value::String(_) => json!(REDACTED),
        Value::Array(parts) => Value::Array(parts.iter().map(sanitize_block).collect()),
        other => other.clone(),
    }
}

fn sanitize_block(block: &Value) -> Value {
    let Some(obj) = block.as_object() else {
        return block.clone();
    };
    let block_type = obj.get("type").and_then(|v| v.as_str());
    match block_type {
        Some("text") => json!({"type": "text", "text": REDACTED}),
        Some(other_type) => json!({"type": other_type}),
        None => json!({}),
    }
}

/// Redacts a `messages[]` array down to `{role, content}` pairs, replacing
/// free text with `"[REDACTED]"` and collapsing non-text blocks to their
/// bare `{type}` discriminator.
pub fn sanitize_messages(messages: &[Value]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let role = m.get("role").cloned().unwrap_or(json!("unknown"));
            let content = m
                .get("content")
                .map(sanitize_content)
                .unwrap_or(json!(REDACTED));
            json!({"role": role, "content": content})
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_message_redacted() {
        let messages = vec![json!({"role": "user", "content": "hello there"})];
        let sanitized = sanitize_messages(&messages);
        assert_eq!(sanitized[0]["content"], json!(REDACTED));
        assert_eq!(sanitized[0]["role"], json!("user"));
    }

    #[test]
    fn empty_string_stays_empty() {
        let messages = vec![json!({"role": "user", "content": ""})];
        let sanitized = sanitize_messages(&messages);
        assert_eq!(sanitized[0]["content"], json!(""));
    }

    #[test]
    fn multi_part_content_preserves_type_discriminator() {
        let messages = vec![json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "hi"},
                {"type": "tool_use", "id": "t1", "name": "search", "input": {}}
            ]
        })];
        let sanitized = sanitize_messages(&messages);
        let blocks = sanitized[0]["content"].as_array().unwrap();
        assert_eq!(blocks[0], json!({"type": "text", "text": REDACTED}));
        assert_eq!(blocks[1], json!({"type": "tool_use"}));
    }

    #[test]
    fn no_content_beyond_redacted_marker_or_structural_placeholder() {
        let messages = vec![json!({
            "role": "assistant",
            "content": [{"type": "image", "source": {"data": "base64..."}}]
        })];
        let sanitized = sanitize_messages(&messages);
        let block = &sanitized[0]["content"][0];
        assert_eq!(block, &json!({"type": "image"}));
    }
}
