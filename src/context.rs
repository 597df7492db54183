// Device & Context Identifier (C7): derives a stable device fingerprint and
// extracts caller metadata from custom headers and the user-agent string.
// Grounded on the priority chain and header names the original interceptor
// used: session id beats an embedded device id beats a fingerprint beats a
// random fallback, so the dashboard can group traffic by caller even when
// the caller never sent an explicit id.

use crate::model::ContextMetadata;
use md5::Digest;
use serde_json::Value;

pub const HEADER_PROGRAM: &str = "x-tokentap-program";
pub const HEADER_PROJECT: &str = "x-tokentap-project";
pub const HEADER_SESSION: &str = "x-tokentap-session";
pub const HEADER_CONTEXT: &str = "x-tokentap-context";

/// Builds the `context` field from the caller-metadata headers. Unknown
/// top-level keys in `X-Tokentap-Context` land in `custom`; keys that match
/// a known field only fill it if the dedicated header didn't already.
pub fn extract_context_metadata(
    program_header: Option<&str>,
    project_header: Option<&str>,
    session_header: Option<&str>,
    context_header_json: Option<&str>,
) -> ContextMetadata {
    let mut ctx = ContextMetadata {
        program_name: program_header.map(str::to_string),
        project_name: project_header.map(str::to_string),
        session: session_header.map(str::to_string),
        custom: Default::default(),
    };

    if let Some(raw) = context_header_json {
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(raw) {
            for (key, value) in obj {
                match key.as_str() {
                    "program_name" | "program" if ctx.program_name.is_none() => {
                        ctx.program_name = value.as_str().map(str::to_string);
                    }
                    "project_name" | "project" if ctx.project_name.is_none() => {
                        ctx.project_name = value.as_str().map(str::to_string);
                    }
                    "session" if ctx.session.is_none() => {
                        ctx.session = value.as_str().map(str::to_string);
                    }
                    _ => {
                        ctx.custom.insert(key, value);
                    }
                }
            }
        }
    }

    ctx
}

/// Minimal substring-based OS-family classifier; the known caller surface is
/// small enough that a dependency for full user-agent parsing isn't worth
/// pulling in.
pub fn os_family_from_user_agent(ua: &str) -> &'static str {
    let lower = ua.to_ascii_lowercase();
    if lower.contains("windows") {
        "windows"
    } else if lower.contains("mac os") || lower.contains("macos") || lower.contains("darwin") {
        "macos"
    } else if lower.contains("android") {
        "android"
    } else if lower.contains("iphone") || lower.contains("ipad") || lower.contains("ios") {
        "ios"
    } else if lower.contains("linux") {
        "linux"
    } else {
        "unknown"
    }
}

fn events_field<'a>(body: &'a Value, field: &str) -> Option<&'a str> {
    body.get("events")?
        .as_array()?
        .first()?
        .get("event_data")?
        .get(field)?
        .as_str()
}

/// Derives the device fingerprint priority chain: session id from the body,
/// then an embedded device id, then a stable hash of (ip, os family, ua
/// prefix), then a random fallback.
pub fn derive_device_id(body: Option<&Value>, ip: &str, os_family: &str, user_agent: &str) -> String {
    if let Some(body) = body {
        if let Some(session_id) = events_field(body, "session_id") {
            if !session_id.is_empty() {
                return session_id.to_string();
            }
        }
        if let Some(device_id) = events_field(body, "device_id") {
            if !device_id.is_empty() {
                return device_id.to_string();
            }
        }
    }

    let ua_prefix: String = user_agent.chars().take(50).collect();
    let components = [ip, os_family, ua_prefix.as_str()];
    let fingerprint_input = components.iter().filter(|c| !c.is_empty()).copied().collect::<Vec<_>>().join("|");
    if fingerprint_input.is_empty() {
        return random_fallback_device_id();
    }
    let digest = md5::Md5::digest(fingerprint_input.as_bytes());
    let hex = format!("{digest:x}");
    format!("device-{}", &hex[..12])
}

/// Fallback device id for when no fingerprint component is available at all
/// (no ip, no user-agent).
pub fn random_fallback_device_id() -> String {
    use rand::Rng;
    let suffix: String = (0..8)
        .map(|_| {
            let n: u8 = rand::thread_rng().gen_range(0..16);
            std::char::from_digit(n as u32, 16).unwrap()
        })
        .collect();
    format!("unknown-{suffix}")
}

/// Client-type classification from user-agent and host, used both to fill
/// `client_type` and, when context's program is unset, to seed `program`.
pub fn classify_client_type(user_agent: &str, host: &str, provider: &str) -> &'static str {
    let ua = user_agent.to_ascii_lowercase();
    if ua.contains("kiro") {
        if ua.contains("cli") || ua.contains("command") {
            return "kiro-cli";
        }
        if ua.contains("ide") || ua.contains("editor") || ua.contains("vscode") {
            return "kiro-ide";
        }
        return "kiro-cli";
    }
    if ua.contains("claude") && ua.contains("code") {
        return "claude-code";
    }
    if host.contains("amazonaws.com") || provider == "kiro" {
        return "kiro-cli";
    }
    if provider == "anthropic" {
        return "claude-code";
    }
    "unknown"
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_header_json_merges_without_overwriting_known_fields() {
        let ctx = extract_context_metadata(
            Some("myprogram"),
            None,
            None,
            Some(r#"{"program_name":"ignored","project_name":"myproj","extra":"x"}"#),
        );
        assert_eq!(ctx.program_name.as_deref(), Some("myprogram"));
        assert_eq!(ctx.project_name.as_deref(), Some("myproj"));
        assert_eq!(ctx.custom.get("extra").unwrap(), "x");
    }

    #[test]
    fn device_id_prefers_session_id_over_fingerprint() {
        let body = json!({"events": [{"event_data": {"session_id": "sess-123"}}]});
        let id = derive_device_id(Some(&body), "1.2.3.4", "linux", "some-agent");
        assert_eq!(id, "sess-123");
    }

    #[test]
    fn device_id_is_pure_function_of_inputs() {
        let a = derive_device_id(None, "1.2.3.4", "linux", "ua-string");
        let b = derive_device_id(None, "1.2.3.4", "linux", "ua-string");
        assert_eq!(a, b);
    }

    #[test]
    fn device_id_falls_back_to_random_when_no_component_available() {
        let id = derive_device_id(None, "", "", "");
        assert!(id.starts_with("unknown-"));
    }

    #[test]
    fn client_type_claude_code() {
        assert_eq!(classify_client_type("claude-code/1.0", "api.anthropic.com", "anthropic"), "claude-code");
    }

    #[test]
    fn client_type_kiro_cli_default() {
        assert_eq!(classify_client_type("kiro-agent/1.0", "q.us-east-1.amazonaws.com", "kiro"), "kiro-cli");
    }

    #[test]
    fn client_type_kiro_ide() {
        assert_eq!(classify_client_type("kiro-vscode-extension", "", "kiro"), "kiro-ide");
    }

    #[test]
    fn os_family_detects_windows_and_mac() {
        assert_eq!(os_family_from_user_agent("Mozilla/5.0 (Windows NT 10.0)"), "windows");
        assert_eq!(os_family_from_user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X)"), "macos");
    }
}
