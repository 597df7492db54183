// Flow Correlator (C6) state: the in-flight record tracked from request
// through response-complete, plus the flow table that holds one per
// concurrently open HTTPS exchange and the periodic sweep that evicts
// abandoned entries.

use crate::model::{ContextMetadata, Provider};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

/// Cap on retained streaming bytes per flow; beyond this, further chunks are
/// dropped and `truncated` is set, rather than buffering unboundedly.
pub const MAX_CHUNK_BYTES: usize = 4 * 1024 * 1024;

/// Ceiling past which an abandoned flow is evicted by the periodic sweep.
pub const FLOW_EVICTION_CEILING: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Sse,
    EventStream,
}

pub struct FlowState {
    pub started_at: Instant,
    pub provider_name: Option<String>,
    pub provider_descriptor: Option<Provider>,
    pub context: ContextMetadata,
    pub is_streaming: bool,
    pub stream_type: Option<StreamType>,
    pub chunks: Vec<u8>,
    pub truncated: bool,
    pub request_body: Option<Value>,
    pub host: String,
    pub path: String,
    pub user_agent: Option<String>,
    pub remote_ip: String,
}

impl FlowState {
    pub fn new(host: String, path: String) -> Self {
        Self {
            started_at: Instant::now(),
            provider_name: None,
            provider_descriptor: None,
            context: ContextMetadata::default(),
            is_streaming: false,
            stream_type: None,
            chunks: Vec::new(),
            truncated: false,
            request_body: None,
            host,
            path,
            user_agent: None,
            remote_ip: String::new(),
        }
    }

    pub fn append_chunk(&mut self, bytes: &[u8]) {
        if self.chunks.len() >= MAX_CHUNK_BYTES {
            self.truncated = true;
            return;
        }
        let remaining = MAX_CHUNK_BYTES - self.chunks.len();
        if bytes.len() > remaining {
            self.chunks.extend_from_slice(&bytes[..remaining]);
            self.truncated = true;
        } else {
            self.chunks.extend_from_slice(bytes);
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn is_abandoned(&self) -> bool {
        self.started_at.elapsed() > FLOW_EVICTION_CEILING
    }
}

/// Maps an opaque proxy flow id to its in-flight state. Entries are created
/// on request and removed on response-complete; the sweep removes anything
/// left over from a flow the proxy library never completed.
#[derive(Default)]
pub struct FlowTable {
    flows: Mutex<HashMap<u64, FlowState>>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, flow_id: u64, state: FlowState) {
        self.flows.lock().unwrap().insert(flow_id, state);
    }

    pub fn remove(&self, flow_id: u64) -> Option<FlowState> {
        self.flows.lock().unwrap().remove(&flow_id)
    }

    pub fn with_mut<R>(&self, flow_id: u64, f: impl FnOnce(&mut FlowState) -> R) -> Option<R> {
        self.flows.lock().unwrap().get_mut(&flow_id).map(f)
    }

    /// Evicts flows older than `FLOW_EVICTION_CEILING`; returns how many
    /// were dropped, for the caller to log.
    pub fn sweep(&self) -> usize {
        let mut flows = self.flows.lock().unwrap();
        let before = flows.len();
        flows.retain(|_, state| !state.is_abandoned());
        before - flows.len()
    }

    pub fn len(&self) -> usize {
        self.flows.lock().unwrap().len()
    }
}

/// Serializes access to catalog hot-reload so concurrent reload requests
/// don't race each other's file reads; the catalog itself is internally
/// synchronized for reads.
pub type ReloadLock = AsyncMutex<()>;

const TELEMETRY_PATH_SUBSTRINGS: [&str; 3] = ["/telemetry", "/metrics", "/clienttelemetry"];

pub fn is_telemetry_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    TELEMETRY_PATH_SUBSTRINGS.iter().any(|s| lower.contains(s))
}

pub fn is_telemetry_header(amz_target: Option<&str>) -> bool {
    amz_target
        .map(|v| v.contains("SendTelemetryEvent") || v.contains("SendTelemetry"))
        .unwrap_or(false)
}

fn has_budget_tokens(body: &Value) -> bool {
    let truthy = |v: &Value| match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::Null => false,
        _ => true,
    };
    if let Some(v) = body.get("budget_tokens") {
        if truthy(v) {
            return true;
        }
    }
    if let Some(v) = body.get("thinking").and_then(|t| t.get("budget_tokens")) {
        if truthy(v) {
            return true;
        }
    }
    false
}

/// `is_token_consuming = true` iff the request carries budget tokens, or any
/// of messages/prompt/contents, and the provider isn't `"unknown"`.
pub fn is_token_consuming(body: &Value, provider_name: &str) -> bool {
    if provider_name == "unknown" {
        return false;
    }
    has_budget_tokens(body)
        || body.get("messages").is_some()
        || body.get("prompt").is_some()
        || body.get("contents").is_some()
}

pub fn has_budget_tokens_flag(body: &Value) -> bool {
    has_budget_tokens(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn telemetry_path_matches_case_insensitively() {
        assert!(is_telemetry_path("/Telemetry/batch"));
        assert!(is_telemetry_path("/api/METRICS"));
        assert!(!is_telemetry_path("/v1/messages"));
    }

    #[test]
    fn telemetry_header_matches_substrings() {
        assert!(is_telemetry_header(Some("SendTelemetryEvent")));
        assert!(is_telemetry_header(Some("com.amazon.SendTelemetry")));
        assert!(!is_telemetry_header(Some("GenerateAssistantResponse")));
    }

    #[test]
    fn token_consuming_requires_known_provider() {
        let body = json!({"messages": [{"role": "user", "content": "hi"}]});
        assert!(is_token_consuming(&body, "anthropic"));
        assert!(!is_token_consuming(&body, "unknown"));
    }

    #[test]
    fn token_consuming_detects_nested_budget_tokens() {
        let body = json!({"thinking": {"budget_tokens": 1024}});
        assert!(is_token_consuming(&body, "anthropic"));
    }

    #[test]
    fn chunk_accumulation_caps_at_limit() {
        let mut state = FlowState::new("host".into(), "/path".into());
        state.append_chunk(&vec![0u8; MAX_CHUNK_BYTES + 10]);
        assert_eq!(state.chunks.len(), MAX_CHUNK_BYTES);
        assert!(state.truncated);
    }
}
