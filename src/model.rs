// Shared data types that flow between components: provider descriptors loaded
// by the catalog, the transient records produced while parsing a single flow,
// and the Event/Device documents persisted to the store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Path-expression triplet: a primary path plus ordered fallbacks, used for
/// every response token field.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PathWithFallbacks {
    pub path: Option<String>,
    #[serde(default)]
    pub alt: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderRequestConfig {
    pub model_path: Option<String>,
    pub messages_path: Option<String>,
    pub system_path: Option<String>,
    pub stream_param_path: Option<String>,
    #[serde(default)]
    pub text_fields: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderResponseJsonConfig {
    #[serde(default)]
    pub input_tokens_path: PathWithFallbacks,
    #[serde(default)]
    pub output_tokens_path: PathWithFallbacks,
    #[serde(default)]
    pub cache_creation_tokens_path: PathWithFallbacks,
    #[serde(default)]
    pub cache_read_tokens_path: PathWithFallbacks,
    #[serde(default)]
    pub model_path: PathWithFallbacks,
    #[serde(default)]
    pub stop_reason_path: PathWithFallbacks,
}

/// One token field inside an SSE/json-lines descriptor: the event-type gate
/// plus the usual primary+fallback paths.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SseFieldConfig {
    pub event: Option<String>,
    #[serde(flatten)]
    pub path: PathWithFallbacks,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFormat {
    Sse,
    JsonLines,
    SseOrJsonLines,
}

impl Default for StreamFormat {
    fn default() -> Self {
        StreamFormat::Sse
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderResponseSseConfig {
    #[serde(default)]
    pub format: StreamFormat,
    pub done_marker: Option<String>,
    #[serde(default)]
    pub use_last_chunk: bool,
    #[serde(default)]
    pub input_tokens: SseFieldConfig,
    #[serde(default)]
    pub output_tokens: SseFieldConfig,
    #[serde(default)]
    pub cache_creation_tokens: SseFieldConfig,
    #[serde(default)]
    pub cache_read_tokens: SseFieldConfig,
    #[serde(default)]
    pub model: SseFieldConfig,
    #[serde(default)]
    pub stop_reason: SseFieldConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderResponseConfig {
    #[serde(default)]
    pub json: ProviderResponseJsonConfig,
    pub sse: Option<ProviderResponseSseConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub cost_per_input_token: f64,
    #[serde(default)]
    pub cost_per_output_token: f64,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Provider {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub api_path_patterns: Vec<String>,
    #[serde(default)]
    pub capture_full_request: bool,
    #[serde(default)]
    pub capture_full_response: bool,
    #[serde(default)]
    pub request: ProviderRequestConfig,
    #[serde(default)]
    pub response: ProviderResponseConfig,
    #[serde(default)]
    pub metadata: ProviderMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    KnownOnly,
    CaptureAll,
}

impl Default for CaptureMode {
    fn default() -> Self {
        CaptureMode::KnownOnly
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
    pub version: String,
    pub description: Option<String>,
    #[serde(default)]
    pub capture_mode: CaptureMode,
    pub providers: HashMap<String, Provider>,
}

/// Resolved provider lookup result: the descriptor plus its catalog key, since
/// the "unknown" fallback still needs a name to stamp onto the event.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub name: String,
    pub descriptor: Provider,
}

#[derive(Debug, Clone, Default)]
pub struct RequestRecord {
    pub provider: String,
    pub model: Option<String>,
    pub messages: Vec<Value>,
    pub system: Option<String>,
    pub tools: Vec<Value>,
    pub is_streaming: bool,
    pub total_text: String,
}

#[derive(Debug, Clone, Default)]
pub struct UsageRecord {
    pub provider: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub model: Option<String>,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextMetadata {
    #[serde(default)]
    pub program_name: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub custom: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub os_family: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    pub provider: String,
    pub host: String,
    pub path: String,
    pub model: Option<String>,
    pub user_agent: Option<String>,
    pub client_type: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub estimated_input_tokens: u64,
    pub messages: Vec<Value>,
    pub response_status: u16,
    pub response_stop_reason: Option<String>,
    pub streaming: bool,
    pub context: ContextMetadata,
    pub program: Option<String>,
    pub project: Option<String>,
    pub provider_tags: Vec<String>,
    pub estimated_cost: f64,
    pub capture_mode: CaptureMode,
    pub device: DeviceInfo,
    pub device_id: String,
    pub is_token_consuming: bool,
    pub has_budget_tokens: bool,
    pub raw_request: Option<Value>,
    pub raw_response: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub name: String,
    pub first_seen: chrono::DateTime<chrono::Utc>,
    pub metadata: Value,
}
