// Flow Correlator (C6) orchestration: the request/response-headers/response
// lifecycle hooks a proxy listener calls as a single HTTPS exchange moves
// through the pipeline. Ties together the catalog (C1), request extraction
// (C3), stream decoding (C5), response extraction (C4), device/context
// identification (C7), sanitization, and the event store (C8) into the one
// coherent flow the rest of the crate's components only model in isolation.

use crate::catalog::Catalog;
use crate::context::{self, HEADER_CONTEXT, HEADER_PROGRAM, HEADER_PROJECT, HEADER_SESSION};
use crate::extract;
use crate::flow::{self, FlowState, FlowTable, StreamType};
use crate::model::{DeviceInfo, Event};
use crate::pathexpr::PathEngine;
use crate::pricing;
use crate::sanitize;
use crate::store::EventStore;
use crate::stream;
use crate::tokens;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Pipeline {
    pub catalog: Arc<Catalog>,
    pub store: Arc<EventStore>,
    pub flows: Arc<FlowTable>,
    pub engine: PathEngine,
    pub debug: bool,
}

/// Headers carried from the request into the flow, keyed lower-case, used
/// both for provider matching hints and the caller-metadata extraction.
pub type HeaderMap = HashMap<String, String>;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).map(String::as_str)
}

impl Pipeline {
    /// Called once the request line and headers are known and the body has
    /// been fully buffered. Matches the provider, runs the request
    /// extractor, and seeds a `FlowState` the later hooks fill in. Returns
    /// `None` when the request should not be captured at all (telemetry
    /// traffic, or an unknown provider under `known_only` capture mode).
    pub fn on_request(
        &self,
        flow_id: u64,
        host: &str,
        path: &str,
        remote_ip: &str,
        headers: &HeaderMap,
        body: Option<&Value>,
    ) -> Option<()> {
        if flow::is_telemetry_path(path) || flow::is_telemetry_header(header(headers, "x-amz-target")) {
            return None;
        }

        // `get_provider_by_domain` already folds in the capture_all unknown
        // fallback; `None` here means "don't capture this at all".
        let (provider_name, descriptor) = self.catalog.get_provider_by_domain(host)?;

        let mut state = FlowState::new(host.to_string(), path.to_string());
        state.remote_ip = remote_ip.to_string();
        state.user_agent = header(headers, "user-agent").map(str::to_string);
        state.provider_name = Some(provider_name.clone());
        state.provider_descriptor = Some(descriptor.clone());
        state.request_body = body.cloned();

        state.context = context::extract_context_metadata(
            header(headers, HEADER_PROGRAM),
            header(headers, HEADER_PROJECT),
            header(headers, HEADER_SESSION),
            header(headers, HEADER_CONTEXT),
        );

        if let Some(body) = body {
            let record = extract::request::extract_request(&self.engine, &provider_name, &descriptor, body);
            state.is_streaming = record.is_streaming;
        }

        self.flows.insert(flow_id, state);
        Some(())
    }

    /// Called once response status and headers are known. Classifies the
    /// stream type from the content-type header so the later chunk
    /// accumulation knows whether to expect SSE/json-lines text or an
    /// opaque AWS event-stream.
    pub fn on_response_headers(&self, flow_id: u64, content_type: &str) {
        self.flows.with_mut(flow_id, |state| {
            if stream::is_eventstream_content_type(content_type) {
                state.stream_type = Some(StreamType::EventStream);
            } else if stream::is_sse_content_type(content_type) || state.is_streaming {
                state.stream_type = Some(StreamType::Sse);
            }
        });
    }

    /// Called as each body chunk arrives; accumulates bytes up to the cap.
    pub fn on_response_chunk(&self, flow_id: u64, chunk: &[u8]) {
        self.flows.with_mut(flow_id, |state| state.append_chunk(chunk));
    }

    /// Called once the response is complete (or the connection closed).
    /// Builds the final `Event`, persists it, and removes the flow from the
    /// table. A flow the caller never registered (e.g. telemetry filtered
    /// out at request time) is a no-op.
    pub async fn on_response_complete(&self, flow_id: u64, status: u16) {
        let Some(state) = self.flows.remove(flow_id) else {
            return;
        };
        let Some(provider_name) = state.provider_name.clone() else {
            return;
        };
        let descriptor = state
            .provider_descriptor
            .clone()
            .unwrap_or_else(default_unknown_provider);

        let request_record = state
            .request_body
            .as_ref()
            .map(|body| extract::request::extract_request(&self.engine, &provider_name, &descriptor, body));

        let body_text = String::from_utf8_lossy(&state.chunks).into_owned();

        let usage = match state.stream_type {
            Some(StreamType::EventStream) => extract::response::extract_eventstream_response(
                &provider_name,
                request_record.as_ref().and_then(|r| r.model.clone()),
            ),
            Some(StreamType::Sse) => {
                extract::response::extract_streaming_response(&self.engine, &provider_name, &descriptor, &body_text)
            }
            None => {
                let doc: Value = serde_json::from_str(&body_text).unwrap_or(Value::Null);
                extract::response::extract_json_response(&self.engine, &provider_name, &descriptor, &doc)
            }
        };

        let model = usage.model.clone().or_else(|| request_record.as_ref().and_then(|r| r.model.clone()));
        let estimated_input_tokens = request_record
            .as_ref()
            .map(|r| tokens::estimate_tokens(&r.total_text))
            .unwrap_or(0);

        let os_family = state
            .user_agent
            .as_deref()
            .map(context::os_family_from_user_agent)
            .unwrap_or("unknown");
        let device_id = context::derive_device_id(
            state.request_body.as_ref(),
            &state.remote_ip,
            os_family,
            state.user_agent.as_deref().unwrap_or(""),
        );
        let client_type = context::classify_client_type(
            state.user_agent.as_deref().unwrap_or(""),
            &state.host,
            &provider_name,
        );
        let program = state
            .context
            .program_name
            .clone()
            .or_else(|| Some(client_type.to_string()));

        let has_budget_tokens = state
            .request_body
            .as_ref()
            .map(flow::has_budget_tokens_flag)
            .unwrap_or(false);
        let is_token_consuming = state
            .request_body
            .as_ref()
            .map(|body| flow::is_token_consuming(body, &provider_name))
            .unwrap_or(false);

        let messages = request_record.as_ref().map(|r| r.messages.clone()).unwrap_or_default();
        let messages = if self.debug {
            messages
        } else {
            sanitize::sanitize_messages(&messages)
        };

        let event = Event {
            id: None,
            timestamp: chrono::Utc::now(),
            duration_ms: state.elapsed_ms(),
            provider: provider_name.clone(),
            host: state.host.clone(),
            path: state.path.clone(),
            model,
            user_agent: state.user_agent.clone(),
            client_type: client_type.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
            cache_creation_tokens: usage.cache_creation_tokens,
            cache_read_tokens: usage.cache_read_tokens,
            estimated_input_tokens,
            messages,
            response_status: status,
            response_stop_reason: usage.stop_reason,
            streaming: state.stream_type.is_some(),
            context: state.context.clone(),
            program,
            project: state.context.project_name.clone(),
            provider_tags: descriptor.metadata.tags.clone(),
            estimated_cost: pricing::estimate_cost(
                descriptor.metadata.cost_per_input_token,
                descriptor.metadata.cost_per_output_token,
                usage.input_tokens,
                usage.output_tokens,
            ),
            capture_mode: self.catalog.capture_mode(),
            device: DeviceInfo {
                id: device_id.clone(),
                os_family: os_family.to_string(),
                user_agent: state.user_agent.clone().unwrap_or_default(),
            },
            device_id: device_id.clone(),
            is_token_consuming,
            has_budget_tokens,
            raw_request: if self.debug || descriptor.capture_full_request {
                state.request_body.clone()
            } else {
                None
            },
            raw_response: if self.debug || descriptor.capture_full_response {
                serde_json::from_str::<Value>(&body_text).ok()
            } else {
                None
            },
        };

        if let Err(e) = self.store.insert_event(event).await {
            tracing::error!(flow_id, "failed to persist event: {e}");
        }
    }
}

fn default_unknown_provider() -> crate::model::Provider {
    crate::model::Provider {
        enabled: true,
        domains: vec![],
        api_path_patterns: vec![],
        capture_full_request: false,
        capture_full_response: false,
        request: Default::default(),
        response: Default::default(),
        metadata: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EventStore;
    use serde_json::json;

    fn pipeline() -> Pipeline {
        Pipeline {
            catalog: Arc::new(Catalog::load().unwrap()),
            store: Arc::new(EventStore::open_in_memory().unwrap()),
            flows: Arc::new(FlowTable::new()),
            engine: PathEngine::new(),
            debug: false,
        }
    }

    #[tokio::test]
    async fn telemetry_requests_are_never_registered() {
        let p = pipeline();
        let result = p.on_request(1, "api.anthropic.com", "/v1/telemetry", "1.2.3.4", &HeaderMap::new(), None);
        assert!(result.is_none());
        assert_eq!(p.flows.len(), 0);
    }

    #[tokio::test]
    async fn known_provider_round_trips_through_full_pipeline() {
        let p = pipeline();
        let mut headers = HeaderMap::new();
        headers.insert("user-agent".to_string(), "claude-code/1.0".to_string());
        let body = json!({
            "model": "claude-sonnet-4-20250514",
            "stream": false,
            "messages": [{"role": "user", "content": "hello"}]
        });
        let result = p.on_request(2, "api.anthropic.com", "/v1/messages", "1.2.3.4", &headers, Some(&body));
        assert!(result.is_some());
        assert_eq!(p.flows.len(), 1);

        p.on_response_headers(2, "application/json");
        let response_body = json!({
            "model": "claude-sonnet-4-20250514",
            "usage": {"input_tokens": 12, "output_tokens": 7},
            "stop_reason": "end_turn"
        });
        p.on_response_chunk(2, response_body.to_string().as_bytes());
        p.on_response_complete(2, 200).await;

        assert_eq!(p.flows.len(), 0);
        let (events, total) = p.store.query_events(Default::default(), 0, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(events[0].input_tokens, 12);
        assert_eq!(events[0].output_tokens, 7);
        assert_eq!(events[0].messages[0]["content"], json!("[REDACTED]"));
    }

    #[tokio::test]
    async fn unknown_provider_skipped_under_known_only_mode() {
        let p = pipeline();
        let result = p.on_request(3, "some-random-vendor.example.com", "/v1/chat", "1.2.3.4", &HeaderMap::new(), None);
        assert!(result.is_none());
    }
}
