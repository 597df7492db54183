//! Backward-compat direct mode: an axum listener clients can point at
//! directly (instead of routing through the CONNECT/MITM path). The request
//! path is matched against the catalog's `api_path_patterns` to resolve the
//! provider and its canonical upstream host, which is rewritten into both
//! the forwarded request and the host handed to the correlator; requests
//! whose path matches no known provider fall back to the configured
//! `direct_upstream`. Grounded on the original reverse-proxy handler: build a
//! pooled reqwest client once, run every request and the one catch-all
//! handler through it, forward the original headers and User-Agent
//! untouched since some providers validate on it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};

use super::error::ProxyError;
use super::state::ProxyState;
use crate::correlator::Pipeline;

pub async fn start_direct_mode(
    bind_addr: SocketAddr,
    upstream_base: String,
    pipeline: Arc<Pipeline>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .pool_max_idle_per_host(10)
        .http1_only()
        .build()
        .context("failed to build upstream HTTP client")?;

    let state = ProxyState::new(client, pipeline);
    let upstream_base = Arc::new(upstream_base);

    let app = Router::new()
        .route("/health", get(health))
        .route(
            "/*path",
            any(move |state, headers, req| proxy_handler(state, headers, req, upstream_base.clone())),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context("failed to bind direct-mode listener")?;
    tracing::info!(%bind_addr, "direct mode listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.await.ok();
        })
        .await
        .context("direct mode server error")?;

    tracing::info!("direct mode shut down");
    Ok(())
}

async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({"status": "ok", "proxy": true}))
}

async fn proxy_handler(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    req: Request<Body>,
    upstream_base: Arc<String>,
) -> Result<Response, ProxyError> {
    let start = Instant::now();
    let flow_id = state.next_flow_id();

    let method = req.method().clone();
    let uri = req.uri().clone();
    let remote_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("127.0.0.1")
        .to_string();

    let body_bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| ProxyError::BodyRead(e.to_string()))?;
    let json_body: Option<serde_json::Value> = serde_json::from_slice(&body_bytes).ok();

    let header_map: crate::correlator::HeaderMap = headers
        .iter()
        .map(|(k, v)| (k.as_str().to_ascii_lowercase(), v.to_str().unwrap_or("").to_string()))
        .collect();

    let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or("");

    // Direct-mode clients rarely set a Host the catalog recognizes (they
    // usually point straight at this proxy's loopback address), so the
    // provider and its canonical upstream host are resolved from the request
    // path's `api_path_patterns` match instead, and that resolved host - not
    // the client-supplied one - is what's fed into the catalog-driven
    // pipeline and the forwarded request alike.
    let (host, forward_url) = match state.pipeline.catalog.get_provider_by_path(uri.path()) {
        Some((_, _, canonical_host)) => {
            let url = format!("https://{canonical_host}{path_and_query}");
            (canonical_host, url)
        }
        None => {
            let fallback_host = reqwest::Url::parse(&upstream_base)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string());
            (fallback_host, format!("{upstream_base}{path_and_query}"))
        }
    };

    let captured = state
        .pipeline
        .on_request(flow_id, &host, uri.path(), &remote_ip, &header_map, json_body.as_ref())
        .is_some();

    let forward_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|e| ProxyError::Upstream(format!("invalid method: {e}")))?;

    let mut forward_headers = reqwest::header::HeaderMap::new();
    for (name, value) in headers.iter() {
        if name == axum::http::header::HOST {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            forward_headers.insert(name, value);
        }
    }

    let upstream_resp = state
        .client
        .request(forward_method, &forward_url)
        .headers(forward_headers)
        .body(body_bytes.to_vec())
        .send()
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    let status = upstream_resp.status().as_u16();
    let content_type = upstream_resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let response_bytes = upstream_resp.bytes().await.map_err(|e| ProxyError::Upstream(e.to_string()))?;

    if captured {
        state.pipeline.on_response_headers(flow_id, &content_type);
        state.pipeline.on_response_chunk(flow_id, &response_bytes);
        state.pipeline.on_response_complete(flow_id, status).await;
    }

    tracing::debug!(flow_id, %method, path = %uri.path(), status, elapsed_ms = start.elapsed().as_millis() as u64, "forwarded");

    let response = Response::builder()
        .status(status)
        .header(axum::http::header::CONTENT_TYPE, content_type)
        .body(Body::from(response_bytes))
        .unwrap();
    Ok(response)
}
