//! Proxy error types and response handling

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("failed to read request body: {0}")]
    BodyRead(String),
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("TLS handshake failed: {0}")]
    Tls(String),
    #[error("certificate generation failed: {0}")]
    CertGen(String),
    #[error("malformed CONNECT target: {0}")]
    BadConnectTarget(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        tracing::error!("{self}");
        let status = match &self {
            ProxyError::BadConnectTarget(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };
        (status, self.to_string()).into_response()
    }
}
