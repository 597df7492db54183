//! CONNECT tunneling and TLS termination: accepts a client's `CONNECT
//! host:port` request, answers "200 Connection Established", then performs
//! a TLS handshake against the client using a leaf certificate minted for
//! that host by the root CA, so the plaintext HTTP/1.1 requests inside the
//! tunnel can be parsed, forwarded upstream over a fresh TLS connection, and
//! run through the same correlator pipeline as direct mode.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

use super::ca::CertCache;
use super::error::ProxyError;
use crate::correlator::{HeaderMap as PipelineHeaders, Pipeline};

#[derive(Clone)]
struct MitmService {
    host: String,
    client: reqwest::Client,
    pipeline: Arc<Pipeline>,
    remote_ip: String,
}

pub async fn start_mitm_listener(
    bind_addr: SocketAddr,
    cert_cache: Arc<CertCache>,
    client: reqwest::Client,
    pipeline: Arc<Pipeline>,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(%bind_addr, "MITM listener accepting CONNECT tunnels");

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                tracing::info!("MITM listener shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("accept failed: {e}");
                        continue;
                    }
                };
                let cert_cache = cert_cache.clone();
                let client = client.clone();
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, cert_cache, client, pipeline).await {
                        tracing::debug!(%peer, "connection ended: {e}");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    cert_cache: Arc<CertCache>,
    client: reqwest::Client,
    pipeline: Arc<Pipeline>,
) -> anyhow::Result<()> {
    let host = read_connect_target(&mut stream).await?;
    stream
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;

    let host_only = host.split(':').next().unwrap_or(&host).to_string();
    let server_config = cert_cache.server_config_for(&host_only)?;
    let acceptor = TlsAcceptor::from(Arc::new(server_config));
    let tls_stream = acceptor.accept(stream).await?;
    let io = TokioIo::new(tls_stream);

    let service = MitmService {
        host: host_only,
        client,
        pipeline,
        remote_ip: peer.ip().to_string(),
    };

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(
            io,
            hyper::service::service_fn(move |req| {
                let service = service.clone();
                async move { service.handle(req).await }
            }),
        )
        .await
        .map_err(|e| anyhow::anyhow!("hyper connection error: {e}"))?;

    Ok(())
}

/// Reads just the request line and headers of a `CONNECT` request off the
/// plain (pre-TLS) stream and returns the `host:port` target.
async fn read_connect_target(stream: &mut TcpStream) -> Result<String, ProxyError> {
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| ProxyError::BadConnectTarget(e.to_string()))?;
        if n == 0 {
            return Err(ProxyError::BadConnectTarget("connection closed before CONNECT".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > 8192 {
            return Err(ProxyError::BadConnectTarget("CONNECT request too large".into()));
        }
    }
    let text = String::from_utf8_lossy(&buf);
    let first_line = text.lines().next().unwrap_or("");
    let mut parts = first_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let target = parts.next().unwrap_or("");
    if method != "CONNECT" || target.is_empty() {
        return Err(ProxyError::BadConnectTarget(first_line.to_string()));
    }
    Ok(target.to_string())
}

impl MitmService {
    async fn handle(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
        match self.forward(req).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                tracing::error!(host = %self.host, "MITM forward failed: {e}");
                Ok(Response::builder()
                    .status(502)
                    .body(Full::new(Bytes::from_static(b"upstream error")))
                    .unwrap())
            }
        }
    }

    async fn forward(&self, req: Request<Incoming>) -> anyhow::Result<Response<Full<Bytes>>> {
        let start = Instant::now();
        let flow_id = rand_flow_id();

        let method = req.method().clone();
        let path = req.uri().path_and_query().map(|p| p.as_str().to_string()).unwrap_or_default();
        let headers: PipelineHeaders = req
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_ascii_lowercase(), v.to_str().unwrap_or("").to_string()))
            .collect();

        let body_bytes = req.collect().await?.to_bytes();
        let json_body: Option<serde_json::Value> = serde_json::from_slice(&body_bytes).ok();

        let captured = self
            .pipeline
            .on_request(flow_id, &self.host, &path, &self.remote_ip, &headers, json_body.as_ref())
            .is_some();

        let url = format!("https://{}{}", self.host, path);
        let forward_method = reqwest::Method::from_bytes(method.as_str().as_bytes())?;
        let mut forward_headers = reqwest::header::HeaderMap::new();
        for (name, value) in &headers {
            if name == "host" {
                continue;
            }
            if let (Ok(n), Ok(v)) = (
                reqwest::header::HeaderName::from_bytes(name.as_bytes()),
                reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
            ) {
                forward_headers.insert(n, v);
            }
        }

        let upstream = self
            .client
            .request(forward_method, &url)
            .headers(forward_headers)
            .body(body_bytes.to_vec())
            .send()
            .await?;

        let status = upstream.status().as_u16();
        let content_type = upstream
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let response_bytes = upstream.bytes().await?;

        if captured {
            self.pipeline.on_response_headers(flow_id, &content_type);
            self.pipeline.on_response_chunk(flow_id, &response_bytes);
            self.pipeline.on_response_complete(flow_id, status).await;
        }

        tracing::debug!(flow_id, host = %self.host, path = %path, status, elapsed_ms = start.elapsed().as_millis() as u64, "MITM forwarded");

        Ok(Response::builder()
            .status(status)
            .header(hyper::header::CONTENT_TYPE, content_type)
            .body(Full::new(response_bytes))
            .unwrap())
    }
}

fn rand_flow_id() -> u64 {
    use rand::Rng;
    rand::thread_rng().gen()
}
