// tokentap - observability proxy for LLM API traffic
//
// Intercepts outbound HTTPS calls to LLM providers (via CONNECT/TLS-MITM, or
// a backward-compat direct reverse-proxy mode), recognizes the provider from
// a data-driven catalog, extracts token usage and caller metadata from the
// request/response bodies, and persists a normalized event per exchange to
// a local SQLite store queryable over a small admin HTTP API.

mod catalog;
mod config;
mod context;
mod correlator;
mod extract;
mod flow;
mod logging;
mod model;
mod pathexpr;
mod pricing;
mod proxy;
mod sanitize;
mod store;
mod stream;
mod tokens;

use anyhow::Context as _;
use catalog::Catalog;
use config::Config;
use correlator::Pipeline;
use flow::FlowTable;
use pathexpr::PathEngine;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use store::{api::AdminState, EventStore};
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    Config::ensure_config_exists().context("failed to write starter config")?;
    let config = Config::load().context("failed to load configuration")?;

    logging::init(config.debug);
    tracing::info!(mitm_bind = %config.mitm_bind, direct_bind = %config.direct_bind, admin_bind = %config.admin_bind, "tokentap starting");

    let catalog = Arc::new(Catalog::load().context("failed to load provider catalog")?);
    std::fs::create_dir_all(
        config
            .database_path
            .parent()
            .unwrap_or_else(|| std::path::Path::new(".")),
    )?;
    let store = Arc::new(EventStore::open(&config.database_path).context("failed to open event store")?);
    let flows = Arc::new(FlowTable::new());

    let pipeline = Arc::new(Pipeline {
        catalog: catalog.clone(),
        store: store.clone(),
        flows: flows.clone(),
        engine: PathEngine::new(),
        debug: config.debug,
    });

    let admin_token = load_or_generate_admin_token(&config.admin_token_path)?;

    let (mitm_shutdown_tx, mitm_shutdown_rx) = oneshot::channel();
    let (direct_shutdown_tx, direct_shutdown_rx) = oneshot::channel();
    let (admin_shutdown_tx, admin_shutdown_rx) = oneshot::channel();

    let root_ca = proxy::ca::load_or_generate_root_ca()?;
    tracing::info!(
        "root CA ready; trust it on the client to intercept TLS traffic: {}",
        dirs::home_dir().unwrap_or_default().join(".tokentap/ca/root-ca.pem").display()
    );
    let cert_cache = Arc::new(proxy::ca::CertCache::new(root_ca));

    let upstream_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .pool_max_idle_per_host(10)
        .build()
        .context("failed to build upstream HTTP client")?;

    let mitm_handle = tokio::spawn(proxy::mitm::start_mitm_listener(
        config.mitm_bind,
        cert_cache,
        upstream_client.clone(),
        pipeline.clone(),
        mitm_shutdown_rx,
    ));

    let direct_handle = tokio::spawn(proxy::server::start_direct_mode(
        config.direct_bind,
        config.direct_upstream.clone(),
        pipeline.clone(),
        direct_shutdown_rx,
    ));

    let admin_state = AdminState {
        store: store.clone(),
        catalog: catalog.clone(),
        reload_lock: Arc::new(flow::ReloadLock::default()),
        admin_token: admin_token.clone(),
    };
    let admin_bind = config.admin_bind;
    let admin_handle = tokio::spawn(async move {
        let app = store::api::router(admin_state);
        let listener = tokio::net::TcpListener::bind(admin_bind).await?;
        tracing::info!(%admin_bind, "admin query API listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                admin_shutdown_rx.await.ok();
            })
            .await?;
        Ok::<(), std::io::Error>(())
    });

    let sweep_flows = flows.clone();
    let sweep_interval = config.sweep_interval_secs;
    let sweep_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(sweep_interval));
        loop {
            ticker.tick().await;
            let evicted = sweep_flows.sweep();
            if evicted > 0 {
                tracing::debug!(evicted, "swept abandoned flows");
            }
        }
    });

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl_c")?;
    tracing::info!("shutdown signal received, draining listeners");

    let _ = mitm_shutdown_tx.send(());
    let _ = direct_shutdown_tx.send(());
    let _ = admin_shutdown_tx.send(());
    sweep_handle.abort();

    let _ = mitm_handle.await;
    let _ = direct_handle.await;
    let _ = admin_handle.await;

    tracing::info!("tokentap shut down");
    Ok(())
}

/// Loads the persisted admin token, generating a fresh random one on first
/// run and writing it at `0600`; the on-disk file is the source of truth,
/// not an env var, so a restart doesn't invalidate every already-configured
/// admin client.
fn load_or_generate_admin_token(path: &std::path::Path) -> anyhow::Result<String> {
    if path.exists() {
        return Ok(std::fs::read_to_string(path)?.trim().to_string());
    }
    std::fs::create_dir_all(path.parent().unwrap_or_else(|| std::path::Path::new(".")))?;

    use rand::RngCore;
    let mut entropy = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut entropy);
    let mut hasher = Sha256::new();
    hasher.update(entropy);
    let token = format!("{:x}", hasher.finalize());

    std::fs::write(path, &token)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    tracing::info!(path = %path.display(), "generated new admin token");
    Ok(token)
}
