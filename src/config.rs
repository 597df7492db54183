//! Configuration for the proxy
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/tokentap/config.toml)
//! 3. Built-in defaults (lowest priority)
//!
//! The file is deserialized into `FileConfig`, where every field is
//! optional, then layered onto defaults; a config file that parses as
//! invalid TOML is a fail-fast startup error rather than a silently ignored
//! file. Recognized environment variables keep the names of the external
//! contract (`TOKENTAP_MONGO_URI`/`TOKENTAP_MONGO_DB`, `TOKENTAP_WEB_PORT`,
//! `TOKENTAP_NETWORK_MODE`, `TOKENTAP_DEBUG`) even though the storage engine
//! underneath is now embedded SQLite rather than MongoDB, so an existing
//! deployment's environment doesn't need to change.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file at {path:?} is not valid TOML: {source}")]
    Malformed { path: PathBuf, source: toml::de::Error },
    #[error("failed to read config file at {path:?}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid TOKENTAP_NETWORK_MODE {0:?}, expected \"local\" or \"network\"")]
    BadNetworkMode(String),
}

/// Deserialized shape of `config.toml`; every field optional so a partial
/// file only overrides what it names.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    web_port: Option<u16>,
    proxy_port: Option<u16>,
    direct_port: Option<u16>,
    network_mode: Option<String>,
    mongo_uri: Option<String>,
    mongo_db: Option<String>,
    direct_upstream: Option<String>,
    capture_mode: Option<String>,
    debug: Option<bool>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    Local,
    Network,
}

impl NetworkMode {
    fn bind_host(self) -> IpAddr {
        match self {
            NetworkMode::Local => IpAddr::V4(Ipv4Addr::LOCALHOST),
            NetworkMode::Network => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// The CONNECT/TLS-MITM forward-proxy listener (§6 "Proxy listener").
    pub mitm_bind: SocketAddr,
    /// The backward-compat direct-mode listener; beyond the named external
    /// contract (which only names one proxy port), kept on its own port so
    /// it doesn't collide with the MITM listener's CONNECT handling.
    pub direct_bind: SocketAddr,
    /// The event store query API ("dashboard"), bound per `TOKENTAP_NETWORK_MODE`
    /// on `TOKENTAP_WEB_PORT`.
    pub admin_bind: SocketAddr,
    pub direct_upstream: String,
    pub database_path: PathBuf,
    pub debug: bool,
    pub sweep_interval_secs: u64,
    pub admin_token_path: PathBuf,
}

fn config_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".config").join("tokentap")
}

fn data_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".tokentap")
}

fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

fn parse_network_mode(raw: &str) -> Result<NetworkMode, ConfigError> {
    match raw {
        "local" => Ok(NetworkMode::Local),
        "network" => Ok(NetworkMode::Network),
        other => Err(ConfigError::BadNetworkMode(other.to_string())),
    }
}

/// Interprets a `TOKENTAP_MONGO_URI`-style value as a SQLite file path: a
/// `mongodb://` URL is not actually reachable by this embedded store, so
/// anything that isn't one is treated as a filesystem path directly, and a
/// bare value paired with `TOKENTAP_MONGO_DB` uses the db name as the file
/// stem when the URI alone doesn't already look like a path to a file.
fn resolve_database_path(mongo_uri: Option<String>, mongo_db: Option<String>) -> PathBuf {
    match mongo_uri {
        Some(uri) if uri.starts_with("mongodb://") || uri.starts_with("mongodb+srv://") => {
            let stem = mongo_db.unwrap_or_else(|| "tokentap".to_string());
            data_dir().join(format!("{stem}.db"))
        }
        Some(path) => PathBuf::from(path),
        None => match mongo_db {
            Some(stem) => data_dir().join(format!("{stem}.db")),
            None => data_dir().join("events.db"),
        },
    }
}

impl Config {
    /// Writes a commented starter config file on first run; a no-op if one
    /// already exists.
    pub fn ensure_config_exists() -> std::io::Result<()> {
        let path = config_file_path();
        if path.exists() {
            return Ok(());
        }
        std::fs::create_dir_all(config_dir())?;
        std::fs::write(
            &path,
            "# tokentap configuration. Every key is optional; uncomment to override a default.\n\
             # web_port = 8081\n\
             # proxy_port = 8080\n\
             # direct_port = 8082\n\
             # network_mode = \"local\"\n\
             # mongo_uri = \"~/.tokentap/events.db\"\n\
             # mongo_db = \"tokentap\"\n\
             # direct_upstream = \"https://api.anthropic.com\"\n\
             # capture_mode = \"known_only\"\n\
             # debug = false\n\
             # sweep_interval_secs = 60\n",
        )
    }

    pub fn load() -> Result<Self, ConfigError> {
        let path = config_file_path();
        let file_config = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read { path: path.clone(), source: e })?;
            toml::from_str(&raw).map_err(|e| ConfigError::Malformed { path: path.clone(), source: e })?
        } else {
            FileConfig::default()
        };

        let network_mode_raw = std::env::var("TOKENTAP_NETWORK_MODE")
            .ok()
            .or(file_config.network_mode)
            .unwrap_or_else(|| "local".to_string());
        let network_mode = parse_network_mode(&network_mode_raw)?;
        let bind_host = network_mode.bind_host();

        let proxy_port = std::env::var("TOKENTAP_PROXY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file_config.proxy_port)
            .unwrap_or(8080);
        let web_port = std::env::var("TOKENTAP_WEB_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file_config.web_port)
            .unwrap_or(8081);
        let direct_port = std::env::var("TOKENTAP_DIRECT_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file_config.direct_port)
            .unwrap_or(8082);

        let direct_upstream = std::env::var("TOKENTAP_DIRECT_UPSTREAM")
            .ok()
            .or(file_config.direct_upstream)
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());

        let mongo_uri = std::env::var("TOKENTAP_MONGO_URI").ok().or(file_config.mongo_uri);
        let mongo_db = std::env::var("TOKENTAP_MONGO_DB").ok().or(file_config.mongo_db);
        let database_path = resolve_database_path(mongo_uri, mongo_db);

        let debug = std::env::var("TOKENTAP_DEBUG")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .or(file_config.debug)
            .unwrap_or(false);
        let sweep_interval_secs = std::env::var("TOKENTAP_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file_config.sweep_interval_secs)
            .unwrap_or(60);

        Ok(Config {
            mitm_bind: SocketAddr::new(bind_host, proxy_port),
            direct_bind: SocketAddr::new(bind_host, direct_port),
            admin_bind: SocketAddr::new(bind_host, web_port),
            direct_upstream,
            database_path,
            debug,
            sweep_interval_secs,
            admin_token_path: data_dir().join("admin_token"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_mode_rejects_garbage() {
        assert!(parse_network_mode("not-a-mode").is_err());
        assert_eq!(parse_network_mode("local").unwrap(), NetworkMode::Local);
        assert_eq!(parse_network_mode("network").unwrap(), NetworkMode::Network);
    }

    #[test]
    fn network_mode_controls_bind_host() {
        assert!(NetworkMode::Local.bind_host().is_loopback());
        assert!(NetworkMode::Network.bind_host().is_unspecified());
    }

    #[test]
    fn mongo_uri_treated_as_filesystem_path_when_not_a_mongodb_url() {
        let path = resolve_database_path(Some("/var/lib/tokentap/events.db".to_string()), None);
        assert_eq!(path, PathBuf::from("/var/lib/tokentap/events.db"));
    }

    #[test]
    fn mongodb_url_falls_back_to_a_local_file_named_after_the_db() {
        let path = resolve_database_path(Some("mongodb://localhost/tokentap".to_string()), Some("prod".to_string()));
        assert!(path.to_string_lossy().ends_with("prod.db"));
    }
}
