//! Root CA generation/loading and per-host leaf certificate issuance for the
//! MITM listener. The root CA is generated once, saved under
//! `<home>/.tokentap/ca/`, and reused on every later run so installing it in
//! the client's trust store only has to happen once; leaf certificates are
//! generated lazily per host the proxy has intercepted and cached in memory
//! for the life of the process.

use rcgen::{CertificateParams, DistinguishedName, DnType, IsCa, KeyPair, KeyUsagePurpose};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use super::error::ProxyError;

pub struct RootCa {
    pub cert_der: rcgen::CertificateParams,
    pub key_pair: KeyPair,
    pub cert_pem: String,
    pub key_pem: String,
}

fn ca_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tokentap")
        .join("ca")
}

fn root_ca_params() -> Result<CertificateParams, ProxyError> {
    let mut params = CertificateParams::new(Vec::<String>::new())
        .map_err(|e| ProxyError::CertGen(e.to_string()))?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "tokentap local MITM root CA");
    dn.push(DnType::OrganizationName, "tokentap");
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    Ok(params)
}

/// Loads the root CA from disk, generating and persisting a fresh one if
/// none exists yet (first run).
pub fn load_or_generate_root_ca() -> Result<RootCa, ProxyError> {
    let dir = ca_dir();
    let cert_path = dir.join("root-ca.pem");
    let key_path = dir.join("root-ca-key.pem");

    if cert_path.exists() && key_path.exists() {
        let cert_pem = std::fs::read_to_string(&cert_path).map_err(|e| ProxyError::CertGen(e.to_string()))?;
        let key_pem = std::fs::read_to_string(&key_path).map_err(|e| ProxyError::CertGen(e.to_string()))?;
        let key_pair = KeyPair::from_pem(&key_pem).map_err(|e| ProxyError::CertGen(e.to_string()))?;
        let params = root_ca_params()?;
        return Ok(RootCa {
            cert_der: params,
            key_pair,
            cert_pem,
            key_pem,
        });
    }

    std::fs::create_dir_all(&dir).map_err(|e| ProxyError::CertGen(e.to_string()))?;
    let params = root_ca_params()?;
    let key_pair = KeyPair::generate().map_err(|e| ProxyError::CertGen(e.to_string()))?;
    let cert = params
        .clone()
        .self_signed(&key_pair)
        .map_err(|e| ProxyError::CertGen(e.to_string()))?;
    let cert_pem = cert.pem();
    let key_pem = key_pair.serialize_pem();

    std::fs::write(&cert_path, &cert_pem).map_err(|e| ProxyError::CertGen(e.to_string()))?;
    std::fs::write(&key_path, &key_pem).map_err(|e| ProxyError::CertGen(e.to_string()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600));
    }

    tracing::info!(path = %cert_path.display(), "generated new root CA; install it in the client trust store");

    Ok(RootCa {
        cert_der: params,
        key_pair,
        cert_pem,
        key_pem,
    })
}

struct Leaf {
    cert_chain: Vec<rustls::pki_types::CertificateDer<'static>>,
    key: rustls::pki_types::PrivateKeyDer<'static>,
}

/// Caches one generated leaf certificate per intercepted host for the life
/// of the process; hosts are rarely more than a few dozen per run so no
/// eviction policy is needed.
pub struct CertCache {
    root: RootCa,
    root_der: rustls::pki_types::CertificateDer<'static>,
    leaves: RwLock<HashMap<String, Leaf>>,
}

impl CertCache {
    pub fn new(root: RootCa) -> Self {
        let root_der = rustls_pemfile::certs(&mut root.cert_pem.as_bytes())
            .next()
            .and_then(|r| r.ok())
            .expect("root CA pem was just generated or loaded from our own on-disk file");
        Self {
            root,
            root_der,
            leaves: RwLock::new(HashMap::new()),
        }
    }

    pub fn root_cert_pem(&self) -> &str {
        &self.root.cert_pem
    }

    pub fn server_config_for(&self, host: &str) -> Result<tokio_rustls::rustls::ServerConfig, ProxyError> {
        if !self.leaves.read().unwrap().contains_key(host) {
            let leaf = self.generate_leaf(host)?;
            self.leaves.write().unwrap().insert(host.to_string(), leaf);
        }
        let leaves = self.leaves.read().unwrap();
        let leaf = leaves.get(host).expect("just inserted");
        tokio_rustls::rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(leaf.cert_chain.clone(), leaf.key.clone_key())
            .map_err(|e| ProxyError::Tls(e.to_string()))
    }

    fn generate_leaf(&self, host: &str) -> Result<Leaf, ProxyError> {
        let mut params = CertificateParams::new(vec![host.to_string()])
            .map_err(|e| ProxyError::CertGen(e.to_string()))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, host);
        params.distinguished_name = dn;
        params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        params.not_after = rcgen::date_time_ymd(2035, 1, 1);

        let leaf_key = KeyPair::generate().map_err(|e| ProxyError::CertGen(e.to_string()))?;
        let root_cert = self
            .root
            .cert_der
            .clone()
            .self_signed(&self.root.key_pair)
            .map_err(|e| ProxyError::CertGen(e.to_string()))?;
        let leaf_cert = params
            .signed_by(&leaf_key, &root_cert, &self.root.key_pair)
            .map_err(|e| ProxyError::CertGen(e.to_string()))?;

        let cert_der = rustls::pki_types::CertificateDer::from(leaf_cert.der().to_vec());
        let key_der = rustls::pki_types::PrivateKeyDer::try_from(leaf_key.serialize_der())
            .map_err(|e| ProxyError::CertGen(e.to_string()))?;

        Ok(Leaf {
            cert_chain: vec![cert_der, self.root_der.clone()],
            key: key_der,
        })
    }
}
