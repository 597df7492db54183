// Provider Catalog: loads the built-in descriptor file embedded in the
// binary, deep-merges a user override from `<home>/.tokentap/providers.json`
// if present, and answers `get_provider_by_domain` lookups for the flow
// correlator. Reload swaps the singleton atomically so in-flight flows never
// observe a half-updated catalog.

use crate::model::{CaptureMode, Provider, ProvidersConfig};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::RwLock;

const BASE_CATALOG: &str = include_str!("data.json");

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to parse built-in provider catalog: {0}")]
    BaseParse(serde_json::Error),
    #[error("user override at {path:?} is not valid JSON: {source}")]
    OverrideParse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid capture_mode: must be \"known_only\" or \"capture_all\"")]
    InvalidCaptureMode,
    #[error("provider {0:?} is missing required fields")]
    InvalidProvider(String),
}

/// Recursively merges `override_val` onto `base`: objects merge key by key,
/// any other value (including arrays) is replaced wholesale by the override.
pub fn deep_merge(base: &Value, override_val: &Value) -> Value {
    match (base, override_val) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged = base_map.clone();
            for (k, v) in override_map {
                let next = match merged.get(k) {
                    Some(existing) => deep_merge(existing, v),
                    None => v.clone(),
                };
                merged.insert(k.clone(), next);
            }
            Value::Object(merged)
        }
        (_, override_val) => override_val.clone(),
    }
}

fn user_override_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".tokentap").join("providers.json"))
}

fn validate(config: &ProvidersConfig) -> Result<(), CatalogError> {
    for (name, provider) in &config.providers {
        if name != "unknown" && provider.domains.is_empty() {
            return Err(CatalogError::InvalidProvider(name.clone()));
        }
    }
    Ok(())
}

fn load_config() -> Result<ProvidersConfig, CatalogError> {
    let base_value: Value = serde_json::from_str(BASE_CATALOG).map_err(CatalogError::BaseParse)?;

    let merged = match user_override_path() {
        Some(path) if path.exists() => match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(override_value) => {
                    tracing::info!("merged provider catalog override from {:?}", path);
                    deep_merge(&base_value, &override_value)
                }
                Err(source) => return Err(CatalogError::OverrideParse { path, source }),
            },
            Err(e) => {
                tracing::warn!("could not read provider override {:?}: {}", path, e);
                base_value
            }
        },
        _ => base_value,
    };

    let config: ProvidersConfig =
        serde_json::from_value(merged).map_err(CatalogError::BaseParse)?;
    validate(&config)?;
    Ok(config)
}

pub struct Catalog {
    inner: RwLock<ProvidersConfig>,
}

impl Catalog {
    pub fn load() -> Result<Self, CatalogError> {
        let config = load_config()?;
        Ok(Self {
            inner: RwLock::new(config),
        })
    }

    /// Replaces the singleton atomically from a freshly reloaded config file.
    pub fn reload(&self) -> Result<(), CatalogError> {
        let config = load_config()?;
        *self.inner.write().unwrap() = config;
        Ok(())
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.inner.read().unwrap().capture_mode
    }

    /// Returns the first enabled provider whose domain list contains `host`
    /// exactly or as a suffix. `unknown` is skipped during the scan and only
    /// returned as a `capture_all` fallback.
    pub fn get_provider_by_domain(&self, host: &str) -> Option<(String, Provider)> {
        let config = self.inner.read().unwrap();
        for (name, provider) in &config.providers {
            if name == "unknown" || !provider.enabled {
                continue;
            }
            let matched = provider
                .domains
                .iter()
                .any(|d| host == d.as_str() || host.ends_with(d.as_str()));
            if matched {
                return Some((name.clone(), provider.clone()));
            }
        }
        if config.capture_mode == CaptureMode::CaptureAll {
            if let Some(unknown) = config.providers.get("unknown") {
                if unknown.enabled {
                    return Some(("unknown".to_string(), unknown.clone()));
                }
            }
        }
        None
    }

    pub fn get(&self, name: &str) -> Option<Provider> {
        self.inner.read().unwrap().providers.get(name).cloned()
    }

    /// Looks up the provider whose `api_path_patterns` matches `path`, for
    /// direct-mode requests where the client never set a recognizable Host.
    /// Returns the provider's first configured domain as the canonical
    /// upstream host to rewrite to.
    pub fn get_provider_by_path(&self, path: &str) -> Option<(String, Provider, String)> {
        let config = self.inner.read().unwrap();
        for (name, provider) in &config.providers {
            if name == "unknown" || !provider.enabled {
                continue;
            }
            let matched = provider.api_path_patterns.iter().any(|p| path.contains(p.as_str()));
            if matched {
                let host = provider.domains.first()?.clone();
                return Some((name.clone(), provider.clone(), host));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_with_empty_override_is_identity() {
        let base = json!({"a": {"b": 1, "c": 2}, "d": 3});
        let merged = deep_merge(&base, &json!({}));
        assert_eq!(merged, base);
    }

    #[test]
    fn deep_merge_overrides_leaves_recursively() {
        let base = json!({"a": {"b": 1, "c": 2}});
        let over = json!({"a": {"b": 99}});
        let merged = deep_merge(&base, &over);
        assert_eq!(merged, json!({"a": {"b": 99, "c": 2}}));
    }

    #[test]
    fn base_catalog_loads_and_validates() {
        let catalog = Catalog::load().expect("built-in catalog must parse");
        assert_eq!(catalog.capture_mode(), CaptureMode::KnownOnly);
        assert!(catalog.get("anthropic").is_some());
    }

    #[test]
    fn domain_suffix_match() {
        let catalog = Catalog::load().unwrap();
        let (name, _) = catalog
            .get_provider_by_domain("api.anthropic.com")
            .expect("exact domain should match");
        assert_eq!(name, "anthropic");

        let (name, _) = catalog
            .get_provider_by_domain("eu.api.anthropic.com")
            .expect("suffix-extended domain should match");
        assert_eq!(name, "anthropic");

        assert!(catalog.get_provider_by_domain("example.com").is_none());
    }

    #[test]
    fn path_pattern_match_resolves_canonical_host() {
        let catalog = Catalog::load().unwrap();
        let (name, _, host) = catalog
            .get_provider_by_path("/v1/messages")
            .expect("anthropic's messages path should match");
        assert_eq!(name, "anthropic");
        assert_eq!(host, "api.anthropic.com");

        assert!(catalog.get_provider_by_path("/unrecognized").is_none());
    }
}
