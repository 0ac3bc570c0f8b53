//! Runtime configuration
//!
//! Loaded once at startup: defaults, then an optional YAML file, then
//! `MESHVIEW_*` environment overrides. The resulting `MeshConfig` is passed
//! down explicitly; nothing reads configuration from globals.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Error;

/// Default namespace hosting the Istio control plane
pub const DEFAULT_ISTIO_NAMESPACE: &str = "istio-system";

/// Host suffix used by multi-cluster ServiceEntries (`<name>.<namespace>.global`)
pub const DEFAULT_MULTI_CLUSTER_HOST_SUFFIX: &str = "global";

/// Default bound on concurrent per-kind fetches during aggregation
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

const ENV_ISTIO_NAMESPACE: &str = "MESHVIEW_ISTIO_NAMESPACE";
const ENV_MULTI_CLUSTER_SUFFIX: &str = "MESHVIEW_MULTI_CLUSTER_SUFFIX";
const ENV_CACHE_ENABLED: &str = "MESHVIEW_CACHE_ENABLED";
const ENV_FETCH_CONCURRENCY: &str = "MESHVIEW_FETCH_CONCURRENCY";

/// Mesh-wide settings shared by every business-layer service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MeshConfig {
    /// Namespace where istiod and the gateways run
    pub istio_namespace: String,
    /// Third label of multi-cluster service hosts
    pub multi_cluster_host_suffix: String,
    /// Whether the resource cache should be consulted before live fetches
    pub cache_enabled: bool,
    /// Maximum number of resource kinds fetched at once
    pub fetch_concurrency: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            istio_namespace: DEFAULT_ISTIO_NAMESPACE.to_string(),
            multi_cluster_host_suffix: DEFAULT_MULTI_CLUSTER_HOST_SUFFIX.to_string(),
            cache_enabled: false,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }
}

impl MeshConfig {
    /// Load configuration from an optional YAML file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::internal_with_context(
                        "config",
                        format!("failed to read {}: {}", path.display(), e),
                    )
                })?;
                Self::from_yaml(&raw)?
            }
            None => Self::default(),
        };
        config.with_overrides(|key| std::env::var(key).ok())
    }

    /// Parse configuration from a YAML document; missing keys take defaults
    pub fn from_yaml(raw: &str) -> Result<Self, Error> {
        serde_yaml::from_str(raw)
            .map_err(|e| Error::serialization_for_kind("MeshConfig", e.to_string()))
    }

    /// Apply `MESHVIEW_*` overrides read through `lookup`
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, Error> {
        if let Some(ns) = lookup(ENV_ISTIO_NAMESPACE) {
            self.istio_namespace = ns;
        }
        if let Some(suffix) = lookup(ENV_MULTI_CLUSTER_SUFFIX) {
            self.multi_cluster_host_suffix = suffix;
        }
        if let Some(raw) = lookup(ENV_CACHE_ENABLED) {
            self.cache_enabled = raw.parse().map_err(|_| {
                Error::internal_with_context(
                    "config",
                    format!("{} must be true or false, got [{}]", ENV_CACHE_ENABLED, raw),
                )
            })?;
        }
        if let Some(raw) = lookup(ENV_FETCH_CONCURRENCY) {
            self.fetch_concurrency = raw.parse().map_err(|_| {
                Error::internal_with_context(
                    "config",
                    format!("{} must be a positive integer, got [{}]", ENV_FETCH_CONCURRENCY, raw),
                )
            })?;
        }
        self.validate()?;
        debug!(config = ?self, "mesh configuration loaded");
        Ok(self)
    }

    /// Reject settings that would make the services unusable
    pub fn validate(&self) -> Result<(), Error> {
        if self.istio_namespace.is_empty() {
            return Err(Error::internal_with_context(
                "config",
                "istioNamespace must not be empty",
            ));
        }
        if self.fetch_concurrency == 0 {
            return Err(Error::internal_with_context(
                "config",
                "fetchConcurrency must be at least 1",
            ));
        }
        Ok(())
    }

    /// Whether `namespace` is the Istio control plane namespace
    pub fn is_istio_namespace(&self, namespace: &str) -> bool {
        namespace == self.istio_namespace
    }

    /// FQDN of the egress gateway service in the control plane namespace
    pub fn egress_gateway_host(&self) -> String {
        format!("istio-egressgateway.{}.svc.cluster.local", self.istio_namespace)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_stock_istio_install() {
        let config = MeshConfig::default();
        assert_eq!(config.istio_namespace, "istio-system");
        assert_eq!(config.multi_cluster_host_suffix, "global");
        assert!(!config.cache_enabled);
        assert_eq!(
            config.egress_gateway_host(),
            "istio-egressgateway.istio-system.svc.cluster.local"
        );
    }

    #[test]
    fn yaml_fills_missing_keys_with_defaults() {
        let config = MeshConfig::from_yaml("istioNamespace: mesh-control\ncacheEnabled: true\n")
            .unwrap();
        assert_eq!(config.istio_namespace, "mesh-control");
        assert!(config.cache_enabled);
        assert_eq!(config.fetch_concurrency, DEFAULT_FETCH_CONCURRENCY);
    }

    #[test]
    fn env_overrides_win_over_file() {
        let config = MeshConfig::from_yaml("istioNamespace: from-file\n")
            .unwrap()
            .with_overrides(env(&[
                ("MESHVIEW_ISTIO_NAMESPACE", "from-env"),
                ("MESHVIEW_FETCH_CONCURRENCY", "3"),
            ]))
            .unwrap();
        assert_eq!(config.istio_namespace, "from-env");
        assert_eq!(config.fetch_concurrency, 3);
        assert!(config.is_istio_namespace("from-env"));
        assert!(!config.is_istio_namespace("from-file"));
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let err = MeshConfig::default()
            .with_overrides(env(&[("MESHVIEW_CACHE_ENABLED", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("MESHVIEW_CACHE_ENABLED"));

        let err = MeshConfig::default()
            .with_overrides(env(&[("MESHVIEW_FETCH_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("fetchConcurrency"));
    }

    #[test]
    fn malformed_yaml_is_a_serialization_error() {
        let err = MeshConfig::from_yaml("fetchConcurrency: [1, 2]").unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }
}
