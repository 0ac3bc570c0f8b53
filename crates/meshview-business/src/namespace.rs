//! Namespaces visible to the current caller

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Namespace;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use meshview_common::Error;

use crate::client::IstioClient;

/// Namespace name to creation time
///
/// The creation time is `None` when the API server did not report one.
pub type AccessibleNamespaces = BTreeMap<String, Option<DateTime<Utc>>>;

/// Anything able to report the caller's accessible namespaces
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccessibleNamespaceSource: Send + Sync {
    /// Namespaces the caller may observe; empty when they cannot be listed
    async fn accessible_namespaces(&self) -> AccessibleNamespaces;
}

/// Namespace queries running as one caller
#[derive(Clone)]
pub struct NamespaceService {
    client: Arc<dyn IstioClient>,
}

impl NamespaceService {
    /// Create a service over the caller's client
    pub fn new(client: Arc<dyn IstioClient>) -> Self {
        Self { client }
    }

    /// Fetch one namespace, failing when the caller cannot see it
    pub async fn get_namespace(&self, name: &str) -> Result<Namespace, Error> {
        self.client.get_namespace(name).await.map_err(|e| {
            if e.is_forbidden() {
                Error::forbidden(format!("Requested namespace [{}] is not accessible.", name))
            } else {
                e
            }
        })
    }
}

#[async_trait]
impl AccessibleNamespaceSource for NamespaceService {
    async fn accessible_namespaces(&self) -> AccessibleNamespaces {
        match self.client.list_namespaces().await {
            Ok(namespaces) => namespaces
                .into_iter()
                .filter_map(|ns| {
                    let created = ns.metadata.creation_timestamp.map(|t| t.0);
                    ns.metadata.name.map(|name| (name, created))
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to list namespaces, treating none as accessible");
                AccessibleNamespaces::new()
            }
        }
    }
}
