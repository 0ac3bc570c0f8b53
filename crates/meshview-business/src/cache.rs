//! Read/invalidate contract for the optional Istio resource cache

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use meshview_common::Error;

use crate::client::IstioObject;
use crate::resources::ResourceKind;

/// Cache of Istio configuration shared across requests
///
/// Reads happen concurrently from aggregation tasks. The config service only
/// reads a kind when both `check_istio_resource` and `check_namespace` hold,
/// and asks for a namespace refresh after every successful mutation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IstioCache: Send + Sync {
    /// Whether the cache tracks this kind
    fn check_istio_resource(&self, kind: ResourceKind) -> bool;

    /// Whether the cache holds a warm copy of this namespace
    fn check_namespace(&self, namespace: &str) -> bool;

    /// Cached objects of `kind` in `namespace`
    async fn get_istio_resources(
        &self,
        kind: ResourceKind,
        namespace: &str,
    ) -> Result<Vec<IstioObject>, Error>;

    /// Drop the cached copy of `namespace` so the next read goes upstream
    fn refresh_namespace(&self, namespace: &str);
}
