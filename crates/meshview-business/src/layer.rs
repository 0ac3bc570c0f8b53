//! Business layer wiring
//!
//! The binary builds one [`BusinessContext`] during startup and shares it
//! across requests. Each request then asks the context for a [`Layer`],
//! which binds the shared cache and configuration to a cluster client
//! running as the caller.

use std::sync::Arc;

use tracing::{debug, info};

use meshview_common::{Error, MeshConfig};

use crate::cache::IstioCache;
use crate::client::{CallerIdentity, ClientFactory, IstioClient};
use crate::istio_config::IstioConfigService;
use crate::namespace::NamespaceService;

/// Process-wide collaborators shared by every request
pub struct BusinessContext {
    config: Arc<MeshConfig>,
    factory: Arc<dyn ClientFactory>,
    cache: Option<Arc<dyn IstioCache>>,
}

impl BusinessContext {
    /// Validate configuration and assemble the shared collaborators
    ///
    /// A supplied cache is dropped when `cacheEnabled` is false.
    pub fn init(
        config: MeshConfig,
        factory: Arc<dyn ClientFactory>,
        cache: Option<Arc<dyn IstioCache>>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let cache = if config.cache_enabled {
            cache
        } else {
            if cache.is_some() {
                debug!("cache supplied but disabled by configuration");
            }
            None
        };

        info!(
            istio_namespace = %config.istio_namespace,
            cache = cache.is_some(),
            fetch_concurrency = config.fetch_concurrency,
            "business context initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            factory,
            cache,
        })
    }

    /// Shared mesh configuration
    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Services acting on behalf of `identity`
    pub fn layer(&self, identity: &CallerIdentity) -> Result<Layer, Error> {
        let client = self.factory.client_for(identity)?;
        Ok(self.layer_with(client))
    }

    /// Services acting as the service's own identity
    pub fn unauthenticated_layer(&self) -> Result<Layer, Error> {
        let client = self.factory.service_client()?;
        Ok(self.layer_with(client))
    }

    fn layer_with(&self, client: Arc<dyn IstioClient>) -> Layer {
        Layer {
            istio_config: IstioConfigService::new(
                client.clone(),
                self.cache.clone(),
                self.config.clone(),
            ),
            namespace: NamespaceService::new(client),
        }
    }
}

/// Per-request business services
#[derive(Clone)]
pub struct Layer {
    /// Istio configuration aggregation and mutation
    pub istio_config: IstioConfigService,
    /// Namespace visibility
    pub namespace: NamespaceService,
}
