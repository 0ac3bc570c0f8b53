//! Business layer for meshview
//!
//! Aggregates Istio configuration per namespace, reads and mutates single
//! objects, and reports caller permissions. Every service runs through a
//! per-caller cluster client obtained from a [`BusinessContext`].

pub mod cache;
pub mod client;
pub mod istio_config;
pub mod layer;
pub mod models;
pub mod namespace;
pub mod resources;

pub use cache::IstioCache;
pub use client::{
    CallerIdentity, CapabilityProbe, ClientFactory, IstioClient, IstioObject, KubeClientFactory,
    KubeIstioClient,
};
pub use istio_config::{IstioConfigCriteria, IstioConfigService};
pub use layer::{BusinessContext, Layer};
pub use models::{IstioConfigDetails, IstioConfigList, IstioConfigPermissions, ResourcePermissions};
pub use namespace::{AccessibleNamespaceSource, AccessibleNamespaces, NamespaceService};
pub use resources::{get_istio_api, ApiGroup, ResourceKind};

// Re-export common error types
pub use meshview_common::{Error, Result};
