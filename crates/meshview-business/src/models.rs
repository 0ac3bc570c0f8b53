//! Response models returned by the config service

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::client::IstioObject;
use crate::resources::ResourceKind;

/// Every Istio configuration object of interest in one namespace
///
/// All collections are present even when a kind was not requested or does
/// not apply, so clients never see missing fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IstioConfigList {
    /// Namespace the list was built for
    pub namespace: String,
    pub gateways: Vec<IstioObject>,
    pub virtual_services: Vec<IstioObject>,
    pub destination_rules: Vec<IstioObject>,
    pub service_entries: Vec<IstioObject>,
    pub rules: Vec<IstioObject>,
    pub adapters: Vec<IstioObject>,
    pub templates: Vec<IstioObject>,
    pub quota_specs: Vec<IstioObject>,
    pub quota_spec_bindings: Vec<IstioObject>,
    pub policies: Vec<IstioObject>,
    pub mesh_policies: Vec<IstioObject>,
    pub service_mesh_policies: Vec<IstioObject>,
    pub cluster_rbac_configs: Vec<IstioObject>,
    pub rbac_configs: Vec<IstioObject>,
    pub service_mesh_rbac_configs: Vec<IstioObject>,
    pub sidecars: Vec<IstioObject>,
    pub service_roles: Vec<IstioObject>,
    pub service_role_bindings: Vec<IstioObject>,
    pub authorization_policies: Vec<IstioObject>,
    pub peer_authentications: Vec<IstioObject>,
    pub workload_entries: Vec<IstioObject>,
    pub request_authentications: Vec<IstioObject>,
    pub envoy_filters: Vec<IstioObject>,
    pub attribute_manifests: Vec<IstioObject>,
    pub http_api_spec_bindings: Vec<IstioObject>,
    pub http_api_specs: Vec<IstioObject>,
}

impl IstioConfigList {
    /// An empty list for `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Objects of one kind
    pub fn items(&self, kind: ResourceKind) -> &[IstioObject] {
        match kind {
            ResourceKind::Gateways => &self.gateways,
            ResourceKind::VirtualServices => &self.virtual_services,
            ResourceKind::DestinationRules => &self.destination_rules,
            ResourceKind::ServiceEntries => &self.service_entries,
            ResourceKind::Rules => &self.rules,
            ResourceKind::Adapters => &self.adapters,
            ResourceKind::Templates => &self.templates,
            ResourceKind::QuotaSpecs => &self.quota_specs,
            ResourceKind::QuotaSpecBindings => &self.quota_spec_bindings,
            ResourceKind::Policies => &self.policies,
            ResourceKind::MeshPolicies => &self.mesh_policies,
            ResourceKind::ServiceMeshPolicies => &self.service_mesh_policies,
            ResourceKind::ClusterRbacConfigs => &self.cluster_rbac_configs,
            ResourceKind::RbacConfigs => &self.rbac_configs,
            ResourceKind::ServiceMeshRbacConfigs => &self.service_mesh_rbac_configs,
            ResourceKind::Sidecars => &self.sidecars,
            ResourceKind::ServiceRoles => &self.service_roles,
            ResourceKind::ServiceRoleBindings => &self.service_role_bindings,
            ResourceKind::AuthorizationPolicies => &self.authorization_policies,
            ResourceKind::PeerAuthentications => &self.peer_authentications,
            ResourceKind::WorkloadEntries => &self.workload_entries,
            ResourceKind::RequestAuthentications => &self.request_authentications,
            ResourceKind::EnvoyFilters => &self.envoy_filters,
            ResourceKind::AttributeManifests => &self.attribute_manifests,
            ResourceKind::HttpApiSpecBindings => &self.http_api_spec_bindings,
            ResourceKind::HttpApiSpecs => &self.http_api_specs,
        }
    }

    /// Mutable collection for one kind
    pub fn items_mut(&mut self, kind: ResourceKind) -> &mut Vec<IstioObject> {
        match kind {
            ResourceKind::Gateways => &mut self.gateways,
            ResourceKind::VirtualServices => &mut self.virtual_services,
            ResourceKind::DestinationRules => &mut self.destination_rules,
            ResourceKind::ServiceEntries => &mut self.service_entries,
            ResourceKind::Rules => &mut self.rules,
            ResourceKind::Adapters => &mut self.adapters,
            ResourceKind::Templates => &mut self.templates,
            ResourceKind::QuotaSpecs => &mut self.quota_specs,
            ResourceKind::QuotaSpecBindings => &mut self.quota_spec_bindings,
            ResourceKind::Policies => &mut self.policies,
            ResourceKind::MeshPolicies => &mut self.mesh_policies,
            ResourceKind::ServiceMeshPolicies => &mut self.service_mesh_policies,
            ResourceKind::ClusterRbacConfigs => &mut self.cluster_rbac_configs,
            ResourceKind::RbacConfigs => &mut self.rbac_configs,
            ResourceKind::ServiceMeshRbacConfigs => &mut self.service_mesh_rbac_configs,
            ResourceKind::Sidecars => &mut self.sidecars,
            ResourceKind::ServiceRoles => &mut self.service_roles,
            ResourceKind::ServiceRoleBindings => &mut self.service_role_bindings,
            ResourceKind::AuthorizationPolicies => &mut self.authorization_policies,
            ResourceKind::PeerAuthentications => &mut self.peer_authentications,
            ResourceKind::WorkloadEntries => &mut self.workload_entries,
            ResourceKind::RequestAuthentications => &mut self.request_authentications,
            ResourceKind::EnvoyFilters => &mut self.envoy_filters,
            ResourceKind::AttributeManifests => &mut self.attribute_manifests,
            ResourceKind::HttpApiSpecBindings => &mut self.http_api_spec_bindings,
            ResourceKind::HttpApiSpecs => &mut self.http_api_specs,
        }
    }

    /// Total number of objects across all kinds
    pub fn len(&self) -> usize {
        crate::resources::ALL_RESOURCE_KINDS
            .iter()
            .map(|k| self.items(*k).len())
            .sum()
    }

    /// Whether no objects were found
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the caller may do with a kind in a namespace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePermissions {
    /// May create new objects
    pub create: bool,
    /// May update or patch existing objects
    pub update: bool,
    /// May delete objects
    pub delete: bool,
}

/// One object plus the caller's permissions on its kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IstioConfigDetails {
    /// Namespace of the object
    pub namespace: String,
    /// Resource type plural the object was requested as
    pub object_type: String,
    /// The object; absent for cluster-wide kinds outside the Istio namespace
    pub object: Option<IstioObject>,
    /// Caller permissions on the object's kind
    pub permissions: ResourcePermissions,
}

impl IstioConfigDetails {
    /// Details with no object and no permissions
    pub fn new(namespace: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            object_type: object_type.into(),
            object: None,
            permissions: ResourcePermissions::default(),
        }
    }
}

/// Permissions per resource type plural
pub type ResourcesPermissions = BTreeMap<String, ResourcePermissions>;

/// Permissions per namespace, then per resource type plural
pub type IstioConfigPermissions = BTreeMap<String, ResourcesPermissions>;
