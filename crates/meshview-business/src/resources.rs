//! Static registry of Istio configuration resource kinds
//!
//! Every kind the config service can list, read or mutate has exactly one
//! [`ResourceDescriptor`]. Adding a kind means adding a variant and a table
//! entry here; the aggregation, detail and mutation paths all dispatch
//! through the descriptor instead of matching on type strings.

use std::fmt;
use std::str::FromStr;

use kube::discovery::ApiResource;
use meshview_common::kube_utils::build_api_resource;
use meshview_common::Error;

/// API groups serving Istio and Maistra configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiGroup {
    /// networking.istio.io
    Networking,
    /// config.istio.io (Mixer)
    Config,
    /// authentication.istio.io
    Authentication,
    /// rbac.istio.io
    Rbac,
    /// authentication.maistra.io
    MaistraAuthentication,
    /// rbac.maistra.io
    MaistraRbac,
    /// security.istio.io
    Security,
}

impl ApiGroup {
    /// Group name as served by the API server
    pub fn group(&self) -> &'static str {
        match self {
            Self::Networking => "networking.istio.io",
            Self::Config => "config.istio.io",
            Self::Authentication => "authentication.istio.io",
            Self::Rbac => "rbac.istio.io",
            Self::MaistraAuthentication => "authentication.maistra.io",
            Self::MaistraRbac => "rbac.maistra.io",
            Self::Security => "security.istio.io",
        }
    }

    /// Version of the group this service speaks
    pub fn version(&self) -> &'static str {
        match self {
            Self::Networking => "v1alpha3",
            Self::Config => "v1alpha2",
            Self::Authentication | Self::Rbac => "v1alpha1",
            Self::MaistraAuthentication | Self::MaistraRbac => "v1",
            Self::Security => "v1beta1",
        }
    }

    /// Full `group/version` string
    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group(), self.version())
    }
}

/// Whether a kind lives inside a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
    /// Namespaced object
    Namespaced,
    /// Cluster-wide object, only shown for the Istio namespace
    Cluster,
}

/// Cluster flavors a kind is available on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFlavor {
    /// Served by both upstream Istio and Maistra
    Any,
    /// Upstream Istio only
    Istio,
    /// Maistra only
    Maistra,
}

impl MeshFlavor {
    /// Whether the kind is available on a cluster of the given flavor
    pub fn available(&self, is_maistra: bool) -> bool {
        match self {
            Self::Any => true,
            Self::Istio => !is_maistra,
            Self::Maistra => is_maistra,
        }
    }
}

/// Static facts about one resource kind
#[derive(Debug)]
pub struct ResourceDescriptor {
    /// Lowercase plural used in URLs and RBAC checks
    pub plural: &'static str,
    /// Kubernetes `kind`; empty for kinds whose kind comes from a subtype
    pub kind: &'static str,
    /// Owning API group
    pub api_group: ApiGroup,
    /// Namespaced or cluster-wide
    pub scope: ResourceScope,
    /// Cluster flavors serving the kind
    pub flavor: MeshFlavor,
    /// Whether new objects may be created through the config service
    pub creatable: bool,
}

macro_rules! descriptor {
    ($plural:literal, $kind:literal, $group:ident, $scope:ident, $flavor:ident, $creatable:literal) => {
        ResourceDescriptor {
            plural: $plural,
            kind: $kind,
            api_group: ApiGroup::$group,
            scope: ResourceScope::$scope,
            flavor: MeshFlavor::$flavor,
            creatable: $creatable,
        }
    };
}

static VIRTUAL_SERVICES: ResourceDescriptor =
    descriptor!("virtualservices", "VirtualService", Networking, Namespaced, Any, true);
static DESTINATION_RULES: ResourceDescriptor =
    descriptor!("destinationrules", "DestinationRule", Networking, Namespaced, Any, true);
static SERVICE_ENTRIES: ResourceDescriptor =
    descriptor!("serviceentries", "ServiceEntry", Networking, Namespaced, Any, true);
static GATEWAYS: ResourceDescriptor =
    descriptor!("gateways", "Gateway", Networking, Namespaced, Any, true);
static SIDECARS: ResourceDescriptor =
    descriptor!("sidecars", "Sidecar", Networking, Namespaced, Any, true);
static WORKLOAD_ENTRIES: ResourceDescriptor =
    descriptor!("workloadentries", "WorkloadEntry", Networking, Namespaced, Any, false);
static ENVOY_FILTERS: ResourceDescriptor =
    descriptor!("envoyfilters", "EnvoyFilter", Networking, Namespaced, Any, false);
static RULES: ResourceDescriptor = descriptor!("rules", "rule", Config, Namespaced, Any, true);
static ADAPTERS: ResourceDescriptor = descriptor!("adapters", "", Config, Namespaced, Any, true);
static TEMPLATES: ResourceDescriptor = descriptor!("templates", "", Config, Namespaced, Any, true);
static QUOTA_SPECS: ResourceDescriptor =
    descriptor!("quotaspecs", "QuotaSpec", Config, Namespaced, Any, true);
static QUOTA_SPEC_BINDINGS: ResourceDescriptor =
    descriptor!("quotaspecbindings", "QuotaSpecBinding", Config, Namespaced, Any, true);
static ATTRIBUTE_MANIFESTS: ResourceDescriptor =
    descriptor!("attributemanifests", "attributemanifest", Config, Namespaced, Any, false);
static HTTP_API_SPEC_BINDINGS: ResourceDescriptor =
    descriptor!("httpapispecbindings", "HTTPAPISpecBinding", Config, Namespaced, Any, false);
static HTTP_API_SPECS: ResourceDescriptor =
    descriptor!("httpapispecs", "HTTPAPISpec", Config, Namespaced, Any, false);
static POLICIES: ResourceDescriptor =
    descriptor!("policies", "Policy", Authentication, Namespaced, Any, true);
static MESH_POLICIES: ResourceDescriptor =
    descriptor!("meshpolicies", "MeshPolicy", Authentication, Cluster, Istio, true);
static SERVICE_MESH_POLICIES: ResourceDescriptor = descriptor!(
    "servicemeshpolicies",
    "ServiceMeshPolicy",
    MaistraAuthentication,
    Namespaced,
    Maistra,
    true
);
static CLUSTER_RBAC_CONFIGS: ResourceDescriptor =
    descriptor!("clusterrbacconfigs", "ClusterRbacConfig", Rbac, Cluster, Istio, false);
static RBAC_CONFIGS: ResourceDescriptor =
    descriptor!("rbacconfigs", "RbacConfig", Rbac, Namespaced, Any, false);
static SERVICE_MESH_RBAC_CONFIGS: ResourceDescriptor = descriptor!(
    "servicemeshrbacconfigs",
    "ServiceMeshRbacConfig",
    MaistraRbac,
    Namespaced,
    Maistra,
    true
);
static SERVICE_ROLES: ResourceDescriptor =
    descriptor!("serviceroles", "ServiceRole", Rbac, Namespaced, Any, false);
static SERVICE_ROLE_BINDINGS: ResourceDescriptor =
    descriptor!("servicerolebindings", "ServiceRoleBinding", Rbac, Namespaced, Any, false);
static AUTHORIZATION_POLICIES: ResourceDescriptor = descriptor!(
    "authorizationpolicies",
    "AuthorizationPolicy",
    Security,
    Namespaced,
    Any,
    true
);
static PEER_AUTHENTICATIONS: ResourceDescriptor = descriptor!(
    "peerauthentications",
    "PeerAuthentication",
    Security,
    Namespaced,
    Any,
    true
);
static REQUEST_AUTHENTICATIONS: ResourceDescriptor = descriptor!(
    "requestauthentications",
    "RequestAuthentication",
    Security,
    Namespaced,
    Any,
    true
);

/// Istio configuration resource kinds known to the config service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    /// networking VirtualService
    VirtualServices,
    /// networking DestinationRule
    DestinationRules,
    /// networking ServiceEntry
    ServiceEntries,
    /// networking Gateway
    Gateways,
    /// networking Sidecar
    Sidecars,
    /// networking WorkloadEntry
    WorkloadEntries,
    /// networking EnvoyFilter
    EnvoyFilters,
    /// Mixer rule
    Rules,
    /// Mixer adapters (kind given by subtype)
    Adapters,
    /// Mixer templates (kind given by subtype)
    Templates,
    /// Mixer QuotaSpec
    QuotaSpecs,
    /// Mixer QuotaSpecBinding
    QuotaSpecBindings,
    /// Mixer attributemanifest
    AttributeManifests,
    /// Mixer HTTPAPISpecBinding
    HttpApiSpecBindings,
    /// Mixer HTTPAPISpec
    HttpApiSpecs,
    /// authentication Policy
    Policies,
    /// authentication MeshPolicy (cluster-wide)
    MeshPolicies,
    /// Maistra ServiceMeshPolicy
    ServiceMeshPolicies,
    /// rbac ClusterRbacConfig (cluster-wide)
    ClusterRbacConfigs,
    /// rbac RbacConfig
    RbacConfigs,
    /// Maistra ServiceMeshRbacConfig
    ServiceMeshRbacConfigs,
    /// rbac ServiceRole
    ServiceRoles,
    /// rbac ServiceRoleBinding
    ServiceRoleBindings,
    /// security AuthorizationPolicy
    AuthorizationPolicies,
    /// security PeerAuthentication
    PeerAuthentications,
    /// security RequestAuthentication
    RequestAuthentications,
}

/// All resource kinds, in list field order
pub const ALL_RESOURCE_KINDS: &[ResourceKind] = &[
    ResourceKind::Gateways,
    ResourceKind::VirtualServices,
    ResourceKind::DestinationRules,
    ResourceKind::ServiceEntries,
    ResourceKind::Rules,
    ResourceKind::Adapters,
    ResourceKind::Templates,
    ResourceKind::QuotaSpecs,
    ResourceKind::QuotaSpecBindings,
    ResourceKind::Policies,
    ResourceKind::MeshPolicies,
    ResourceKind::ServiceMeshPolicies,
    ResourceKind::ClusterRbacConfigs,
    ResourceKind::RbacConfigs,
    ResourceKind::ServiceMeshRbacConfigs,
    ResourceKind::Sidecars,
    ResourceKind::ServiceRoles,
    ResourceKind::ServiceRoleBindings,
    ResourceKind::AuthorizationPolicies,
    ResourceKind::PeerAuthentications,
    ResourceKind::WorkloadEntries,
    ResourceKind::RequestAuthentications,
    ResourceKind::EnvoyFilters,
    ResourceKind::AttributeManifests,
    ResourceKind::HttpApiSpecBindings,
    ResourceKind::HttpApiSpecs,
];

/// Kinds offered by the "new Istio config" form
pub const NEW_ISTIO_CONFIG_KINDS: &[ResourceKind] = &[
    ResourceKind::AuthorizationPolicies,
    ResourceKind::Sidecars,
    ResourceKind::Gateways,
    ResourceKind::PeerAuthentications,
    ResourceKind::RequestAuthentications,
];

/// Mixer adapter plurals and their kinds
pub const ADAPTER_SUBTYPES: &[(&str, &str)] = &[
    ("adapters", "adapter"),
    ("apikeys", "apikey"),
    ("bypasses", "bypass"),
    ("circonuses", "circonus"),
    ("deniers", "denier"),
    ("fluentds", "fluentd"),
    ("kubernetesenvs", "kubernetesenv"),
    ("listcheckers", "listchecker"),
    ("memquotas", "memquota"),
    ("noops", "noop"),
    ("opas", "opa"),
    ("prometheuses", "prometheus"),
    ("rbacs", "rbac"),
    ("redisquotas", "redisquota"),
    ("signalfxs", "signalfx"),
    ("solarwindses", "solarwinds"),
    ("stackdrivers", "stackdriver"),
    ("statsds", "statsd"),
    ("stdios", "stdio"),
];

/// Mixer template plurals and their kinds
pub const TEMPLATE_SUBTYPES: &[(&str, &str)] = &[
    ("analytics", "analytics"),
    ("apikeys", "apikey"),
    ("authorizations", "authorization"),
    ("checknothings", "checknothing"),
    ("edges", "edge"),
    ("listentries", "listentry"),
    ("logentries", "logentry"),
    ("metrics", "metric"),
    ("quotas", "quota"),
    ("reportnothings", "reportnothing"),
    ("servicecontrolreports", "servicecontrolreport"),
    ("tracespans", "tracespan"),
];

/// Concrete API endpoint for one kind (or one Mixer subtype)
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceTarget {
    /// Dynamic API resource
    pub api: ApiResource,
    /// Namespaced or cluster-wide
    pub scope: ResourceScope,
}

impl ResourceKind {
    /// The static descriptor for this kind
    pub fn descriptor(&self) -> &'static ResourceDescriptor {
        match self {
            Self::VirtualServices => &VIRTUAL_SERVICES,
            Self::DestinationRules => &DESTINATION_RULES,
            Self::ServiceEntries => &SERVICE_ENTRIES,
            Self::Gateways => &GATEWAYS,
            Self::Sidecars => &SIDECARS,
            Self::WorkloadEntries => &WORKLOAD_ENTRIES,
            Self::EnvoyFilters => &ENVOY_FILTERS,
            Self::Rules => &RULES,
            Self::Adapters => &ADAPTERS,
            Self::Templates => &TEMPLATES,
            Self::QuotaSpecs => &QUOTA_SPECS,
            Self::QuotaSpecBindings => &QUOTA_SPEC_BINDINGS,
            Self::AttributeManifests => &ATTRIBUTE_MANIFESTS,
            Self::HttpApiSpecBindings => &HTTP_API_SPEC_BINDINGS,
            Self::HttpApiSpecs => &HTTP_API_SPECS,
            Self::Policies => &POLICIES,
            Self::MeshPolicies => &MESH_POLICIES,
            Self::ServiceMeshPolicies => &SERVICE_MESH_POLICIES,
            Self::ClusterRbacConfigs => &CLUSTER_RBAC_CONFIGS,
            Self::RbacConfigs => &RBAC_CONFIGS,
            Self::ServiceMeshRbacConfigs => &SERVICE_MESH_RBAC_CONFIGS,
            Self::ServiceRoles => &SERVICE_ROLES,
            Self::ServiceRoleBindings => &SERVICE_ROLE_BINDINGS,
            Self::AuthorizationPolicies => &AUTHORIZATION_POLICIES,
            Self::PeerAuthentications => &PEER_AUTHENTICATIONS,
            Self::RequestAuthentications => &REQUEST_AUTHENTICATIONS,
        }
    }

    /// Lowercase plural resource name
    pub fn plural(&self) -> &'static str {
        self.descriptor().plural
    }

    /// Whether the kind is cluster-wide
    pub fn is_cluster_scoped(&self) -> bool {
        self.descriptor().scope == ResourceScope::Cluster
    }

    /// Whether objects of this kind are addressed through a Mixer subtype
    pub fn has_subtypes(&self) -> bool {
        matches!(self, Self::Adapters | Self::Templates)
    }

    /// Subtype table for Mixer adapters and templates; empty otherwise
    pub fn subtypes(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Adapters => ADAPTER_SUBTYPES,
            Self::Templates => TEMPLATE_SUBTYPES,
            _ => &[],
        }
    }

    /// API target for a kind with a fixed `kind` string
    ///
    /// Returns `None` for adapters and templates, which need a subtype.
    pub fn target(&self) -> Option<ResourceTarget> {
        let d = self.descriptor();
        if d.kind.is_empty() {
            return None;
        }
        Some(ResourceTarget {
            api: build_api_resource(&d.api_group.api_version(), d.kind, d.plural),
            scope: d.scope,
        })
    }

    /// API target for one Mixer subtype (e.g. `prometheuses` under `adapters`)
    pub fn subtype_target(&self, subtype: &str) -> Option<ResourceTarget> {
        let d = self.descriptor();
        self.subtypes()
            .iter()
            .find(|(plural, _)| *plural == subtype)
            .map(|(plural, kind)| ResourceTarget {
                api: build_api_resource(&d.api_group.api_version(), kind, plural),
                scope: d.scope,
            })
    }

    /// Resolve the API target, using `subtype` for adapters and templates
    pub fn resolve_target(&self, subtype: &str) -> Result<ResourceTarget, Error> {
        let target = if self.has_subtypes() {
            self.subtype_target(subtype)
        } else {
            self.target()
        };
        target.ok_or_else(|| {
            Error::unknown_resource_type(if self.has_subtypes() { subtype } else { self.plural() })
        })
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_RESOURCE_KINDS
            .iter()
            .copied()
            .find(|k| k.plural() == s)
            .ok_or_else(|| Error::unknown_resource_type(s))
    }
}

/// Owning API group of a resource type string, if it is registered
pub fn api_group(resource_type: &str) -> Option<ApiGroup> {
    resource_type
        .parse::<ResourceKind>()
        .ok()
        .map(|k| k.descriptor().api_group)
}

/// API group name managing `resource_type`, or an empty string when unmanaged
pub fn get_istio_api(resource_type: &str) -> &'static str {
    api_group(resource_type).map(|g| g.group()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn every_kind_has_group_and_version() {
        assert_eq!(ALL_RESOURCE_KINDS.len(), 26);
        for kind in ALL_RESOURCE_KINDS {
            let group = api_group(kind.plural())
                .unwrap_or_else(|| panic!("{:?} has no api group", kind));
            assert!(!group.group().is_empty());
            assert!(!group.version().is_empty());
            assert!(group.api_version().starts_with(group.group()));
        }
    }

    #[test]
    fn plurals_are_unique_and_round_trip() {
        let plurals: HashSet<_> = ALL_RESOURCE_KINDS.iter().map(|k| k.plural()).collect();
        assert_eq!(plurals.len(), ALL_RESOURCE_KINDS.len());
        for kind in ALL_RESOURCE_KINDS {
            assert_eq!(kind.plural().parse::<ResourceKind>().unwrap(), *kind);
        }
    }

    #[test]
    fn unknown_types_have_no_api() {
        assert_eq!(get_istio_api("widgets"), "");
        assert!(api_group("experiments").is_none());
        let err = "widgets".parse::<ResourceKind>().unwrap_err();
        assert_eq!(err.to_string(), "object type not found: widgets");
    }

    #[test]
    fn known_groups_match_istio_apis() {
        assert_eq!(get_istio_api("virtualservices"), "networking.istio.io");
        assert_eq!(get_istio_api("quotaspecs"), "config.istio.io");
        assert_eq!(get_istio_api("servicemeshpolicies"), "authentication.maistra.io");
        assert_eq!(
            ApiGroup::Security.api_version(),
            "security.istio.io/v1beta1"
        );
        assert_eq!(
            ApiGroup::MaistraRbac.api_version(),
            "rbac.maistra.io/v1"
        );
    }

    #[test]
    fn cluster_scoped_kinds_are_istio_only() {
        let cluster: Vec<_> = ALL_RESOURCE_KINDS
            .iter()
            .filter(|k| k.is_cluster_scoped())
            .collect();
        assert_eq!(
            cluster,
            vec![&ResourceKind::MeshPolicies, &ResourceKind::ClusterRbacConfigs]
        );
        for kind in cluster {
            assert!(kind.descriptor().flavor.available(false));
            assert!(!kind.descriptor().flavor.available(true));
        }
        assert!(!ResourceKind::ServiceMeshPolicies
            .descriptor()
            .flavor
            .available(false));
    }

    #[test]
    fn subtype_targets_use_subtype_kind() {
        assert!(ResourceKind::Adapters.target().is_none());

        let target = ResourceKind::Adapters.subtype_target("prometheuses").unwrap();
        assert_eq!(target.api.kind, "prometheus");
        assert_eq!(target.api.plural, "prometheuses");
        assert_eq!(target.api.api_version, "config.istio.io/v1alpha2");

        let target = ResourceKind::Templates.resolve_target("metrics").unwrap();
        assert_eq!(target.api.kind, "metric");

        let err = ResourceKind::Templates.resolve_target("bogus").unwrap_err();
        assert_eq!(err.to_string(), "object type not found: bogus");
    }

    #[test]
    fn plain_targets_ignore_subtype() {
        let target = ResourceKind::VirtualServices.resolve_target("ignored").unwrap();
        assert_eq!(target.api.kind, "VirtualService");
        assert_eq!(target.api.group, "networking.istio.io");
        assert_eq!(target.scope, ResourceScope::Namespaced);

        let target = ResourceKind::MeshPolicies.resolve_target("").unwrap();
        assert_eq!(target.scope, ResourceScope::Cluster);
    }
}
