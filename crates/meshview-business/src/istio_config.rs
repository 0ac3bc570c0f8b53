//! Istio configuration aggregation, detail reads and mutations
//!
//! `get_istio_config_list` fans out one task per requested kind into a
//! `JoinSet`, bounded by a semaphore. The first failing kind cancels its
//! siblings and its error is returned; no partial list is produced. The two
//! cluster-wide kinds are the exception: their failures usually mean the
//! caller lacks cluster permissions, so they degrade to empty collections.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use meshview_common::kube_utils::remove_null_values;
use meshview_common::metrics::{record_permission_skip, FunctionTimer};
use meshview_common::{Error, MeshConfig};

use crate::cache::IstioCache;
use crate::client::{IstioClient, IstioObject, Verb, PERMISSION_VERBS};
use crate::models::{
    IstioConfigDetails, IstioConfigList, IstioConfigPermissions, ResourcePermissions,
    ResourcesPermissions,
};
use crate::namespace::NamespaceService;
use crate::resources::{
    api_group, ResourceKind, ResourceScope, ALL_RESOURCE_KINDS, NEW_ISTIO_CONFIG_KINDS,
};

const PACKAGE: &str = "business";
const SERVICE: &str = "IstioConfigService";

/// Which kinds to aggregate for a namespace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IstioConfigCriteria {
    /// Target namespace; must not be empty
    pub namespace: String,
    /// Kinds to fetch
    pub included: BTreeSet<ResourceKind>,
}

impl IstioConfigCriteria {
    /// Criteria for `namespace` with no kinds selected
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            included: BTreeSet::new(),
        }
    }

    /// Criteria selecting every kind
    pub fn all(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            included: ALL_RESOURCE_KINDS.iter().copied().collect(),
        }
    }

    /// Criteria from a comma-separated list of resource type plurals
    ///
    /// An empty list selects every kind. Unknown names are skipped.
    pub fn with_object_types(namespace: impl Into<String>, object_types: &str) -> Self {
        let namespace = namespace.into();
        if object_types.trim().is_empty() {
            return Self::all(namespace);
        }
        let mut criteria = Self::new(namespace);
        for name in object_types.split(',').map(str::trim) {
            match ResourceKind::from_str(name) {
                Ok(kind) => {
                    criteria.included.insert(kind);
                }
                Err(_) => debug!(object_type = name, "ignoring unknown object type"),
            }
        }
        criteria
    }

    /// Add one kind
    pub fn include(mut self, kind: ResourceKind) -> Self {
        self.included.insert(kind);
        self
    }

    /// Whether `kind` is selected
    pub fn includes(&self, kind: ResourceKind) -> bool {
        self.included.contains(&kind)
    }
}

/// Fetches one kind for one namespace, from cache when warm
#[derive(Clone)]
struct KindFetcher {
    client: Arc<dyn IstioClient>,
    cache: Option<Arc<dyn IstioCache>>,
}

impl KindFetcher {
    async fn fetch(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<IstioObject>, Error> {
        let result = self.load(kind, namespace).await;
        match result {
            Err(e) if kind.is_cluster_scoped() => {
                // Cluster-wide kinds usually need privileges the caller lacks.
                warn!(
                    kind = %kind,
                    error = %e,
                    "no cluster permission for resource, returning empty list"
                );
                record_permission_skip(kind.plural());
                Ok(Vec::new())
            }
            other => other,
        }
    }

    async fn load(
        &self,
        kind: ResourceKind,
        namespace: &str,
    ) -> Result<Vec<IstioObject>, Error> {
        if let Some(cache) = &self.cache {
            if !kind.is_cluster_scoped()
                && cache.check_istio_resource(kind)
                && cache.check_namespace(namespace)
            {
                debug!(kind = %kind, namespace, "serving from cache");
                return cache.get_istio_resources(kind, namespace).await;
            }
        }

        if kind.has_subtypes() {
            let targets: Vec<_> = kind
                .subtypes()
                .iter()
                .filter_map(|(plural, _)| kind.subtype_target(plural))
                .collect();
            let lists = try_join_all(
                targets
                    .iter()
                    .map(|target| self.client.list_objects(target, namespace)),
            )
            .await?;
            return Ok(lists.into_iter().flatten().collect());
        }

        let target = kind.resolve_target("")?;
        self.client.list_objects(&target, namespace).await
    }
}

type KindOutcome = (ResourceKind, Result<Vec<IstioObject>, Error>);

/// Run one kind's fetch once a permit is free; `None` when cancelled first
async fn fetch_with_permit(
    fetcher: KindFetcher,
    kind: ResourceKind,
    namespace: String,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
) -> Option<KindOutcome> {
    let permit = tokio::select! {
        _ = cancel.cancelled() => return None,
        permit = permits.acquire_owned() => permit,
    };
    let _permit = match permit {
        Ok(permit) => permit,
        Err(e) => {
            return Some((
                kind,
                Err(Error::internal_with_context("aggregation", e.to_string())),
            ))
        }
    };
    tokio::select! {
        _ = cancel.cancelled() => None,
        result = fetcher.fetch(kind, &namespace) => Some((kind, result)),
    }
}

/// Istio configuration operations running as one caller
#[derive(Clone)]
pub struct IstioConfigService {
    client: Arc<dyn IstioClient>,
    cache: Option<Arc<dyn IstioCache>>,
    namespaces: NamespaceService,
    config: Arc<MeshConfig>,
}

impl IstioConfigService {
    /// Create a service over the caller's client and the shared cache
    pub fn new(
        client: Arc<dyn IstioClient>,
        cache: Option<Arc<dyn IstioCache>>,
        config: Arc<MeshConfig>,
    ) -> Self {
        Self {
            namespaces: NamespaceService::new(client.clone()),
            client,
            cache,
            config,
        }
    }

    /// Fetch every selected kind for the criteria namespace
    pub async fn get_istio_config_list(
        &self,
        criteria: &IstioConfigCriteria,
    ) -> Result<IstioConfigList, Error> {
        let timer = FunctionTimer::start(PACKAGE, SERVICE, "GetIstioConfigList");
        let result = self.aggregate(criteria).await;
        timer.observe(result.is_ok());
        result
    }

    async fn aggregate(&self, criteria: &IstioConfigCriteria) -> Result<IstioConfigList, Error> {
        if criteria.namespace.is_empty() {
            return Err(Error::bad_request(
                "GetIstioConfigList needs a non empty Namespace",
            ));
        }
        let namespace = criteria.namespace.clone();
        let mut list = IstioConfigList::new(namespace.clone());

        let is_maistra = self.client.is_maistra_api().await;
        let kinds: Vec<ResourceKind> = criteria
            .included
            .iter()
            .copied()
            .filter(|kind| self.applies(*kind, &namespace, is_maistra))
            .collect();
        if kinds.is_empty() {
            return Ok(list);
        }

        let fetcher = KindFetcher {
            client: self.client.clone(),
            cache: self.cache.clone(),
        };
        let cancel = CancellationToken::new();
        // A zero-permit semaphore would park every task forever
        let permits = Arc::new(Semaphore::new(self.config.fetch_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for kind in kinds {
            tasks.spawn(fetch_with_permit(
                fetcher.clone(),
                kind,
                namespace.clone(),
                permits.clone(),
                cancel.clone(),
            ));
        }

        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok(Some((kind, Ok(items)))) => {
                    *list.items_mut(kind) = items;
                    continue;
                }
                Ok(None) => continue,
                Ok(Some((kind, Err(e)))) => {
                    error!(
                        kind = %kind,
                        namespace = %namespace,
                        error = %e,
                        "fetch failed, aborting aggregation"
                    );
                    e
                }
                Err(e) => Error::internal_with_context(
                    "aggregation",
                    format!("fetch task failed: {}", e),
                ),
            };
            cancel.cancel();
            tasks.abort_all();
            return Err(failure);
        }

        Ok(list)
    }

    fn applies(&self, kind: ResourceKind, namespace: &str, is_maistra: bool) -> bool {
        let descriptor = kind.descriptor();
        if !descriptor.flavor.available(is_maistra) {
            return false;
        }
        match descriptor.scope {
            ResourceScope::Namespaced => true,
            ResourceScope::Cluster => self.config.is_istio_namespace(namespace),
        }
    }

    /// Fetch one object together with the caller's permissions on its kind
    ///
    /// Cluster-wide kinds are only read for the Istio namespace; elsewhere
    /// the details come back without an object.
    pub async fn get_istio_config_details(
        &self,
        namespace: &str,
        object_type: &str,
        object_subtype: &str,
        name: &str,
    ) -> Result<IstioConfigDetails, Error> {
        let timer = FunctionTimer::start(PACKAGE, SERVICE, "GetIstioConfigDetails");
        let result = self
            .read_details(namespace, object_type, object_subtype, name)
            .await;
        timer.observe(result.is_ok());
        result
    }

    async fn read_details(
        &self,
        namespace: &str,
        object_type: &str,
        object_subtype: &str,
        name: &str,
    ) -> Result<IstioConfigDetails, Error> {
        self.namespaces.get_namespace(namespace).await?;

        let kind = ResourceKind::from_str(object_type)?;
        let target = kind.resolve_target(object_subtype)?;

        let object = async {
            if target.scope == ResourceScope::Cluster && !self.config.is_istio_namespace(namespace)
            {
                return Ok(None);
            }
            self.client
                .get_object(&target, namespace, name)
                .await
                .map(Some)
        };
        let (permissions, object) = tokio::join!(
            self.get_permissions(namespace, object_type, object_subtype),
            object
        );

        let mut details = IstioConfigDetails::new(namespace, object_type);
        details.permissions = permissions;
        details.object = object?;
        Ok(details)
    }

    /// Validate a create body and complete it with `kind` and `apiVersion`
    ///
    /// The body must be a JSON object whose `metadata.name` is a string and
    /// whose `spec`, when present, is an object. Null members are removed at
    /// every depth.
    pub fn parse_json_for_create(
        &self,
        resource_type: &str,
        resource_subtype: &str,
        body: &[u8],
    ) -> Result<Value, Error> {
        let kind = ResourceKind::from_str(resource_type)?;
        if !kind.descriptor().creatable {
            return Err(Error::unknown_resource_type(resource_type));
        }
        let target = kind.resolve_target(resource_subtype)?;
        let kind_name = target.api.kind.clone();

        let mut value: Value = serde_json::from_slice(body)
            .map_err(|e| Error::serialization_for_kind(kind_name.clone(), e.to_string()))?;
        validate_create_body(&kind_name, &value)?;
        remove_null_values(&mut value);

        if let Value::Object(map) = &mut value {
            map.insert("kind".to_string(), Value::String(kind_name));
            map.insert(
                "apiVersion".to_string(),
                Value::String(target.api.api_version.clone()),
            );
        }
        Ok(value)
    }

    /// Create a new object from a JSON body
    pub async fn create_istio_config_detail(
        &self,
        namespace: &str,
        resource_type: &str,
        resource_subtype: &str,
        body: &[u8],
    ) -> Result<IstioConfigDetails, Error> {
        let timer = FunctionTimer::start(PACKAGE, SERVICE, "CreateIstioConfigDetail");
        let result = self
            .create_detail(namespace, resource_type, resource_subtype, body)
            .await;
        timer.observe(result.is_ok());
        result
    }

    async fn create_detail(
        &self,
        namespace: &str,
        resource_type: &str,
        resource_subtype: &str,
        body: &[u8],
    ) -> Result<IstioConfigDetails, Error> {
        let body = self.parse_json_for_create(resource_type, resource_subtype, body)?;
        let target = ResourceKind::from_str(resource_type)?.resolve_target(resource_subtype)?;

        let created = self.client.create_object(&target, namespace, body).await?;
        info!(namespace, resource_type, name = ?created.metadata.name, "created Istio config");
        self.refresh_cache(namespace);

        let mut details = IstioConfigDetails::new(namespace, resource_type);
        details.object = Some(created);
        Ok(details)
    }

    /// Apply a JSON merge patch to an existing object
    pub async fn update_istio_config_detail(
        &self,
        namespace: &str,
        resource_type: &str,
        resource_subtype: &str,
        name: &str,
        json_patch: &[u8],
    ) -> Result<IstioConfigDetails, Error> {
        let timer = FunctionTimer::start(PACKAGE, SERVICE, "UpdateIstioConfigDetail");
        let result = self
            .update_detail(namespace, resource_type, resource_subtype, name, json_patch)
            .await;
        timer.observe(result.is_ok());
        result
    }

    async fn update_detail(
        &self,
        namespace: &str,
        resource_type: &str,
        resource_subtype: &str,
        name: &str,
        json_patch: &[u8],
    ) -> Result<IstioConfigDetails, Error> {
        let target = ResourceKind::from_str(resource_type)?.resolve_target(resource_subtype)?;
        let patch: Value = serde_json::from_slice(json_patch)
            .map_err(|e| Error::serialization_for_kind(target.api.kind.clone(), e.to_string()))?;
        if !patch.is_object() {
            return Err(Error::serialization_for_kind(
                target.api.kind.clone(),
                "patch must be a JSON object",
            ));
        }

        let updated = self
            .client
            .update_object(&target, namespace, name, patch)
            .await?;
        info!(namespace, resource_type, name, "updated Istio config");
        self.refresh_cache(namespace);

        let mut details = IstioConfigDetails::new(namespace, resource_type);
        details.object = Some(updated);
        Ok(details)
    }

    /// Delete an object by name
    pub async fn delete_istio_config_detail(
        &self,
        namespace: &str,
        resource_type: &str,
        resource_subtype: &str,
        name: &str,
    ) -> Result<(), Error> {
        let timer = FunctionTimer::start(PACKAGE, SERVICE, "DeleteIstioConfigDetail");
        let result = self
            .delete_detail(namespace, resource_type, resource_subtype, name)
            .await;
        timer.observe(result.is_ok());
        result
    }

    async fn delete_detail(
        &self,
        namespace: &str,
        resource_type: &str,
        resource_subtype: &str,
        name: &str,
    ) -> Result<(), Error> {
        let target = ResourceKind::from_str(resource_type)?.resolve_target(resource_subtype)?;
        self.client.delete_object(&target, namespace, name).await?;
        info!(namespace, resource_type, name, "deleted Istio config");
        self.refresh_cache(namespace);
        Ok(())
    }

    fn refresh_cache(&self, namespace: &str) {
        if let Some(cache) = &self.cache {
            cache.refresh_namespace(namespace);
        }
    }

    /// Caller permissions on a resource type in a namespace
    ///
    /// A non-empty subtype replaces the resource type in the review. Review
    /// failures are logged and yield no permissions.
    pub async fn get_permissions(
        &self,
        namespace: &str,
        object_type: &str,
        object_subtype: &str,
    ) -> ResourcePermissions {
        let Some(group) = api_group(object_type) else {
            return ResourcePermissions::default();
        };
        let resource_type = if object_subtype.is_empty() {
            object_type
        } else {
            object_subtype
        };

        let reviews = match self
            .client
            .self_subject_access_review(namespace, group, resource_type, PERMISSION_VERBS)
            .await
        {
            Ok(reviews) => reviews,
            Err(e) => {
                error!(
                    namespace,
                    api = group.group(),
                    resource_type,
                    error = %e,
                    "error getting permissions"
                );
                return ResourcePermissions::default();
            }
        };

        let allowed = |verb: Verb| reviews.iter().any(|r| r.verb == verb && r.allowed);
        ResourcePermissions {
            create: allowed(Verb::Create),
            update: allowed(Verb::Update) || allowed(Verb::Patch),
            delete: allowed(Verb::Delete),
        }
    }

    /// Permissions for the kinds offered by the new-config form, per namespace
    pub async fn get_istio_config_permissions(
        &self,
        namespaces: &[String],
    ) -> IstioConfigPermissions {
        let timer = FunctionTimer::start(PACKAGE, SERVICE, "GetIstioConfigPermissions");

        let reviews = namespaces.iter().flat_map(|ns| {
            NEW_ISTIO_CONFIG_KINDS.iter().map(move |kind| async move {
                let permissions = self.get_permissions(ns, kind.plural(), "").await;
                (ns.clone(), kind.plural().to_string(), permissions)
            })
        });

        let mut result = IstioConfigPermissions::new();
        for ns in namespaces {
            result.insert(ns.clone(), ResourcesPermissions::new());
        }
        for (ns, resource, permissions) in join_all(reviews).await {
            result.entry(ns).or_default().insert(resource, permissions);
        }

        timer.observe(true);
        result
    }
}

fn validate_create_body(kind: &str, value: &Value) -> Result<(), Error> {
    let object = value
        .as_object()
        .ok_or_else(|| Error::serialization_for_kind(kind, "body must be a JSON object"))?;

    let name = object
        .get("metadata")
        .and_then(Value::as_object)
        .and_then(|metadata| metadata.get("name"));
    match name {
        Some(Value::String(name)) if !name.is_empty() => {}
        _ => {
            return Err(Error::serialization_for_kind(
                kind,
                "metadata.name must be a non-empty string",
            ))
        }
    }

    match object.get("spec") {
        None | Some(Value::Null) | Some(Value::Object(_)) => Ok(()),
        Some(_) => Err(Error::serialization_for_kind(
            kind,
            "spec must be a JSON object",
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::cache::MockIstioCache;
    use crate::client::{AccessReview, MockIstioClient};

    fn object(kind: &str, name: &str) -> IstioObject {
        serde_json::from_value(json!({
            "apiVersion": "networking.istio.io/v1alpha3",
            "kind": kind,
            "metadata": { "name": name, "namespace": "bookinfo" }
        }))
        .unwrap()
    }

    fn transport_error() -> Error {
        Error::internal_with_context("transport", "connection reset by peer")
    }

    fn service(client: MockIstioClient) -> IstioConfigService {
        IstioConfigService::new(Arc::new(client), None, Arc::new(MeshConfig::default()))
    }

    fn service_with_cache(client: MockIstioClient, cache: MockIstioCache) -> IstioConfigService {
        IstioConfigService::new(
            Arc::new(client),
            Some(Arc::new(cache)),
            Arc::new(MeshConfig::default()),
        )
    }

    fn allow_all(verbs: &[Verb]) -> Vec<AccessReview> {
        verbs
            .iter()
            .map(|verb| AccessReview {
                verb: *verb,
                allowed: true,
            })
            .collect()
    }

    mod criteria {
        use super::*;

        #[test]
        fn object_types_select_known_kinds_only() {
            let criteria =
                IstioConfigCriteria::with_object_types("bookinfo", "gateways, sidecars,widgets");
            assert!(criteria.includes(ResourceKind::Gateways));
            assert!(criteria.includes(ResourceKind::Sidecars));
            assert_eq!(criteria.included.len(), 2);
        }

        #[test]
        fn empty_object_types_select_everything() {
            let criteria = IstioConfigCriteria::with_object_types("bookinfo", "");
            assert_eq!(criteria.included.len(), ALL_RESOURCE_KINDS.len());
        }

        #[test]
        fn include_is_order_insensitive() {
            let a = IstioConfigCriteria::new("ns")
                .include(ResourceKind::Gateways)
                .include(ResourceKind::VirtualServices);
            let b = IstioConfigCriteria::new("ns")
                .include(ResourceKind::VirtualServices)
                .include(ResourceKind::Gateways);
            assert_eq!(a, b);
        }
    }

    mod list {
        use super::*;

        #[tokio::test]
        async fn empty_namespace_is_rejected() {
            let svc = service(MockIstioClient::new());
            let err = svc
                .get_istio_config_list(&IstioConfigCriteria::all(""))
                .await
                .unwrap_err();
            assert!(err
                .to_string()
                .contains("GetIstioConfigList needs a non empty Namespace"));
        }

        #[tokio::test]
        async fn fetches_requested_kinds_into_their_fields() {
            let mut client = MockIstioClient::new();
            client.expect_is_maistra_api().returning(|| false);
            client
                .expect_list_objects()
                .returning(|target, namespace| {
                    assert_eq!(namespace, "bookinfo");
                    Ok(vec![object(&target.api.kind, "one")])
                });

            let criteria = IstioConfigCriteria::new("bookinfo")
                .include(ResourceKind::Gateways)
                .include(ResourceKind::VirtualServices);
            let list = service(client).get_istio_config_list(&criteria).await.unwrap();

            assert_eq!(list.namespace, "bookinfo");
            assert_eq!(list.gateways.len(), 1);
            assert_eq!(list.virtual_services.len(), 1);
            assert_eq!(
                list.virtual_services[0].types.as_ref().unwrap().kind,
                "VirtualService"
            );
            assert!(list.destination_rules.is_empty());
        }

        #[tokio::test]
        async fn zero_concurrency_still_completes() {
            let mut client = MockIstioClient::new();
            client.expect_is_maistra_api().returning(|| false);
            client
                .expect_list_objects()
                .returning(|target, _| Ok(vec![object(&target.api.kind, "one")]));
            let config = MeshConfig {
                fetch_concurrency: 0,
                ..Default::default()
            };
            let svc = IstioConfigService::new(Arc::new(client), None, Arc::new(config));

            let criteria = IstioConfigCriteria::new("bookinfo")
                .include(ResourceKind::Gateways)
                .include(ResourceKind::Sidecars);
            let list = tokio::time::timeout(
                std::time::Duration::from_secs(5),
                svc.get_istio_config_list(&criteria),
            )
            .await
            .expect("aggregation must not stall")
            .unwrap();

            assert_eq!(list.gateways.len(), 1);
            assert_eq!(list.sidecars.len(), 1);
        }

        /// Story: one failing kind discards the whole aggregation
        #[tokio::test]
        async fn story_first_error_wins_and_discards_partial_results() {
            let mut client = MockIstioClient::new();
            client.expect_is_maistra_api().returning(|| false);
            client.expect_list_objects().returning(|target, _| {
                if target.api.plural == "virtualservices" {
                    Err(transport_error())
                } else {
                    Ok(vec![object("Gateway", "ingress")])
                }
            });

            let criteria = IstioConfigCriteria::new("bookinfo")
                .include(ResourceKind::Gateways)
                .include(ResourceKind::VirtualServices);
            let err = service(client)
                .get_istio_config_list(&criteria)
                .await
                .unwrap_err();

            assert_eq!(err.context(), Some("transport"));
        }

        #[tokio::test]
        async fn cluster_scoped_failures_degrade_to_empty() {
            let mut client = MockIstioClient::new();
            client.expect_is_maistra_api().returning(|| false);
            client.expect_list_objects().returning(|target, _| {
                if target.scope == ResourceScope::Cluster {
                    Err(Error::forbidden("meshpolicies is forbidden"))
                } else {
                    Ok(vec![object("Policy", "default")])
                }
            });

            let criteria = IstioConfigCriteria::new("istio-system")
                .include(ResourceKind::MeshPolicies)
                .include(ResourceKind::ClusterRbacConfigs)
                .include(ResourceKind::Policies);
            let list = service(client).get_istio_config_list(&criteria).await.unwrap();

            assert!(list.mesh_policies.is_empty());
            assert!(list.cluster_rbac_configs.is_empty());
            assert_eq!(list.policies.len(), 1);
        }

        #[tokio::test]
        async fn cluster_scoped_kinds_only_for_istio_namespace() {
            let mut client = MockIstioClient::new();
            client.expect_is_maistra_api().returning(|| false);
            client.expect_list_objects().never();

            let criteria = IstioConfigCriteria::new("bookinfo").include(ResourceKind::MeshPolicies);
            let list = service(client).get_istio_config_list(&criteria).await.unwrap();
            assert!(list.mesh_policies.is_empty());
        }

        #[tokio::test]
        async fn flavor_gates_maistra_and_istio_kinds() {
            let mut client = MockIstioClient::new();
            client.expect_is_maistra_api().returning(|| true);
            client.expect_list_objects().returning(|target, _| {
                assert_ne!(target.api.plural, "meshpolicies");
                Ok(vec![object(&target.api.kind, "mesh")])
            });

            let criteria = IstioConfigCriteria::new("istio-system")
                .include(ResourceKind::MeshPolicies)
                .include(ResourceKind::ServiceMeshPolicies);
            let list = service(client).get_istio_config_list(&criteria).await.unwrap();

            assert!(list.mesh_policies.is_empty());
            assert_eq!(list.service_mesh_policies.len(), 1);
        }

        #[tokio::test]
        async fn maistra_kinds_skipped_on_upstream_istio() {
            let mut client = MockIstioClient::new();
            client.expect_is_maistra_api().returning(|| false);
            client.expect_list_objects().never();

            let criteria = IstioConfigCriteria::new("bookinfo")
                .include(ResourceKind::ServiceMeshPolicies)
                .include(ResourceKind::ServiceMeshRbacConfigs);
            let list = service(client).get_istio_config_list(&criteria).await.unwrap();
            assert!(list.is_empty());
        }

        #[tokio::test]
        async fn adapters_are_listed_across_subtypes() {
            let calls = Arc::new(AtomicUsize::new(0));
            let seen = calls.clone();
            let mut client = MockIstioClient::new();
            client.expect_is_maistra_api().returning(|| false);
            client.expect_list_objects().returning(move |target, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                if target.api.plural == "prometheuses" {
                    Ok(vec![object("prometheus", "handler")])
                } else {
                    Ok(Vec::new())
                }
            });

            let criteria = IstioConfigCriteria::new("istio-system").include(ResourceKind::Adapters);
            let list = service(client).get_istio_config_list(&criteria).await.unwrap();

            assert_eq!(list.adapters.len(), 1);
            assert_eq!(
                calls.load(Ordering::SeqCst),
                crate::resources::ADAPTER_SUBTYPES.len()
            );
        }

        #[tokio::test]
        async fn warm_cache_is_used_instead_of_client() {
            let mut client = MockIstioClient::new();
            client.expect_is_maistra_api().returning(|| false);
            client.expect_list_objects().never();

            let mut cache = MockIstioCache::new();
            cache.expect_check_istio_resource().returning(|_| true);
            cache.expect_check_namespace().returning(|ns| ns == "bookinfo");
            cache
                .expect_get_istio_resources()
                .returning(|_, _| Ok(vec![object("Sidecar", "default")]));

            let criteria = IstioConfigCriteria::new("bookinfo").include(ResourceKind::Sidecars);
            let list = service_with_cache(client, cache)
                .get_istio_config_list(&criteria)
                .await
                .unwrap();
            assert_eq!(list.sidecars.len(), 1);
        }

        #[tokio::test]
        async fn cold_cache_falls_back_to_client() {
            let mut client = MockIstioClient::new();
            client.expect_is_maistra_api().returning(|| false);
            client
                .expect_list_objects()
                .times(1)
                .returning(|_, _| Ok(vec![object("Gateway", "ingress")]));

            let mut cache = MockIstioCache::new();
            cache.expect_check_istio_resource().returning(|_| true);
            cache.expect_check_namespace().returning(|_| false);
            cache.expect_get_istio_resources().never();

            let criteria = IstioConfigCriteria::new("bookinfo").include(ResourceKind::Gateways);
            let list = service_with_cache(client, cache)
                .get_istio_config_list(&criteria)
                .await
                .unwrap();
            assert_eq!(list.gateways.len(), 1);
        }

        #[tokio::test]
        async fn single_permit_still_completes() {
            let mut client = MockIstioClient::new();
            client.expect_is_maistra_api().returning(|| false);
            client
                .expect_list_objects()
                .returning(|target, _| Ok(vec![object(&target.api.kind, "x")]));

            let config = MeshConfig {
                fetch_concurrency: 1,
                ..Default::default()
            };
            let svc = IstioConfigService::new(Arc::new(client), None, Arc::new(config));
            let criteria = IstioConfigCriteria::new("bookinfo")
                .include(ResourceKind::Gateways)
                .include(ResourceKind::Sidecars)
                .include(ResourceKind::EnvoyFilters);
            let list = svc.get_istio_config_list(&criteria).await.unwrap();
            assert_eq!(list.len(), 3);
        }
    }

    mod details {
        use super::*;

        #[tokio::test]
        async fn returns_object_and_permissions() {
            let mut client = MockIstioClient::new();
            client
                .expect_get_namespace()
                .returning(|_| Ok(Default::default()));
            client
                .expect_get_object()
                .returning(|_, _, name| Ok(object("VirtualService", name)));
            client
                .expect_self_subject_access_review()
                .returning(|_, group, resource, verbs| {
                    assert_eq!(group.group(), "networking.istio.io");
                    assert_eq!(resource, "virtualservices");
                    Ok(allow_all(verbs))
                });

            let details = service(client)
                .get_istio_config_details("bookinfo", "virtualservices", "", "reviews")
                .await
                .unwrap();

            assert_eq!(details.object_type, "virtualservices");
            assert_eq!(
                details.object.unwrap().metadata.name.as_deref(),
                Some("reviews")
            );
            assert_eq!(
                details.permissions,
                ResourcePermissions {
                    create: true,
                    update: true,
                    delete: true
                }
            );
        }

        #[tokio::test]
        async fn inaccessible_namespace_short_circuits() {
            let mut client = MockIstioClient::new();
            client
                .expect_get_namespace()
                .returning(|_| Err(Error::forbidden("denied")));
            client.expect_get_object().never();

            let err = service(client)
                .get_istio_config_details("secret", "gateways", "", "gw")
                .await
                .unwrap_err();
            assert!(err.is_forbidden());
        }

        #[tokio::test]
        async fn unknown_type_is_object_type_not_found() {
            let mut client = MockIstioClient::new();
            client
                .expect_get_namespace()
                .returning(|_| Ok(Default::default()));

            let err = service(client)
                .get_istio_config_details("bookinfo", "widgets", "", "w")
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), "object type not found: widgets");
        }

        #[tokio::test]
        async fn mesh_policy_outside_istio_namespace_has_no_object() {
            let mut client = MockIstioClient::new();
            client
                .expect_get_namespace()
                .returning(|_| Ok(Default::default()));
            client.expect_get_object().never();
            client
                .expect_self_subject_access_review()
                .returning(|_, _, _, _| Ok(Vec::new()));

            let details = service(client)
                .get_istio_config_details("bookinfo", "meshpolicies", "", "default")
                .await
                .unwrap();
            assert!(details.object.is_none());
        }
    }

    mod create {
        use super::*;

        #[test]
        fn injects_kind_and_api_version_and_strips_nulls() {
            let svc = service(MockIstioClient::new());
            let body = br#"{"metadata":{"name":"gw","labels":null},"spec":{"selector":{"istio":"ingressgateway"},"servers":null}}"#;

            let value = svc.parse_json_for_create("gateways", "", body).unwrap();

            assert_eq!(
                value,
                json!({
                    "kind": "Gateway",
                    "apiVersion": "networking.istio.io/v1alpha3",
                    "metadata": { "name": "gw" },
                    "spec": { "selector": { "istio": "ingressgateway" } }
                })
            );
        }

        #[test]
        fn adapter_kind_comes_from_subtype() {
            let svc = service(MockIstioClient::new());
            let value = svc
                .parse_json_for_create("adapters", "prometheuses", br#"{"metadata":{"name":"h"}}"#)
                .unwrap();
            assert_eq!(value["kind"], "prometheus");
            assert_eq!(value["apiVersion"], "config.istio.io/v1alpha2");
        }

        #[test]
        fn non_creatable_kind_is_object_type_not_found() {
            let svc = service(MockIstioClient::new());
            let err = svc
                .parse_json_for_create("workloadentries", "", br#"{"metadata":{"name":"w"}}"#)
                .unwrap_err();
            assert_eq!(err.to_string(), "object type not found: workloadentries");
        }

        #[test]
        fn malformed_bodies_are_serialization_errors() {
            let svc = service(MockIstioClient::new());
            let bodies: [&[u8]; 4] = [
                b"{not json",
                br#"[1, 2]"#,
                br#"{"metadata":{}}"#,
                br#"{"metadata":{"name":"x"},"spec":"nope"}"#,
            ];
            for body in bodies {
                let err = svc.parse_json_for_create("sidecars", "", body).unwrap_err();
                assert!(
                    matches!(err, Error::Serialization { .. }),
                    "unexpected error for {:?}: {}",
                    String::from_utf8_lossy(body),
                    err
                );
            }
        }

        /// Story: a successful create invalidates the namespace in the cache
        #[tokio::test]
        async fn story_create_refreshes_cache() {
            let mut client = MockIstioClient::new();
            client.expect_create_object().returning(|target, ns, body| {
                assert_eq!(ns, "bookinfo");
                assert_eq!(target.api.plural, "sidecars");
                assert_eq!(body["kind"], "Sidecar");
                Ok(object("Sidecar", "default"))
            });
            let mut cache = MockIstioCache::new();
            cache
                .expect_refresh_namespace()
                .withf(|ns| ns == "bookinfo")
                .times(1)
                .return_const(());

            let details = service_with_cache(client, cache)
                .create_istio_config_detail(
                    "bookinfo",
                    "sidecars",
                    "",
                    br#"{"metadata":{"name":"default"},"spec":{}}"#,
                )
                .await
                .unwrap();
            assert!(details.object.is_some());
        }

        #[tokio::test]
        async fn invalid_body_never_reaches_cluster() {
            let mut client = MockIstioClient::new();
            client.expect_create_object().never();
            let mut cache = MockIstioCache::new();
            cache.expect_refresh_namespace().never();

            let err = service_with_cache(client, cache)
                .create_istio_config_detail("bookinfo", "sidecars", "", b"{}")
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Serialization { .. }));
        }
    }

    mod mutate {
        use super::*;

        #[tokio::test]
        async fn update_uses_subtype_for_templates() {
            let mut client = MockIstioClient::new();
            client
                .expect_update_object()
                .returning(|target, _, name, patch| {
                    assert_eq!(target.api.plural, "metrics");
                    assert_eq!(patch, json!({"spec": {"value": "1"}}));
                    Ok(object("metric", name))
                });
            let mut cache = MockIstioCache::new();
            cache.expect_refresh_namespace().times(1).return_const(());

            let details = service_with_cache(client, cache)
                .update_istio_config_detail(
                    "istio-system",
                    "templates",
                    "metrics",
                    "requestcount",
                    br#"{"spec":{"value":"1"}}"#,
                )
                .await
                .unwrap();
            assert_eq!(details.object_type, "templates");
        }

        #[tokio::test]
        async fn failed_delete_does_not_refresh_cache() {
            let mut client = MockIstioClient::new();
            client
                .expect_delete_object()
                .returning(|_, _, _| Err(transport_error()));
            let mut cache = MockIstioCache::new();
            cache.expect_refresh_namespace().never();

            let result = service_with_cache(client, cache)
                .delete_istio_config_detail("bookinfo", "gateways", "", "gw")
                .await;
            assert!(result.is_err());
        }

        #[tokio::test]
        async fn delete_refreshes_cache() {
            let mut client = MockIstioClient::new();
            client.expect_delete_object().returning(|_, _, _| Ok(()));
            let mut cache = MockIstioCache::new();
            cache.expect_refresh_namespace().times(1).return_const(());

            service_with_cache(client, cache)
                .delete_istio_config_detail("bookinfo", "gateways", "", "gw")
                .await
                .unwrap();
        }
    }

    mod permissions {
        use super::*;

        #[tokio::test]
        async fn patch_counts_as_update() {
            let mut client = MockIstioClient::new();
            client
                .expect_self_subject_access_review()
                .returning(|_, _, _, _| {
                    Ok(vec![
                        AccessReview { verb: Verb::Create, allowed: false },
                        AccessReview { verb: Verb::Patch, allowed: true },
                        AccessReview { verb: Verb::Update, allowed: false },
                        AccessReview { verb: Verb::Delete, allowed: false },
                    ])
                });

            let perms = service(client)
                .get_permissions("bookinfo", "gateways", "")
                .await;
            assert_eq!(
                perms,
                ResourcePermissions {
                    create: false,
                    update: true,
                    delete: false
                }
            );
        }

        #[tokio::test]
        async fn review_errors_yield_no_permissions() {
            let mut client = MockIstioClient::new();
            client
                .expect_self_subject_access_review()
                .returning(|_, _, _, _| Err(transport_error()));

            let perms = service(client).get_permissions("bookinfo", "gateways", "").await;
            assert_eq!(perms, ResourcePermissions::default());
        }

        #[tokio::test]
        async fn unknown_types_are_not_reviewed() {
            let mut client = MockIstioClient::new();
            client.expect_self_subject_access_review().never();

            let perms = service(client).get_permissions("bookinfo", "widgets", "").await;
            assert_eq!(perms, ResourcePermissions::default());
        }

        #[tokio::test]
        async fn subtype_replaces_resource_type() {
            let mut client = MockIstioClient::new();
            client
                .expect_self_subject_access_review()
                .withf(|_, _, resource, _| resource == "prometheuses")
                .returning(|_, _, _, verbs| Ok(allow_all(verbs)));

            let perms = service(client)
                .get_permissions("istio-system", "adapters", "prometheuses")
                .await;
            assert!(perms.create);
        }

        #[tokio::test]
        async fn new_config_permissions_cover_every_namespace() {
            let mut client = MockIstioClient::new();
            client
                .expect_self_subject_access_review()
                .returning(|ns, _, _, verbs| {
                    if ns == "bookinfo" {
                        Ok(allow_all(verbs))
                    } else {
                        Ok(Vec::new())
                    }
                });

            let namespaces = vec!["bookinfo".to_string(), "default".to_string()];
            let perms = service(client)
                .get_istio_config_permissions(&namespaces)
                .await;

            assert_eq!(perms.len(), 2);
            assert_eq!(perms["bookinfo"].len(), NEW_ISTIO_CONFIG_KINDS.len());
            assert!(perms["bookinfo"]["authorizationpolicies"].create);
            assert!(!perms["default"]["sidecars"].delete);
        }

        #[tokio::test]
        async fn no_namespaces_no_reviews() {
            let mut client = MockIstioClient::new();
            client.expect_self_subject_access_review().never();
            let perms = service(client).get_istio_config_permissions(&[]).await;
            assert!(perms.is_empty());
        }
    }
}
