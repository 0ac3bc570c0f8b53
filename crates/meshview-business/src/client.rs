//! Cluster client abstraction for Istio configuration
//!
//! [`IstioClient`] is the seam the business services depend on; the kube-rs
//! backed [`KubeIstioClient`] is the production implementation. Clients are
//! built per caller by a [`ClientFactory`] so every API call runs with the
//! caller's own RBAC through Kubernetes impersonation.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::try_join_all;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Config};
use serde_json::Value;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use meshview_common::Error;

use crate::resources::{ApiGroup, ResourceScope, ResourceTarget};

/// A single Istio configuration object as returned by the API server
pub type IstioObject = DynamicObject;

/// Verbs checked by self-subject access reviews
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// create
    Create,
    /// patch
    Patch,
    /// update
    Update,
    /// delete
    Delete,
}

impl Verb {
    /// Verb string as understood by the authorization API
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Patch => "patch",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Verbs reviewed when computing config permissions
pub const PERMISSION_VERBS: &[Verb] = &[Verb::Create, Verb::Patch, Verb::Update, Verb::Delete];

/// Outcome of a self-subject access review for one verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessReview {
    /// Reviewed verb
    pub verb: Verb,
    /// Whether the caller may perform it
    pub allowed: bool,
}

/// Identity a request is served on behalf of
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    /// Authenticated user name
    pub username: String,
    /// Groups the user belongs to
    pub groups: Vec<String>,
}

impl CallerIdentity {
    /// Identity with no extra groups
    pub fn user(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            groups: Vec::new(),
        }
    }
}

/// Cluster operations needed by the business layer
///
/// Cluster-scoped targets ignore the namespace argument.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IstioClient: Send + Sync {
    /// List all objects of a kind in a namespace
    async fn list_objects(
        &self,
        target: &ResourceTarget,
        namespace: &str,
    ) -> Result<Vec<IstioObject>, Error>;

    /// Get one object by name
    async fn get_object(
        &self,
        target: &ResourceTarget,
        namespace: &str,
        name: &str,
    ) -> Result<IstioObject, Error>;

    /// Create an object from a complete JSON body
    async fn create_object(
        &self,
        target: &ResourceTarget,
        namespace: &str,
        body: Value,
    ) -> Result<IstioObject, Error>;

    /// Apply a JSON merge patch to an existing object
    async fn update_object(
        &self,
        target: &ResourceTarget,
        namespace: &str,
        name: &str,
        patch: Value,
    ) -> Result<IstioObject, Error>;

    /// Delete an object by name
    async fn delete_object(
        &self,
        target: &ResourceTarget,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error>;

    /// Ask the API server which of `verbs` the caller may use on a resource
    async fn self_subject_access_review(
        &self,
        namespace: &str,
        api_group: ApiGroup,
        resource_type: &str,
        verbs: &[Verb],
    ) -> Result<Vec<AccessReview>, Error>;

    /// List namespaces visible to the caller
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, Error>;

    /// Get one namespace by name
    async fn get_namespace(&self, name: &str) -> Result<Namespace, Error>;

    /// Whether the cluster serves the Maistra flavored APIs
    async fn is_maistra_api(&self) -> bool;
}

/// Builds cluster clients for the service and for individual callers
#[cfg_attr(test, automock)]
pub trait ClientFactory: Send + Sync {
    /// Client running as the service's own identity
    fn service_client(&self) -> Result<Arc<dyn IstioClient>, Error>;

    /// Client impersonating `identity`
    fn client_for(&self, identity: &CallerIdentity) -> Result<Arc<dyn IstioClient>, Error>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Capability {
    MaistraApi,
    Served { api_version: String, plural: String },
}

/// Memoized answers about what the cluster serves
///
/// Populated lazily on first question. Shared by every client a factory
/// builds, so discovery runs once per process until [`invalidate`] is called.
///
/// [`invalidate`]: CapabilityProbe::invalidate
#[derive(Debug, Default)]
pub struct CapabilityProbe {
    answers: DashMap<Capability, bool>,
}

impl CapabilityProbe {
    /// Create an empty probe
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the cluster serves the Maistra authentication API group
    pub async fn is_maistra(&self, client: &Client) -> bool {
        if let Some(answer) = self.answers.get(&Capability::MaistraApi) {
            return *answer;
        }

        let maistra_group = ApiGroup::MaistraAuthentication.group();
        let answer = match client.list_api_groups().await {
            Ok(groups) => groups.groups.iter().any(|g| g.name == maistra_group),
            Err(e) => {
                // Not memoized so the next call retries discovery.
                warn!(error = %e, "API group discovery failed, assuming upstream Istio");
                return false;
            }
        };

        info!(maistra = answer, "detected mesh flavor");
        self.answers.insert(Capability::MaistraApi, answer);
        answer
    }

    /// Whether the resource behind `target` is served by the cluster
    pub async fn is_served(&self, client: &Client, target: &ResourceTarget) -> bool {
        let key = Capability::Served {
            api_version: target.api.api_version.clone(),
            plural: target.api.plural.clone(),
        };
        if let Some(answer) = self.answers.get(&key) {
            return *answer;
        }

        let answer = match client
            .list_api_group_resources(&target.api.api_version)
            .await
        {
            Ok(list) => list.resources.iter().any(|r| r.name == target.api.plural),
            Err(kube::Error::Api(ae)) if ae.code == 404 => false,
            Err(e) => {
                warn!(
                    error = %e,
                    api_version = %target.api.api_version,
                    "resource discovery failed"
                );
                return false;
            }
        };

        debug!(
            api_version = %target.api.api_version,
            plural = %target.api.plural,
            served = answer,
            "resource discovery"
        );
        self.answers.insert(key, answer);
        answer
    }

    /// Forget every memoized answer
    pub fn invalidate(&self) {
        self.answers.clear();
    }
}

/// [`IstioClient`] backed by a kube-rs [`Client`]
#[derive(Clone)]
pub struct KubeIstioClient {
    client: Client,
    probe: Arc<CapabilityProbe>,
}

impl KubeIstioClient {
    /// Wrap a kube client, sharing `probe` with sibling clients
    pub fn new(client: Client, probe: Arc<CapabilityProbe>) -> Self {
        Self { client, probe }
    }

    /// The capability probe answering discovery questions
    pub fn probe(&self) -> &Arc<CapabilityProbe> {
        &self.probe
    }

    fn api(&self, target: &ResourceTarget, namespace: &str) -> Api<DynamicObject> {
        match target.scope {
            ResourceScope::Namespaced => {
                Api::namespaced_with(self.client.clone(), namespace, &target.api)
            }
            ResourceScope::Cluster => Api::all_with(self.client.clone(), &target.api),
        }
    }

    async fn review_verb(
        &self,
        namespace: &str,
        api_group: ApiGroup,
        resource_type: &str,
        verb: Verb,
    ) -> Result<AccessReview, Error> {
        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    namespace: Some(namespace.to_string()),
                    group: Some(api_group.group().to_string()),
                    resource: Some(resource_type.to_string()),
                    verb: Some(verb.as_str().to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };

        let created = api.create(&PostParams::default(), &review).await?;
        Ok(AccessReview {
            verb,
            allowed: created.status.map(|s| s.allowed).unwrap_or(false),
        })
    }
}

#[async_trait]
impl IstioClient for KubeIstioClient {
    async fn list_objects(
        &self,
        target: &ResourceTarget,
        namespace: &str,
    ) -> Result<Vec<IstioObject>, Error> {
        if !self.probe.is_served(&self.client, target).await {
            debug!(plural = %target.api.plural, "resource not served, returning empty list");
            return Ok(Vec::new());
        }
        let list = self
            .api(target, namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    async fn get_object(
        &self,
        target: &ResourceTarget,
        namespace: &str,
        name: &str,
    ) -> Result<IstioObject, Error> {
        Ok(self.api(target, namespace).get(name).await?)
    }

    async fn create_object(
        &self,
        target: &ResourceTarget,
        namespace: &str,
        body: Value,
    ) -> Result<IstioObject, Error> {
        let object: DynamicObject = serde_json::from_value(body)
            .map_err(|e| Error::serialization_for_kind(target.api.kind.clone(), e.to_string()))?;
        Ok(self
            .api(target, namespace)
            .create(&PostParams::default(), &object)
            .await?)
    }

    async fn update_object(
        &self,
        target: &ResourceTarget,
        namespace: &str,
        name: &str,
        patch: Value,
    ) -> Result<IstioObject, Error> {
        Ok(self
            .api(target, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn delete_object(
        &self,
        target: &ResourceTarget,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error> {
        self.api(target, namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn self_subject_access_review(
        &self,
        namespace: &str,
        api_group: ApiGroup,
        resource_type: &str,
        verbs: &[Verb],
    ) -> Result<Vec<AccessReview>, Error> {
        try_join_all(
            verbs
                .iter()
                .map(|verb| self.review_verb(namespace, api_group, resource_type, *verb)),
        )
        .await
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }

    async fn is_maistra_api(&self) -> bool {
        self.probe.is_maistra(&self.client).await
    }
}

/// [`ClientFactory`] building kube-rs clients from one base configuration
pub struct KubeClientFactory {
    base: Config,
    service: Arc<KubeIstioClient>,
    probe: Arc<CapabilityProbe>,
}

impl KubeClientFactory {
    /// Build a factory from in-cluster or kubeconfig settings
    pub async fn infer() -> Result<Self, Error> {
        let base = Config::infer().await.map_err(|e| {
            Error::internal_with_context("bootstrap", format!("failed to infer kube config: {}", e))
        })?;
        Self::from_config(base)
    }

    /// Build a factory from an explicit configuration
    pub fn from_config(base: Config) -> Result<Self, Error> {
        let probe = Arc::new(CapabilityProbe::new());
        let client = Client::try_from(base.clone())?;
        let service = Arc::new(KubeIstioClient::new(client, probe.clone()));
        info!(cluster_url = %base.cluster_url, "cluster client factory ready");
        Ok(Self {
            base,
            service,
            probe,
        })
    }

    /// The shared capability probe
    pub fn probe(&self) -> &Arc<CapabilityProbe> {
        &self.probe
    }
}

impl ClientFactory for KubeClientFactory {
    fn service_client(&self) -> Result<Arc<dyn IstioClient>, Error> {
        Ok(self.service.clone())
    }

    fn client_for(&self, identity: &CallerIdentity) -> Result<Arc<dyn IstioClient>, Error> {
        if identity.username.is_empty() {
            return Err(Error::forbidden("caller identity has no username"));
        }
        let mut config = self.base.clone();
        config.auth_info.impersonate = Some(identity.username.clone());
        config.auth_info.impersonate_groups = if identity.groups.is_empty() {
            None
        } else {
            Some(identity.groups.clone())
        };
        let client = Client::try_from(config)?;
        Ok(Arc::new(KubeIstioClient::new(client, self.probe.clone())))
    }
}
