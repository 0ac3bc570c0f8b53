//! Graph request options
//!
//! Turns raw path and query parameters into an immutable [`GraphOptions`].
//! Every validation failure is terminal: malformed input is a bad request,
//! an inaccessible namespace is forbidden.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::debug;

use meshview_business::{AccessibleNamespaceSource, AccessibleNamespaces};
use meshview_common::{Error, MeshConfig};

use crate::duration::{format_duration, parse_duration};

/// The only supported config vendor
pub const VENDOR_CYTOSCAPE: &str = "cytoscape";
/// The only supported telemetry vendor
pub const VENDOR_ISTIO: &str = "istio";

const DEFAULT_DURATION: Duration = Duration::from_secs(10 * 60);

/// Shape of the nodes in a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GraphType {
    /// One node per app
    App,
    /// One node per service
    Service,
    /// One node per app version
    VersionedApp,
    /// One node per workload
    #[default]
    Workload,
}

impl GraphType {
    /// Query parameter spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Service => "service",
            Self::VersionedApp => "versionedApp",
            Self::Workload => "workload",
        }
    }
}

impl fmt::Display for GraphType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GraphType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(Self::App),
            "service" => Ok(Self::Service),
            "versionedApp" => Ok(Self::VersionedApp),
            "workload" => Ok(Self::Workload),
            _ => Err(Error::bad_request_for_param(
                "graphType",
                format!("Invalid graphType [{}]", s),
            )),
        }
    }
}

/// Box grouping applied to graph nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupBy {
    /// Group versions of one app
    App,
    /// No grouping
    #[default]
    None,
    /// Group by version
    Version,
}

impl FromStr for GroupBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(Self::App),
            "none" => Ok(Self::None),
            "version" => Ok(Self::Version),
            _ => Err(Error::bad_request_for_param(
                "groupBy",
                format!("Invalid groupBy [{}]", s),
            )),
        }
    }
}

/// Which appenders the caller asked for
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestedAppenders {
    /// Parameter absent: run every appender
    #[default]
    All,
    /// Parameter present: exactly these names, trimmed, empties kept
    Named(Vec<String>),
}

/// Path parameters scoping a node-detail graph
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct NodeOptions {
    /// App of the focal node
    pub app: Option<String>,
    /// Namespace of the focal node
    pub namespace: Option<String>,
    /// Service of the focal node
    pub service: Option<String>,
    /// Version of the focal node
    pub version: Option<String>,
    /// Workload of the focal node
    pub workload: Option<String>,
}

impl NodeOptions {
    /// Whether any of app, version or workload is set
    fn scopes_app_node(&self) -> bool {
        self.app.is_some() || self.version.is_some() || self.workload.is_some()
    }
}

/// Effective query window for one namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceInfo {
    /// Namespace name
    pub name: String,
    /// Duration clamped to the namespace's lifetime
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
    /// Whether this is the Istio control plane namespace
    pub is_istio: bool,
}

/// Per-namespace query windows keyed by name
pub type NamespaceInfoMap = BTreeMap<String, NamespaceInfo>;

/// Whether a graph covers whole namespaces or one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GraphKind {
    /// Namespace graph
    Namespace,
    /// Node-detail graph
    Node,
}

/// Raw parameters of one graph request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphRequest {
    /// Path parameters
    pub path: NodeOptions,
    /// Query parameters; a key present with an empty value is kept
    pub query: BTreeMap<String, String>,
}

impl GraphRequest {
    /// Request from query pairs, later duplicates winning
    pub fn from_query<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            path: NodeOptions::default(),
            query: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Set the path namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.path.namespace = Some(namespace.into());
        self
    }

    /// Set the path app
    pub fn app(mut self, app: impl Into<String>) -> Self {
        self.path.app = Some(app.into());
        self
    }

    /// Set the path service
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.path.service = Some(service.into());
        self
    }

    /// Set the path version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.path.version = Some(version.into());
        self
    }

    /// Set the path workload
    pub fn workload(mut self, workload: impl Into<String>) -> Self {
        self.path.workload = Some(workload.into());
        self
    }

    /// Non-empty value of a query parameter
    fn param(&self, key: &str) -> Option<&str> {
        self.query
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Validated options for a single graph request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphOptions {
    /// Config vendor
    pub config_vendor: String,
    /// Telemetry vendor
    pub telemetry_vendor: String,
    /// Requested duration before per-namespace clamping
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
    /// Node shape
    pub graph_type: GraphType,
    /// Node grouping
    pub group_by: GroupBy,
    /// End of the query window, unix seconds
    pub query_time: i64,
    /// Raw query parameters for vendor-specific handling
    pub params: BTreeMap<String, String>,
    /// Requested appenders
    pub appenders: RequestedAppenders,
    /// Whether to inject service nodes between workloads
    pub inject_service_nodes: bool,
    /// Node-detail scoping
    pub node: NodeOptions,
    /// Namespaces the caller could access at resolution time
    pub accessible_namespaces: AccessibleNamespaces,
    /// Requested namespaces with their effective windows
    pub namespaces: NamespaceInfoMap,
}

impl GraphOptions {
    /// Resolve options, fetching the caller's accessible namespaces
    pub async fn resolve(
        request: &GraphRequest,
        source: &dyn AccessibleNamespaceSource,
        config: &MeshConfig,
    ) -> Result<Self, Error> {
        let accessible = source.accessible_namespaces().await;
        Self::resolve_with(request, accessible, config, Utc::now())
    }

    /// Resolve options against a known accessible set and clock
    pub fn resolve_with(
        request: &GraphRequest,
        accessible: AccessibleNamespaces,
        config: &MeshConfig,
        now: DateTime<Utc>,
    ) -> Result<Self, Error> {
        let appenders = match request.query.get("appenders") {
            Some(raw) => {
                RequestedAppenders::Named(raw.split(',').map(|s| s.trim().to_string()).collect())
            }
            None => RequestedAppenders::All,
        };

        let config_vendor = match request.param("configVendor") {
            None | Some(VENDOR_CYTOSCAPE) => VENDOR_CYTOSCAPE,
            Some(other) => {
                return Err(Error::bad_request_for_param(
                    "configVendor",
                    format!("Invalid configVendor [{}]", other),
                ))
            }
        };

        let duration = match request.param("duration") {
            None => DEFAULT_DURATION,
            Some(raw) => {
                let parsed = parse_duration(raw)?;
                if parsed.is_zero() {
                    return Err(Error::bad_request_for_param(
                        "duration",
                        format!("Invalid duration [{}]", raw),
                    ));
                }
                parsed
            }
        };

        let graph_type = match request.param("graphType") {
            None => GraphType::default(),
            Some(raw) => raw.parse()?,
        };
        if request.path.scopes_app_node()
            && !matches!(graph_type, GraphType::App | GraphType::VersionedApp)
        {
            return Err(Error::bad_request_for_param(
                "graphType",
                format!(
                    "Invalid graphType [{}]. This node detail graph supports only graphType app or versionedApp.",
                    graph_type
                ),
            ));
        }

        let group_by = match request.param("groupBy") {
            None => GroupBy::default(),
            Some(raw) => raw.parse()?,
        };

        let mut inject_service_nodes = match request.param("injectServiceNodes") {
            None => false,
            Some(raw) => parse_bool(raw).ok_or_else(|| {
                Error::bad_request_for_param(
                    "injectServiceNodes",
                    format!("Invalid injectServiceNodes [{}]", raw),
                )
            })?,
        };

        let query_time = match request.param("queryTime") {
            None => now.timestamp(),
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                Error::bad_request_for_param("queryTime", format!("Invalid queryTime [{}]", raw))
            })?,
        };

        let telemetry_vendor = match request.param("telemetryVendor") {
            None | Some(VENDOR_ISTIO) => VENDOR_ISTIO,
            Some(other) => {
                return Err(Error::bad_request_for_param(
                    "telemetryVendor",
                    format!("Invalid telemetryVendor [{}]", other),
                ))
            }
        };

        // A path namespace makes this a node graph for that namespace alone.
        let requested = match request.path.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            Some(ns) => ns,
            None => request.param("namespaces").ok_or_else(|| {
                Error::bad_request_for_param(
                    "namespaces",
                    "At least one namespace must be specified via the namespaces query parameter.",
                )
            })?,
        };

        let mut namespaces = NamespaceInfoMap::new();
        for name in requested.split(',').map(str::trim) {
            let Some(created) = accessible.get(name) else {
                return Err(Error::forbidden(format!(
                    "Requested namespace [{}] is not accessible.",
                    name
                )));
            };
            let info = NamespaceInfo {
                name: name.to_string(),
                duration: safe_namespace_duration(name, *created, duration, query_time, now)?,
                is_istio: config.is_istio_namespace(name),
            };
            namespaces.insert(name.to_string(), info);
        }

        if graph_type == GraphType::Service {
            inject_service_nodes = true;
        }

        Ok(Self {
            config_vendor: config_vendor.to_string(),
            telemetry_vendor: telemetry_vendor.to_string(),
            duration,
            graph_type,
            group_by,
            query_time,
            params: request.query.clone(),
            appenders,
            inject_service_nodes,
            node: request.path.clone(),
            accessible_namespaces: accessible,
            namespaces,
        })
    }

    /// Namespace graph unless a focal node is set
    pub fn graph_kind(&self) -> GraphKind {
        let node = &self.node;
        if node.app.is_some()
            || node.version.is_some()
            || node.workload.is_some()
            || node.service.is_some()
        {
            GraphKind::Node
        } else {
            GraphKind::Namespace
        }
    }
}

/// Clamp `requested` so the window never starts before the namespace existed
///
/// A `query_time` of 0 means `now`. Namespaces without a known creation
/// time are not clamped.
pub fn safe_namespace_duration(
    namespace: &str,
    created: Option<DateTime<Utc>>,
    requested: Duration,
    query_time: i64,
    now: DateTime<Utc>,
) -> Result<Duration, Error> {
    let Some(created) = created else {
        return Ok(requested);
    };

    let end = if query_time == 0 {
        now
    } else {
        DateTime::from_timestamp(query_time, 0).ok_or_else(|| {
            Error::bad_request_for_param("queryTime", format!("Invalid queryTime [{}]", query_time))
        })?
    };

    let lifetime = end - created;
    let lifetime = match lifetime.to_std() {
        Ok(lifetime) if !lifetime.is_zero() => lifetime,
        _ => {
            return Err(Error::bad_request(format!(
                "Namespace [{}] did not exist at requested queryTime [{}]",
                namespace,
                end.to_rfc3339()
            )))
        }
    };

    if lifetime < requested {
        debug!(
            namespace,
            requested = %format_duration(requested),
            safe = %format_duration(lifetime),
            "reducing requested duration to namespace lifetime"
        );
        return Ok(lifetime);
    }
    Ok(requested)
}

/// Boolean spellings accepted for flags: 1, t, T, TRUE, true, True and the false forms
fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn serialize_duration<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}
