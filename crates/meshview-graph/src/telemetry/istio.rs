//! Istio telemetry corner cases

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use meshview_common::MeshConfig;

use crate::{is_http_err, is_ok, GRPC, UNKNOWN};

/// Name shared by the egress gateway's service, workload and app
pub const EGRESS_GATEWAY: &str = "istio-egressgateway";

const EGRESS_VERSION: &str = "latest";

// Physical IP address with optional port, e.g. 10.11.12.13:80
static BAD_SERVICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]+\.[0-9]+\.[0-9]+\.[0-9]+(:[0-9]+)?$").expect("bad service regex is valid")
});

/// Destination side of a telemetry edge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DestinationLabels {
    /// destination_service_namespace
    pub svc_ns: String,
    /// destination_service (host)
    pub svc: String,
    /// destination_service_name
    pub svc_name: String,
    /// destination_workload_namespace
    pub wl_ns: String,
    /// destination_workload
    pub wl: String,
    /// destination_app
    pub app: String,
    /// destination_version
    pub version: String,
}

/// Applies destination rewrites for a configured mesh
#[derive(Debug, Clone)]
pub struct TelemetryNormalizer {
    istio_namespace: String,
    egress_host: String,
    multi_cluster_suffix: String,
}

impl TelemetryNormalizer {
    /// Normalizer for the mesh described by `config`
    pub fn new(config: &MeshConfig) -> Self {
        Self {
            istio_namespace: config.istio_namespace.clone(),
            egress_host: config.egress_gateway_host(),
            multi_cluster_suffix: config.multi_cluster_host_suffix.clone(),
        }
    }

    /// Rewrite the destination of one edge when a known corner case applies
    ///
    /// Call after source validation and before destination processing.
    /// The flag reports whether anything changed.
    pub fn handle_destination(
        &self,
        source_ns: &str,
        source_wl: &str,
        dest: DestinationLabels,
    ) -> (DestinationLabels, bool) {
        if let Some((svc_ns, svc_name)) = self.multi_cluster_target(source_ns, source_wl, &dest) {
            trace!(from = %dest.svc_name, namespace = %svc_ns, service = %svc_name, "multi-cluster destination rewritten");
            return (
                DestinationLabels {
                    svc_ns,
                    svc_name,
                    ..dest
                },
                true,
            );
        }

        if dest.svc == self.egress_host && dest.svc == dest.svc_name {
            trace!(host = %dest.svc, "egress gateway destination collapsed");
            return (
                DestinationLabels {
                    svc_ns: self.istio_namespace.clone(),
                    svc: dest.svc,
                    svc_name: EGRESS_GATEWAY.to_string(),
                    wl_ns: self.istio_namespace.clone(),
                    wl: EGRESS_GATEWAY.to_string(),
                    app: EGRESS_GATEWAY.to_string(),
                    version: EGRESS_VERSION.to_string(),
                },
                true,
            );
        }

        (dest, false)
    }

    /// Remote `<name>.<namespace>.<suffix>` destination seen from an unknown source
    ///
    /// The receiving cluster reports the ServiceEntry host as the service
    /// name; unwrapping it lets remote and local requests share one node.
    fn multi_cluster_target(
        &self,
        source_ns: &str,
        source_wl: &str,
        dest: &DestinationLabels,
    ) -> Option<(String, String)> {
        if source_ns != UNKNOWN || source_wl != UNKNOWN {
            return None;
        }
        let parts: Vec<&str> = dest.svc_name.split('.').collect();
        match parts.as_slice() {
            [name, namespace, suffix] if *suffix == self.multi_cluster_suffix => {
                Some((namespace.to_string(), name.to_string()))
            }
            _ => None,
        }
    }
}

/// Response code to record for an edge
///
/// The gRPC status is used only for gRPC traffic whose HTTP transport
/// succeeded and whose telemetry actually carried a status.
pub fn handle_response_code<'a>(
    protocol: &str,
    http_code: &'a str,
    grpc_status: Option<&'a str>,
) -> &'a str {
    match grpc_status {
        Some(status) if protocol == GRPC && !is_http_err(http_code) => status,
        _ => http_code,
    }
}

/// A source namespace with neither workload nor app
pub fn is_bad_source_telemetry(ns: &str, wl: &str, app: &str) -> bool {
    is_ok(ns) && !is_ok(wl) && !is_ok(app)
}

/// Incomplete record from a pod lifecycle change: no workload and an IP as service
pub fn is_bad_dest_telemetry(svc: &str, svc_name: &str, wl: &str) -> bool {
    !is_ok(wl)
        && is_ok(svc)
        && is_ok(svc_name)
        && svc == svc_name
        && BAD_SERVICE_RE.is_match(svc_name)
}
