//! Graph request handling for meshview
//!
//! Resolves raw graph request parameters into validated [`GraphOptions`]
//! and repairs telemetry edge records before graph assembly.
//!
//! Related crates:
//! - `meshview-business`: accessible namespaces and Istio configuration
//! - `meshview-common`: errors and mesh configuration

pub mod duration;
pub mod options;
pub mod telemetry;

pub use options::{
    GraphKind, GraphOptions, GraphRequest, GraphType, GroupBy, NamespaceInfo, NamespaceInfoMap,
    NodeOptions, RequestedAppenders,
};
pub use telemetry::TelemetryNormalizer;

// Re-export common error types
pub use meshview_common::{Error, Result, UNKNOWN};

/// Protocol label value for gRPC traffic
pub const GRPC: &str = "grpc";

/// Whether a telemetry label carries a usable value
pub fn is_ok(value: &str) -> bool {
    !value.is_empty() && value != UNKNOWN
}

/// Whether an HTTP response code denotes a failure
///
/// Non-numeric codes (e.g. `-` for a reset connection) count as failures.
pub fn is_http_err(code: &str) -> bool {
    code.parse::<u16>().map_or(true, |c| c >= 400)
}
