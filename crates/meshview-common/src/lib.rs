//! Common types for meshview: errors, configuration, telemetry and utilities

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod kube_utils;
pub mod metrics;
pub mod telemetry;

pub use config::MeshConfig;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label value telemetry backends emit when they could not resolve a field
pub const UNKNOWN: &str = "unknown";
