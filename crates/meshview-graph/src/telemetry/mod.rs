//! Telemetry edge repair
//!
//! Raw telemetry records describe one observed request between a source and
//! a destination. Some records are known to be malformed or ambiguous; the
//! vendor modules here fix or flag them before graph assembly.

pub mod istio;

pub use istio::{
    handle_response_code, is_bad_dest_telemetry, is_bad_source_telemetry, DestinationLabels,
    TelemetryNormalizer,
};
