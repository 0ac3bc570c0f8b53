//! Internal metrics
//!
//! Business-layer operations record their latency into a single histogram
//! labelled by package, type and function, plus whether they failed.

use std::time::Instant;

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("meshview"));

/// Histogram of business function duration
///
/// Labels:
/// - `package`: business, graph
/// - `type`: service type (e.g., IstioConfigService)
/// - `function`: operation name
/// - `result`: success, error
pub static FUNCTION_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("meshview_business_function_duration_seconds")
        .with_description("Duration of business layer functions in seconds")
        .with_unit("s")
        .build()
});

/// Counter of cluster-scoped fetches skipped for lack of permission
///
/// Labels:
/// - `resource`: resource type plural
pub static PERMISSION_SKIPS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("meshview_permission_skips_total")
        .with_description("Cluster-scoped resource fetches downgraded to empty results")
        .with_unit("{fetches}")
        .build()
});

/// Records the duration of one function call when observed
///
/// ```ignore
/// let timer = FunctionTimer::start("business", "IstioConfigService", "GetIstioConfigList");
/// let result = do_work().await;
/// timer.observe(result.is_ok());
/// ```
#[derive(Debug)]
pub struct FunctionTimer {
    package: &'static str,
    type_name: &'static str,
    function: &'static str,
    started: Instant,
}

impl FunctionTimer {
    /// Start timing a function
    pub fn start(package: &'static str, type_name: &'static str, function: &'static str) -> Self {
        Self {
            package,
            type_name,
            function,
            started: Instant::now(),
        }
    }

    /// Seconds elapsed since the timer started
    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Record the elapsed time with the call outcome
    pub fn observe(self, success: bool) {
        let result = if success { "success" } else { "error" };
        FUNCTION_DURATION.record(
            self.elapsed_secs(),
            &[
                KeyValue::new("package", self.package),
                KeyValue::new("type", self.type_name),
                KeyValue::new("function", self.function),
                KeyValue::new("result", result),
            ],
        );
    }
}

/// Count a cluster-scoped fetch that was downgraded to an empty result
pub fn record_permission_skip(resource: &'static str) {
    PERMISSION_SKIPS.add(1, &[KeyValue::new("resource", resource)]);
}
