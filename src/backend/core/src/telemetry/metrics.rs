//! Prometheus metrics.
//!
//! Counters and gauges are recorded with the `metrics` macros where the work
//! happens; this module installs the recorder and renders `GET /metrics`.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::time::Instant;

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for request durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            duration_buckets: default_duration_buckets(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
}

/// Handle to the installed Prometheus recorder. Empty when metrics are off.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// Registry that renders nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Install the global Prometheus recorder.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the buckets are empty.
pub fn init_metrics(config: &MetricsConfig) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets(&config.duration_buckets)?
        .install_recorder()?;

    register_metric_descriptions();
    tracing::info!("Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_counter!("http_requests_total", "Total number of HTTP requests");
    describe_counter!("pdfgen_errors_total", "Errors by code and severity");
    describe_counter!("pdfgen_events_appended_total", "Events appended to the log, by kind");
    describe_counter!(
        "pdfgen_concurrency_conflicts_total",
        "Appends rejected by the expected-version check"
    );
    describe_counter!(
        "pdfgen_projection_events_folded_total",
        "Events folded into projections"
    );
    describe_gauge!(
        "pdfgen_projection_position",
        "Last global sequence folded by each projection"
    );
    describe_histogram!("pdfgen_render_duration_seconds", "PDF compile duration in seconds");
}

/// Request duration histogram for HTTP requests.
pub struct RequestDurationHistogram;

impl RequestDurationHistogram {
    pub fn record(method: &str, path: &str, status_code: u16, duration_seconds: f64) {
        histogram!(
            "http_request_duration_seconds",
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status_code" => status_code.to_string(),
        )
        .record(duration_seconds);

        counter!(
            "http_requests_total",
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status_code" => status_code.to_string(),
        )
        .increment(1);
    }

    /// Start timing a request.
    pub fn start(method: &str, path: &str) -> RequestTimer {
        RequestTimer {
            start: Instant::now(),
            method: method.to_string(),
            path: path.to_string(),
        }
    }
}

/// Timer for measuring request durations.
pub struct RequestTimer {
    start: Instant,
    method: String,
    path: String,
}

impl RequestTimer {
    pub fn finish(self, status_code: u16) {
        let duration = self.start.elapsed().as_secs_f64();
        RequestDurationHistogram::record(&self.method, &self.path, status_code, duration);
    }
}
