//! Telemetry: structured logging and Prometheus metrics.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{init_metrics, MetricsConfig, MetricsRegistry, RequestDurationHistogram, RequestTimer};

/// Initialize logging, then metrics.
pub fn init_telemetry(logging: &LoggingConfig, metrics: &MetricsConfig) -> anyhow::Result<MetricsRegistry> {
    init_logging(logging)?;
    init_metrics(metrics)
}
