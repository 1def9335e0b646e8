//! Telemetry: structured logging and engine metrics.
//!
//! # Example
//!
//! ```rust,no_run
//! use cadence_core::telemetry::{init_telemetry, LoggingConfig};
//!
//! init_telemetry(&LoggingConfig::default()).expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{build_filter, filter_directives, init_logging, job_span, LogFormat, LoggingConfig};
pub use metrics::{describe_metrics, JobMetrics};

/// Install the tracing subscriber and describe engine metrics.
pub fn init_telemetry(logging: &LoggingConfig) -> anyhow::Result<()> {
    init_logging(logging)?;
    describe_metrics();
    tracing::debug!(filter = %filter_directives(logging), format = ?logging.format, "Telemetry initialized");
    Ok(())
}
