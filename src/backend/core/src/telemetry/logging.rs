//! Log output for the engine and its host.
//!
//! The configured level applies to the cadence crates; everything else
//! stays at `warn` unless a target override says otherwise. Every
//! execution runs inside a `job` span carrying the job name, correlation
//! id and origin, so handler logs can be tied back to a run.

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::Span;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::jobs::JobRun;

/// Crates whose events follow `LoggingConfig::level`.
const ENGINE_TARGETS: &[&str] = &["cadence_core", "cadence"];

/// Level for every target not named in the filter.
const DEPENDENCY_LEVEL: &str = "warn";

/// Environment variable consulted before `RUST_LOG` for the default level.
pub const LOG_ENV: &str = "CADENCE_LOG";

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Level for the cadence crates (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Extra `target = level` directives, e.g. a single job handler module
    #[serde(default)]
    pub targets: BTreeMap<String, String>,

    /// Emit an event when a job span closes, with its busy/idle time
    #[serde(default)]
    pub job_timings: bool,

    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            targets: BTreeMap::new(),
            job_timings: false,
            include_location: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line, span fields flattened in
    Json,
    Pretty,
    #[default]
    Compact,
}

fn default_level() -> String {
    std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string())
}

/// Render the filter directives for `config`.
///
/// A `level` that already holds directives (contains `=` or `,`) is used
/// as-is instead of being scoped to the engine targets.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = if config.level.contains('=') || config.level.contains(',') {
        vec![config.level.clone()]
    } else {
        let mut scoped = vec![DEPENDENCY_LEVEL.to_string()];
        scoped.extend(ENGINE_TARGETS.iter().map(|target| format!("{}={}", target, config.level)));
        scoped
    };
    directives.extend(config.targets.iter().map(|(target, level)| format!("{}={}", target, level)));
    directives.join(",")
}

pub fn build_filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    Ok(EnvFilter::try_new(filter_directives(config))?)
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails on a malformed directive or when a subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = build_filter(config)?;
    let span_events = if config.job_timings { FmtSpan::CLOSE } else { FmtSpan::NONE };

    let base = tracing_subscriber::fmt::layer()
        .with_span_events(span_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_target(true);

    let layer = match config.format {
        LogFormat::Json => base.json().flatten_event(true).with_current_span(true).boxed(),
        LogFormat::Pretty => base.pretty().boxed(),
        LogFormat::Compact => base.compact().boxed(),
    };

    tracing_subscriber::registry().with(filter).with(layer).try_init()?;
    Ok(())
}

/// Span wrapping one run from first attempt to its final report.
pub fn job_span(run: &JobRun) -> Span {
    let key = run.job_key.as_ref().map_or_else(|| "-".to_string(), |key| key.to_string());
    tracing::info_span!(
        "job",
        job = %run.job_name(),
        key = %key,
        correlation_id = %run.correlation_id,
        origin = %run.origin,
        group = %run.group,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_level(level: &str) -> LoggingConfig {
        LoggingConfig {
            level: level.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_level_is_scoped_to_engine_crates() {
        assert_eq!(
            filter_directives(&at_level("debug")),
            "warn,cadence_core=debug,cadence=debug"
        );
    }

    #[test]
    fn test_raw_directives_pass_through() {
        assert_eq!(filter_directives(&at_level("info,hyper=trace")), "info,hyper=trace");
    }

    #[test]
    fn test_target_overrides_are_appended() {
        let mut config = at_level("info");
        config
            .targets
            .insert("cadence_core::jobs::scheduler".to_string(), "trace".to_string());

        let directives = filter_directives(&config);
        assert!(directives.ends_with(",cadence_core::jobs::scheduler=trace"));
        assert!(build_filter(&config).is_ok());
    }

    #[test]
    fn test_bad_directive_rejected() {
        let mut config = at_level("info");
        config.targets.insert("cadence_core".to_string(), "verbose".to_string());
        assert!(build_filter(&config).is_err());
    }

    #[test]
    fn test_config_deserialize() {
        let config: LoggingConfig = serde_json::from_str(
            r#"{
                "level": "debug",
                "format": "json",
                "job_timings": true,
                "targets": { "cadence_core::jobs::executor": "trace" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.format, LogFormat::Json);
        assert!(config.job_timings);
        assert_eq!(config.targets.len(), 1);
    }
}
