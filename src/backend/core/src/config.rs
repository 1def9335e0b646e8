//! Configuration management.

use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{CadenceError, Result};
use crate::jobs::{JobPriority, RetryPolicy};
use crate::telemetry::LoggingConfig;

/// Main engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Default retry policy for jobs that do not carry their own
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Jobs declared in configuration
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Concurrency settings
    #[serde(default)]
    pub concurrency: ConcurrencySettings,

    /// Run the scheduling loop on its own OS thread
    #[serde(default = "default_dedicated_scheduler_thread")]
    pub dedicated_scheduler_thread: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencySettings::default(),
            dedicated_scheduler_thread: default_dedicated_scheduler_thread(),
        }
    }
}

/// Global cap on simultaneously executing runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ConcurrencySettings {
    /// Maximum number of handlers executing at once
    #[serde(default = "default_max_degree_of_parallelism")]
    pub max_degree_of_parallelism: usize,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            max_degree_of_parallelism: default_max_degree_of_parallelism(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueConfig {
    /// In-flight limits per concurrency group; groups not listed are only
    /// bounded by the global cap
    #[serde(default)]
    pub group_limits: HashMap<String, usize>,
}

/// A job declared in configuration, resolved against handlers registered by
/// name on the builder.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Unique job key
    pub name: String,

    /// Name of a registered handler
    pub handler: String,

    /// Schedule entries
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,

    /// Dispatch priority
    #[serde(default)]
    pub priority: JobPriority,

    /// Concurrency group
    pub group: Option<String>,

    /// Retry policy override
    pub retry: Option<RetryPolicy>,

    /// Run once before recurring scheduling begins
    #[serde(default)]
    pub run_at_startup: bool,

    /// Whether a failing startup run aborts engine start
    #[serde(default = "default_startup_fatal")]
    pub startup_fatal: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Cron expression (5 fields, or 6 with `seconds = true`)
    pub cron: String,

    /// Whether the expression carries a seconds field
    #[serde(default)]
    pub seconds: bool,

    /// Parameter passed to the handler
    pub parameter: Option<serde_json::Value>,
}

// Default value functions
fn default_dedicated_scheduler_thread() -> bool { true }
fn default_startup_fatal() -> bool { true }
fn default_max_degree_of_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 4
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("CADENCE").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("CADENCE").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.engine.concurrency.max_degree_of_parallelism == 0 {
            return Err(CadenceError::invalid_configuration(
                "engine.concurrency.max_degree_of_parallelism must be at least 1",
            ));
        }
        if let Some((group, _)) = self.queue.group_limits.iter().find(|(_, limit)| **limit == 0) {
            return Err(CadenceError::invalid_configuration(format!(
                "queue.group_limits.{} must be at least 1",
                group
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for job in &self.jobs {
            if !seen.insert(job.name.as_str()) {
                return Err(CadenceError::invalid_configuration(format!(
                    "job '{}' is declared more than once",
                    job.name
                )));
            }
        }
        Ok(())
    }
}
