pub mod next;
pub mod run;
pub mod validate;

use anyhow::{Context, Result};
use cadence_core::config::Config;
use cadence_core::jobs::{builtin_handlers, EntryStatus, JobSummary, QueueWorker};
use std::path::{Path, PathBuf};

/// Default config location (`~/.cadence/config.toml`).
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".cadence").join("config.toml"))
}

/// Resolve `--config`, falling back to the default location.
pub fn resolve_config_path(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path),
        None => default_config_path(),
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {}", path.display());
    }
    let path_str = path
        .to_str()
        .with_context(|| format!("Config path is not valid UTF-8: {}", path.display()))?;
    Config::from_file(path_str).with_context(|| format!("Failed to load {}", path.display()))
}

/// Build an engine from config with the built-in handlers registered.
pub fn build_engine(config: Config) -> Result<QueueWorker> {
    builtin_handlers()
        .into_iter()
        .fold(QueueWorker::builder().with_config(config), |builder, handler| {
            builder.register_handler(handler)
        })
        .build()
        .context("Failed to build engine")
}

/// `job: expression (reason)` for every entry the registry disabled.
pub fn disabled_entries(jobs: &[JobSummary]) -> Vec<String> {
    jobs.iter()
        .flat_map(|job| {
            job.entries.iter().filter_map(move |entry| match &entry.status {
                EntryStatus::Disabled { reason } => {
                    Some(format!("{}: '{}' ({})", job.key, entry.expression, reason))
                }
                _ => None,
            })
        })
        .collect()
}
