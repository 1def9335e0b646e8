//! Run the engine in the foreground until interrupted.

use anyhow::{Context, Result};
use cadence_core::telemetry::init_telemetry;
use std::path::PathBuf;

use crate::output;

pub async fn execute(config: Option<PathBuf>, log_level: Option<String>) -> Result<()> {
    let path = super::resolve_config_path(config)?;
    let mut config = super::load_config(&path)?;
    if let Some(level) = log_level {
        config.logging.level = level;
    }

    init_telemetry(&config.logging).context("Failed to initialize telemetry")?;

    let parallelism = config.engine.concurrency.max_degree_of_parallelism;
    let engine = super::build_engine(config)?;
    let jobs = engine.runtime_registry().jobs();
    for entry in super::disabled_entries(&jobs) {
        output::print_warning(&format!("Skipping {}", entry));
    }

    engine.start().await.context("Engine failed to start")?;

    output::print_success("Engine started");
    output::print_detail("Config", &path.display().to_string());
    output::print_detail("Jobs", &jobs.len().to_string());
    output::print_detail("Parallelism", &parallelism.to_string());

    shutdown_signal().await;

    output::print_info("Shutting down...");
    engine.stop().await;
    output::print_success("Engine stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
