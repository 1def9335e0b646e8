//! Startup jobs: run to completion, in registration order, before recurring
//! scheduling begins.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::definition::StartupMode;
use super::executor::JobExecutor;
use super::registry::JobRegistry;
use super::run::{ExecutionOutcome, JobRun, RunOrigin};
use crate::clock::Clock;
use crate::error::{CadenceError, Result};

pub struct StartupJobManager {
    registry: Arc<JobRegistry>,
    executor: Arc<JobExecutor>,
    clock: Arc<dyn Clock>,
}

impl StartupJobManager {
    pub fn new(registry: Arc<JobRegistry>, executor: Arc<JobExecutor>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            executor,
            clock,
        }
    }

    /// Run every startup job, each with its retry policy.
    ///
    /// # Errors
    ///
    /// `StartupJobFailed` when a fatal startup job fails permanently;
    /// `EngineShutdown` when `token` is cancelled first.
    pub async fn run_startup_jobs(&self, token: &CancellationToken) -> Result<()> {
        let jobs = self.registry.startup_jobs();
        if jobs.is_empty() {
            return Ok(());
        }
        info!(count = jobs.len(), "Running startup jobs");

        for definition in jobs {
            if token.is_cancelled() {
                return Err(CadenceError::shutdown());
            }

            let now = self.clock.now();
            let run = JobRun::new(
                definition.handler.clone(),
                definition.default_parameter(),
                definition.priority,
                now,
                now,
                RunOrigin::Startup,
            )
            .with_job_key(definition.key.clone())
            .with_group(definition.group.clone())
            .with_retry_policy(definition.retry_policy.clone());

            let report = self.executor.execute(run, token.child_token()).await;
            match report.outcome {
                ExecutionOutcome::Succeeded => {
                    info!(job = %definition.key, attempts = report.attempts, "Startup job completed");
                }
                ExecutionOutcome::Cancelled => return Err(CadenceError::shutdown()),
                ExecutionOutcome::Failed { error } => match definition.startup {
                    Some(StartupMode::NonFatal) => {
                        warn!(job = %definition.key, error = %error, "Non-fatal startup job failed");
                    }
                    _ => {
                        error!(job = %definition.key, error = %error, "Startup job failed, aborting start");
                        return Err(CadenceError::startup_failed(&definition.key, error.to_string()));
                    }
                },
            }
        }
        Ok(())
    }
}
