//! Ad-hoc execution requests that bypass recurrence rules.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::definition::HandlerRef;
use super::executor::JobExecutor;
use super::job::JobPriority;
use super::queue::{JobQueueManager, QueueClosed};
use super::registry::{JobRegistry, RegistryClosed};
use super::run::{CorrelationId, JobRun, JobRunReport, RunOrigin};
use crate::clock::{deadline_after, Clock};
use crate::error::{CadenceError, Result};

/// Awaitable handle to an ad-hoc run.
#[derive(Debug)]
pub struct InstantJobHandle {
    correlation_id: CorrelationId,
    receiver: oneshot::Receiver<JobRunReport>,
}

impl InstantJobHandle {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Wait for the run's terminal report.
    ///
    /// # Errors
    ///
    /// `EngineShutdown` if the engine went away without reporting.
    pub async fn wait(self) -> Result<JobRunReport> {
        self.receiver.await.map_err(|_| CadenceError::shutdown())
    }
}

pub struct InstantJobRegistry {
    queue: Arc<JobQueueManager>,
    registry: Arc<JobRegistry>,
    executor: Arc<JobExecutor>,
    clock: Arc<dyn Clock>,
}

impl InstantJobRegistry {
    pub fn new(
        queue: Arc<JobQueueManager>,
        registry: Arc<JobRegistry>,
        executor: Arc<JobExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            registry,
            executor,
            clock,
        }
    }

    /// Enqueue `handler` for immediate execution at the highest priority.
    pub async fn run_instant_job(
        &self,
        handler: HandlerRef,
        parameter: Option<serde_json::Value>,
    ) -> InstantJobHandle {
        self.run_instant_job_with_priority(handler, parameter, JobPriority::Critical)
            .await
    }

    pub async fn run_instant_job_with_priority(
        &self,
        handler: HandlerRef,
        parameter: Option<serde_json::Value>,
        priority: JobPriority,
    ) -> InstantJobHandle {
        let run = JobRun::instant(handler, parameter, priority, self.clock.now());
        let handle = self.handle_for(&run);

        if let Err(QueueClosed(run)) = self.queue.push(run) {
            warn!(
                job = %run.job_name(),
                correlation_id = %run.correlation_id,
                "Engine is not accepting runs, instant run cancelled"
            );
            self.executor.finalize_cancelled(run).await;
        }
        handle
    }

    /// Run `handler` once at `at`. Instants in the past run on the next
    /// scheduling pass.
    pub async fn run_scheduled_job(
        &self,
        handler: HandlerRef,
        parameter: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) -> InstantJobHandle {
        let run = JobRun::new(
            handler,
            parameter,
            JobPriority::Normal,
            at,
            self.clock.now(),
            RunOrigin::Delayed,
        );
        let handle = self.handle_for(&run);

        debug!(job = %run.job_name(), due_at = %at, "Delayed run requested");
        if let Err(RegistryClosed(run)) = self.registry.schedule_delayed(run) {
            warn!(
                job = %run.job_name(),
                correlation_id = %run.correlation_id,
                "Engine is not accepting runs, delayed run cancelled"
            );
            self.executor.finalize_cancelled(run).await;
        }
        handle
    }

    /// Run `handler` once after `delay`.
    pub async fn run_delayed_job(
        &self,
        handler: HandlerRef,
        parameter: Option<serde_json::Value>,
        delay: Duration,
    ) -> InstantJobHandle {
        let at = deadline_after(self.clock.now(), delay);
        self.run_scheduled_job(handler, parameter, at).await
    }

    fn handle_for(&self, run: &JobRun) -> InstantJobHandle {
        InstantJobHandle {
            correlation_id: run.correlation_id,
            receiver: self.executor.watch(run.correlation_id),
        }
    }
}
