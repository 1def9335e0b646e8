//! Job executor: runs one job run through all of its attempts and reports
//! the terminal outcome.

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn, Instrument};

use super::definition::{HandlerId, HandlerRef};
use super::factory::JobFactory;
use super::history::JobHistory;
use super::job::{Job, JobContext, JobError};
use super::notification::NotificationRegistry;
use super::retry::{RetryDecision, RetryHandler};
use super::run::{CorrelationId, ExecutionOutcome, JobRun, JobRunReport};
use crate::clock::Clock;
use crate::telemetry::{job_span, JobMetrics};

/// Executes runs and publishes their terminal outcomes.
pub struct JobExecutor {
    factory: Arc<dyn JobFactory>,
    retry_handler: Arc<dyn RetryHandler>,
    history: Arc<dyn JobHistory>,
    notifications: Arc<NotificationRegistry>,
    clock: Arc<dyn Clock>,
    disposed: AtomicBool,
    unregistered_warned: DashSet<HandlerId>,
    running: DashMap<CorrelationId, CancellationToken>,
    waiters: DashMap<CorrelationId, oneshot::Sender<JobRunReport>>,
}

impl JobExecutor {
    pub fn new(
        factory: Arc<dyn JobFactory>,
        retry_handler: Arc<dyn RetryHandler>,
        history: Arc<dyn JobHistory>,
        notifications: Arc<NotificationRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            factory,
            retry_handler,
            history,
            notifications,
            clock,
            disposed: AtomicBool::new(false),
            unregistered_warned: DashSet::new(),
            running: DashMap::new(),
            waiters: DashMap::new(),
        }
    }

    /// Run `run` until it succeeds, exhausts its retries, or is cancelled.
    ///
    /// Retry backoff happens here, so the caller's concurrency slot stays
    /// occupied for the whole lifecycle of the run.
    pub async fn execute(&self, run: JobRun, token: CancellationToken) -> JobRunReport {
        let span = job_span(&run);
        self.run_attempts(run, token).instrument(span).await
    }

    async fn run_attempts(&self, mut run: JobRun, token: CancellationToken) -> JobRunReport {
        if self.is_disposed() {
            trace!(
                job = %run.job_name(),
                correlation_id = %run.correlation_id,
                "Skip as executor is disposed"
            );
            return self.finalize(&run, ExecutionOutcome::Cancelled, 0, None).await;
        }

        let job = self.resolve(&run.handler);
        if run.retry_policy.is_none() {
            run.retry_policy = job.retry_policy();
        }

        self.running.insert(run.correlation_id, token.clone());
        let mut attempts = 0;
        let mut started_at: Option<DateTime<Utc>> = None;

        let outcome = loop {
            if token.is_cancelled() {
                break ExecutionOutcome::Cancelled;
            }

            let now = self.clock.now();
            run.mark_started(now);
            started_at.get_or_insert(now);
            attempts += 1;

            debug!(
                job = %run.job_name(),
                correlation_id = %run.correlation_id,
                attempt = run.attempt,
                "Running job"
            );

            let ctx = JobContext::new(&run, token.clone());
            let result = AssertUnwindSafe(job.run(&ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(JobError::retryable(panic_message(panic.as_ref()))));

            let error = match result {
                Ok(()) => break ExecutionOutcome::Succeeded,
                Err(_) if token.is_cancelled() => break ExecutionOutcome::Cancelled,
                Err(error) => error,
            };

            match self.retry_handler.on_failure(&run, &error, self.clock.now()) {
                RetryDecision::RetryAt(retry_at) => {
                    warn!(
                        job = %run.job_name(),
                        correlation_id = %run.correlation_id,
                        attempt = run.attempt,
                        retry_at = %retry_at,
                        error = %error,
                        "Job failed, retry scheduled"
                    );
                    JobMetrics::retry_scheduled(run.job_name());

                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break ExecutionOutcome::Cancelled,
                        _ = self.clock.sleep_until(retry_at) => {}
                    }
                    run = run.next_attempt(retry_at);
                }
                RetryDecision::GiveUp => {
                    error!(
                        job = %run.job_name(),
                        correlation_id = %run.correlation_id,
                        attempts,
                        error = %error,
                        "Job failed permanently"
                    );
                    break ExecutionOutcome::Failed { error };
                }
            }
        };

        self.running.remove(&run.correlation_id);
        self.finalize(&run, outcome, attempts, started_at).await
    }

    /// Finalize a run that never reached a handler.
    pub async fn finalize_cancelled(&self, run: JobRun) -> JobRunReport {
        debug!(
            job = %run.job_name(),
            correlation_id = %run.correlation_id,
            "Run cancelled before execution"
        );
        self.finalize(&run, ExecutionOutcome::Cancelled, 0, None).await
    }

    async fn finalize(
        &self,
        run: &JobRun,
        outcome: ExecutionOutcome,
        attempts: u32,
        started_at: Option<DateTime<Utc>>,
    ) -> JobRunReport {
        let report = JobRunReport::new(run, outcome, attempts, started_at, self.clock.now());

        let duration = report
            .duration()
            .and_then(|d| d.to_std().ok())
            .unwrap_or_default();
        JobMetrics::run_finished(&report.job_name, report.outcome.label(), duration);

        match AssertUnwindSafe(self.history.record(&report)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                job = %report.job_name,
                correlation_id = %report.correlation_id,
                error = %e,
                "Failed to record job run history"
            ),
            Err(panic) => error!(
                job = %report.job_name,
                correlation_id = %report.correlation_id,
                error = %panic_message(panic.as_ref()),
                "Job history recorder panicked"
            ),
        }
        self.notifications.notify(&report).await;

        if let Some((_, waiter)) = self.waiters.remove(&report.correlation_id) {
            let _ = waiter.send(report.clone());
        }
        report
    }

    fn resolve(&self, handler: &HandlerRef) -> Arc<dyn Job> {
        if let Some(job) = self.factory.create(handler) {
            return job;
        }
        if self.unregistered_warned.insert(handler.id()) {
            warn!(
                handler = %handler.name(),
                "Handler is not registered with the job factory; constructing an instance per run"
            );
        }
        handler.construct()
    }

    /// Receive the report of `correlation_id` once it reaches a terminal
    /// outcome. Register before the run can finish.
    pub fn watch(&self, correlation_id: CorrelationId) -> oneshot::Receiver<JobRunReport> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(correlation_id, tx);
        rx
    }

    /// Cancel an executing run. Returns false if it is not executing.
    pub fn cancel(&self, correlation_id: CorrelationId) -> bool {
        match self.running.get(&correlation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, correlation_id: CorrelationId) -> bool {
        self.running.contains_key(&correlation_id)
    }

    /// Runs currently inside `execute`.
    pub fn executing(&self) -> usize {
        self.running.len()
    }

    /// Refuse new work from now on.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("job panicked: {}", detail)
}
