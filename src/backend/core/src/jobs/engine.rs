//! The queue worker: composes the engine and owns its lifetime.
//!
//! ```text
//!  RuntimeJobRegistry ──┐                 ┌── StartupJobManager (before start)
//!                       ▼                 │
//!                  JobRegistry ──▶ JobWorker ──▶ JobQueueManager ──▶ JobProcessor ──▶ JobExecutor
//!                                                    ▲                                  │
//!  InstantJobRegistry ───────────────────────────────┘            history + notifications ◀┘
//! ```

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::definition::{HandlerRef, JobBuilder, JobDefinition};
use super::executor::JobExecutor;
use super::factory::{JobFactory, JobFactoryRegistry};
use super::history::{JobHistory, NoOpJobHistory};
use super::instant::InstantJobRegistry;
use super::job::{Job, JobContext, JobResult};
use super::notification::{JobNotificationHandler, NotificationRegistry};
use super::processor::{JobProcessor, ProcessorSnapshot};
use super::queue::{JobQueueManager, QueueStats};
use super::registry::JobRegistry;
use super::retry::{DefaultRetryHandler, RetryHandler, RetryPolicy};
use super::run::CorrelationId;
use super::runtime::RuntimeJobRegistry;
use super::startup::StartupJobManager;
use super::worker::JobWorker;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, JobConfig};
use crate::error::{CadenceError, Result};
use crate::telemetry::describe_metrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════════

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub jobs: usize,
    pub delayed: usize,
    pub queue: QueueStats,
    pub processor: ProcessorSnapshot,
}

enum SchedulerHandle {
    Thread(std::thread::JoinHandle<()>),
    Task(JoinHandle<()>),
}

#[derive(Default)]
struct Lifecycle {
    started: bool,
    stopped: bool,
    scheduler: Option<SchedulerHandle>,
    processor: Option<JoinHandle<()>>,
}

/// The job engine.
///
/// `start` runs startup jobs and then launches the scheduling loop and the
/// processor; `stop` cancels everything and waits for in-flight runs.
pub struct QueueWorker {
    registry: Arc<JobRegistry>,
    queue: Arc<JobQueueManager>,
    executor: Arc<JobExecutor>,
    worker: Arc<JobWorker>,
    processor: Arc<JobProcessor>,
    startup: StartupJobManager,
    runtime: RuntimeJobRegistry,
    instant: InstantJobRegistry,
    dedicated_scheduler_thread: bool,
    token: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
}

impl std::fmt::Debug for QueueWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueWorker").finish_non_exhaustive()
    }
}

impl QueueWorker {
    pub fn builder() -> QueueWorkerBuilder {
        QueueWorkerBuilder::new()
    }

    /// Run startup jobs, then begin scheduling and dispatch.
    ///
    /// # Errors
    ///
    /// `EngineAlreadyStarted` on a second call; the startup job error if a
    /// fatal startup job fails.
    pub async fn start(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.started || lifecycle.stopped {
                return Err(CadenceError::already_started());
            }
            lifecycle.started = true;
        }

        info!(
            jobs = self.registry.len(),
            max_degree_of_parallelism = self.processor.max_degree_of_parallelism(),
            dedicated_scheduler_thread = self.dedicated_scheduler_thread,
            "Starting job engine"
        );

        self.startup.run_startup_jobs(&self.token).await?;

        let processor = {
            let processor = Arc::clone(&self.processor);
            let token = self.token.clone();
            tokio::spawn(async move { processor.run(token).await })
        };

        let scheduler = if self.dedicated_scheduler_thread {
            let worker = Arc::clone(&self.worker);
            let token = self.token.clone();
            let handle = std::thread::Builder::new()
                .name("cadence-scheduler".to_string())
                .spawn(move || {
                    match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                        Ok(runtime) => runtime.block_on(worker.run(token)),
                        Err(e) => error!(error = %e, "Failed to build scheduler runtime"),
                    }
                });
            match handle {
                Ok(handle) => SchedulerHandle::Thread(handle),
                Err(e) => {
                    self.token.cancel();
                    let _ = processor.await;
                    return Err(CadenceError::internal("failed to spawn scheduler thread").with_source(e));
                }
            }
        } else {
            let worker = Arc::clone(&self.worker);
            let token = self.token.clone();
            SchedulerHandle::Task(tokio::spawn(async move { worker.run(token).await }))
        };

        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.scheduler = Some(scheduler);
            lifecycle.processor = Some(processor);
        }
        info!("Job engine started");
        Ok(())
    }

    /// Stop scheduling and dispatch, cancel executing runs and wait for them.
    ///
    /// Runs still queued or delayed are finalized as cancelled.
    pub async fn stop(&self) {
        let (scheduler, processor) = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.stopped {
                return;
            }
            lifecycle.stopped = true;
            (lifecycle.scheduler.take(), lifecycle.processor.take())
        };

        info!("Stopping job engine");
        self.token.cancel();
        self.executor.dispose();

        match scheduler {
            Some(SchedulerHandle::Thread(handle)) => {
                if let Ok(Err(_)) = tokio::task::spawn_blocking(move || handle.join()).await {
                    error!("Scheduler thread panicked");
                }
            }
            Some(SchedulerHandle::Task(handle)) => {
                if let Err(e) = handle.await {
                    error!(error = %e, "Scheduler task failed");
                }
            }
            None => {}
        }
        if let Some(handle) = processor {
            if let Err(e) = handle.await {
                error!(error = %e, "Processor task failed");
            }
        }

        let mut leftover = self.queue.close();
        leftover.extend(self.registry.close());
        let cancelled = leftover.len();
        for run in leftover {
            self.executor.finalize_cancelled(run).await;
        }
        info!(cancelled, "Job engine stopped");
    }

    /// Cancel one run: withdrawn if still queued or delayed, signalled if
    /// executing. Returns false if the run is unknown or already finished.
    pub async fn cancel_run(&self, correlation_id: CorrelationId) -> bool {
        if let Some(run) = self.queue.remove(correlation_id) {
            self.executor.finalize_cancelled(run).await;
            return true;
        }
        if let Some(run) = self.registry.cancel_delayed(correlation_id) {
            self.executor.finalize_cancelled(run).await;
            return true;
        }
        self.executor.cancel(correlation_id)
    }

    pub fn runtime_registry(&self) -> &RuntimeJobRegistry {
        &self.runtime
    }

    pub fn instant_jobs(&self) -> &InstantJobRegistry {
        &self.instant
    }

    /// Token cancelled when the engine stops.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_running(&self) -> bool {
        let lifecycle = self.lifecycle.lock();
        lifecycle.processor.is_some() && !lifecycle.stopped
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            jobs: self.registry.len(),
            delayed: self.registry.delayed_len(),
            queue: self.queue.stats(),
            processor: self.processor.stats().snapshot(),
        }
    }
}

impl Drop for QueueWorker {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════════════════════════

/// Composition-time registration surface for [`QueueWorker`].
pub struct QueueWorkerBuilder {
    config: Config,
    definitions: Vec<JobDefinition>,
    handlers: HashMap<String, HandlerRef>,
    factory: Arc<JobFactoryRegistry>,
    custom_factory: Option<Arc<dyn JobFactory>>,
    notifications: Arc<NotificationRegistry>,
    history: Arc<dyn JobHistory>,
    retry_handler: Option<Arc<dyn RetryHandler>>,
    clock: Arc<dyn Clock>,
}

impl Default for QueueWorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueWorkerBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            definitions: Vec::new(),
            handlers: HashMap::new(),
            factory: Arc::new(JobFactoryRegistry::new()),
            custom_factory: None,
            notifications: Arc::new(NotificationRegistry::new()),
            history: Arc::new(NoOpJobHistory),
            retry_handler: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `config` for engine settings, the default retry policy, group
    /// limits and declared jobs.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_degree_of_parallelism(mut self, max: usize) -> Self {
        self.config.engine.concurrency.max_degree_of_parallelism = max;
        self
    }

    pub fn with_dedicated_scheduler_thread(mut self, enabled: bool) -> Self {
        self.config.engine.dedicated_scheduler_thread = enabled;
        self
    }

    /// Cap in-flight runs of one concurrency group.
    pub fn with_group_limit(mut self, group: impl Into<String>, limit: usize) -> Self {
        self.config.queue.group_limits.insert(group.into(), limit);
        self
    }

    /// Policy for runs whose job and handler specify none.
    pub fn with_default_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Register handler type `J` and a job for it.
    pub fn add_job<J, F>(self, configure: F) -> Self
    where
        J: Job + Default,
        F: FnOnce(JobBuilder) -> JobBuilder,
    {
        self.add_job_with(HandlerRef::of::<J>(), configure)
    }

    /// Register `handler` and a job for it.
    pub fn add_job_with<F>(mut self, handler: HandlerRef, configure: F) -> Self
    where
        F: FnOnce(JobBuilder) -> JobBuilder,
    {
        self.factory.register(&handler);
        self.definitions.push(configure(JobBuilder::new(handler)).build());
        self
    }

    /// Register an async closure under `name` and a job for it.
    pub fn add_job_fn<F, Fut, C>(self, name: impl Into<Arc<str>>, f: F, configure: C) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
        C: FnOnce(JobBuilder) -> JobBuilder,
    {
        self.add_job_with(HandlerRef::from_fn(name, f), configure)
    }

    /// Add a prepared definition. Its handler is not registered with the
    /// factory.
    pub fn add_job_definition(mut self, definition: JobDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Make `handler` available to jobs declared in configuration.
    pub fn register_handler(mut self, handler: HandlerRef) -> Self {
        self.factory.register(&handler);
        self.handlers.insert(handler.name().to_string(), handler);
        self
    }

    /// Register one shared instance under `name`.
    pub fn register_singleton(mut self, name: impl Into<String>, job: Arc<dyn Job>) -> Self {
        let name = name.into();
        let shared = Arc::clone(&job);
        let handler = HandlerRef::named(name.clone(), move || Arc::clone(&shared));
        self.factory.register_singleton(&handler, job);
        self.handlers.insert(name, handler);
        self
    }

    /// Replace the built-in factory registry.
    pub fn with_job_factory(mut self, factory: Arc<dyn JobFactory>) -> Self {
        self.custom_factory = Some(factory);
        self
    }

    pub fn add_notification_handler(
        self,
        job_name: impl Into<String>,
        handler: Arc<dyn JobNotificationHandler>,
    ) -> Self {
        self.notifications.register(job_name, handler);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn JobHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn with_retry_handler(mut self, handler: Arc<dyn RetryHandler>) -> Self {
        self.retry_handler = Some(handler);
        self
    }

    /// Substitute the time source, e.g. a `VirtualClock` in tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Compose the engine.
    ///
    /// # Errors
    ///
    /// Invalid configuration, or a configured job naming a handler that was
    /// never registered.
    pub fn build(self) -> Result<QueueWorker> {
        self.config.validate()?;
        describe_metrics();

        let registry = Arc::new(JobRegistry::new(Arc::clone(&self.clock)));
        for definition in self.definitions {
            registry.register(definition)?;
        }
        for job in &self.config.jobs {
            let handler = self.handlers.get(&job.handler).cloned().ok_or_else(|| {
                CadenceError::invalid_job_definition(format!(
                    "job '{}' references unregistered handler '{}'",
                    job.name, job.handler
                ))
            })?;
            registry.register(definition_from_config(job, handler))?;
        }

        let retry_handler = self
            .retry_handler
            .unwrap_or_else(|| Arc::new(DefaultRetryHandler::new(self.config.retry.clone())));
        let factory: Arc<dyn JobFactory> = match self.custom_factory {
            Some(factory) => factory,
            None => Arc::clone(&self.factory) as Arc<dyn JobFactory>,
        };

        let queue = Arc::new(JobQueueManager::new(self.config.queue.group_limits.clone()));
        let executor = Arc::new(JobExecutor::new(
            factory,
            retry_handler,
            self.history,
            self.notifications,
            Arc::clone(&self.clock),
        ));
        let worker = Arc::new(JobWorker::new(
            Arc::clone(&registry),
            Arc::clone(&queue),
            Arc::clone(&executor),
            Arc::clone(&self.clock),
        ));
        let processor = Arc::new(JobProcessor::new(
            Arc::clone(&queue),
            Arc::clone(&executor),
            self.config.engine.concurrency.max_degree_of_parallelism,
        ));

        Ok(QueueWorker {
            startup: StartupJobManager::new(
                Arc::clone(&registry),
                Arc::clone(&executor),
                Arc::clone(&self.clock),
            ),
            runtime: RuntimeJobRegistry::new(Arc::clone(&registry), self.factory),
            instant: InstantJobRegistry::new(
                Arc::clone(&queue),
                Arc::clone(&registry),
                Arc::clone(&executor),
                self.clock,
            ),
            registry,
            queue,
            executor,
            worker,
            processor,
            dedicated_scheduler_thread: self.config.engine.dedicated_scheduler_thread,
            token: CancellationToken::new(),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }
}

fn definition_from_config(job: &JobConfig, handler: HandlerRef) -> JobDefinition {
    let mut builder = JobBuilder::new(handler)
        .with_name(job.name.clone())
        .with_priority(job.priority);

    for schedule in &job.schedules {
        builder = if schedule.seconds {
            builder.with_seconds_cron_expression(schedule.cron.clone())
        } else {
            builder.with_cron_expression(schedule.cron.clone())
        };
        if let Some(parameter) = &schedule.parameter {
            builder = builder.with_parameter(parameter.clone());
        }
    }
    if let Some(group) = &job.group {
        builder = builder.with_concurrency_group(group.clone());
    }
    if let Some(retry) = &job.retry {
        builder = builder.with_retry_policy(retry.clone());
    }
    if job.run_at_startup {
        builder = if job.startup_fatal {
            builder.run_at_startup()
        } else {
            builder.run_at_startup_non_fatal()
        };
    }
    builder.build()
}
