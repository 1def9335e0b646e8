//! The job engine.
//!
//! - **Definitions**: handlers, schedule entries and the fluent job builder
//! - **Registry**: definitions, their next due instants and delayed runs
//! - **Worker**: the scheduling loop moving due runs onto the queue
//! - **Queue**: per-group priority queues
//! - **Processor**: dispatch bounded by the global parallelism limit
//! - **Executor**: runs handlers with retry and cancellation, reports outcomes
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                                QueueWorker                                   │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    ┌─────────────┐  │
//! │  │    Job      │    │  JobWorker  │    │  JobQueue   │    │    Job      │  │
//! │  │  Registry   │───▶│ (scheduling │───▶│  Manager    │───▶│  Processor  │  │
//! │  │             │    │    loop)    │    │ (priority)  │    │ (permits)   │  │
//! │  └─────────────┘    └─────────────┘    └─────────────┘    └─────────────┘  │
//! │         ▲                                     ▲                  │         │
//! │  ┌─────────────┐                       ┌─────────────┐    ┌─────────────┐  │
//! │  │  Runtime    │                       │  Instant    │    │    Job      │  │
//! │  │  Registry   │                       │  Registry   │    │  Executor   │  │
//! │  └─────────────┘                       └─────────────┘    └─────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use cadence_core::jobs::{Job, JobContext, JobResult, QueueWorker};
//! use async_trait::async_trait;
//!
//! #[derive(Default)]
//! struct Cleanup;
//!
//! #[async_trait]
//! impl Job for Cleanup {
//!     async fn run(&self, ctx: &JobContext) -> JobResult {
//!         ctx.log_info("cleaning up");
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> cadence_core::Result<()> {
//! let engine = QueueWorker::builder()
//!     .add_job::<Cleanup, _>(|job| {
//!         job.with_cron_expression("*/5 * * * *")
//!             .and()
//!             .with_cron_expression("0 * * * *")
//!             .with_parameter("hourly")
//!     })
//!     .build()?;
//!
//! engine.start().await?;
//! // ...
//! engine.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod builtin;
pub mod cron;
pub mod definition;
pub mod engine;
pub mod executor;
pub mod factory;
pub mod history;
pub mod instant;
pub mod job;
pub mod notification;
pub mod processor;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod run;
pub mod runtime;
pub mod startup;
pub mod worker;

pub use builtin::{builtin_handlers, LogJob, ShellCommandJob, ShellParameter, LOG_HANDLER, SHELL_HANDLER};
pub use cron::RecurrenceRule;
pub use definition::{HandlerId, HandlerRef, JobBuilder, JobDefinition, JobKey, JobOption, StartupMode};
pub use engine::{EngineStats, QueueWorker, QueueWorkerBuilder};
pub use executor::JobExecutor;
pub use factory::{JobFactory, JobFactoryRegistry};
pub use history::{InMemoryJobHistory, JobHistory, NoOpJobHistory};
pub use instant::{InstantJobHandle, InstantJobRegistry};
pub use job::{FnJob, Job, JobContext, JobError, JobPriority, JobResult};
pub use notification::{JobNotificationHandler, NotificationRegistry};
pub use processor::{JobProcessor, ProcessorSnapshot, ProcessorStats};
pub use queue::{JobQueueManager, QueueClosed, QueueLease, QueueStats};
pub use registry::{EntryStatus, EntrySummary, JobRegistry, JobSummary, RegistryClosed};
pub use retry::{BackoffStrategy, DefaultRetryHandler, RetryDecision, RetryHandler, RetryPolicy};
pub use run::{CorrelationId, EntryId, ExecutionOutcome, JobRun, JobRunReport, RunOrigin, DEFAULT_GROUP};
pub use runtime::RuntimeJobRegistry;
pub use startup::StartupJobManager;
pub use worker::JobWorker;
