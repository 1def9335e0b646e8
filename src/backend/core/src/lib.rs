#![allow(clippy::result_large_err)]
//! # Cadence Core
//!
//! In-process cron job scheduling and execution.
//!
//! ## Architecture
//!
//! - **Jobs**: registry, scheduling loop, priority queue, bounded processor and executor
//! - **Clock**: injectable time source, with a virtual clock for deterministic tests
//! - **Config**: engine settings and declared jobs from files and environment
//! - **Telemetry**: structured logging and engine metrics

pub mod clock;
pub mod config;
pub mod error;
pub mod jobs;
pub mod telemetry;

pub use error::{CadenceError, ErrorCode, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, SystemClock, VirtualClock};
    pub use crate::config::Config;
    pub use crate::error::{CadenceError, ErrorCode, Result};
    pub use crate::jobs::{
        CorrelationId, ExecutionOutcome, HandlerRef, InstantJobHandle, Job, JobBuilder,
        JobContext, JobDefinition, JobError, JobPriority, JobResult, JobRunReport, QueueWorker,
        QueueWorkerBuilder, RetryPolicy, RuntimeJobRegistry,
    };
}
