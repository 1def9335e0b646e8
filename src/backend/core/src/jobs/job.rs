//! Job definitions and traits.
//!
//! This module provides the core abstractions for writing job handlers:
//!
//! - **Job trait**: The interface every handler implements
//! - **JobContext**: Per-attempt context passed to a handler
//! - **JobError**: Handler failure, retryable or permanent
//! - **JobPriority**: Dispatch priority

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use super::retry::RetryPolicy;
use super::run::{CorrelationId, JobRun, RunOrigin};
use crate::error::CadenceError;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Priority
// ═══════════════════════════════════════════════════════════════════════════════

/// Priority level for runs on the dispatch queue.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    /// Processed when nothing else is waiting
    Low = 0,
    /// Default for scheduled jobs
    #[default]
    Normal = 1,
    /// Processed before normal jobs
    High = 2,
    /// Default for instant jobs
    Critical = 3,
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for job execution failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    /// Error message
    pub message: String,
    /// Whether this error is retryable
    pub retryable: bool,
    /// Optional error code
    pub code: Option<String>,
    /// Additional context
    pub context: Option<serde_json::Value>,
}

impl JobError {
    /// Create a new retryable error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            code: None,
            context: None,
        }
    }

    /// Create a new non-retryable (fatal) error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            code: None,
            context: None,
        }
    }

    /// Add an error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Add context.
    pub fn with_context(mut self, context: impl Serialize) -> Self {
        self.context = serde_json::to_value(context).ok();
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for JobError {}

impl From<CadenceError> for JobError {
    fn from(error: CadenceError) -> Self {
        Self {
            message: error.user_message().to_string(),
            retryable: !error.code().is_fatal(),
            code: Some(error.code().to_string()),
            context: None,
        }
    }
}

impl From<anyhow::Error> for JobError {
    fn from(error: anyhow::Error) -> Self {
        Self::retryable(format!("{:#}", error))
    }
}

impl From<std::io::Error> for JobError {
    fn from(error: std::io::Error) -> Self {
        Self::retryable(error.to_string()).with_code(format!("{:?}", error.kind()))
    }
}

/// Result type for job execution.
pub type JobResult = std::result::Result<(), JobError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Context passed to a handler for one execution attempt.
#[derive(Debug, Clone)]
pub struct JobContext {
    correlation_id: CorrelationId,
    job_name: String,
    job_key: Option<String>,
    parameter: Option<serde_json::Value>,
    attempt: u32,
    due_at: DateTime<Utc>,
    origin: RunOrigin,
    cancellation: CancellationToken,
}

impl JobContext {
    /// Build the context for the current attempt of `run`.
    pub fn new(run: &JobRun, cancellation: CancellationToken) -> Self {
        Self {
            correlation_id: run.correlation_id,
            job_name: run.handler.name().to_string(),
            job_key: run.job_key.as_ref().map(|k| k.to_string()),
            parameter: run.parameter.clone(),
            attempt: run.attempt,
            due_at: run.due_at,
            origin: run.origin,
            cancellation,
        }
    }

    /// Correlation id shared by every attempt of this run.
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Handler name.
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Key of the registered definition, if the run came from one.
    pub fn job_key(&self) -> Option<&str> {
        self.job_key.as_deref()
    }

    /// Raw parameter value.
    pub fn parameter_value(&self) -> Option<&serde_json::Value> {
        self.parameter.as_ref()
    }

    /// Parameter deserialized into `T`; `None` if absent or of another shape.
    pub fn parameter<T: DeserializeOwned>(&self) -> Option<T> {
        self.parameter
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Current attempt number (1-indexed).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Instant this attempt was due.
    pub fn due_at(&self) -> DateTime<Utc> {
        self.due_at
    }

    /// How the run was created.
    pub fn origin(&self) -> RunOrigin {
        self.origin
    }

    /// Token cancelled on engine shutdown or explicit run cancellation.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Drive `future` to completion unless cancellation is requested first.
    pub async fn cancellable<F, T>(&self, future: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => None,
            result = future => Some(result),
        }
    }

    /// Log a message associated with this run.
    pub fn log_info(&self, message: &str) {
        tracing::info!(
            job = %self.job_name,
            correlation_id = %self.correlation_id,
            attempt = self.attempt,
            message
        );
    }

    /// Log a warning associated with this run.
    pub fn log_warn(&self, message: &str) {
        tracing::warn!(
            job = %self.job_name,
            correlation_id = %self.correlation_id,
            attempt = self.attempt,
            message
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// The trait every job handler implements.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Execute one attempt.
    ///
    /// # Errors
    ///
    /// Return `JobError::retryable()` for transient failures that should go
    /// through the retry policy, and `JobError::fatal()` for permanent ones.
    async fn run(&self, ctx: &JobContext) -> JobResult;

    /// Retry policy for this handler type, used when the definition does not
    /// carry one.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }
}

/// Adapter turning an async closure into a [`Job`].
pub struct FnJob<F> {
    f: F,
}

impl<F> FnJob<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    async fn run(&self, ctx: &JobContext) -> JobResult {
        (self.f)(ctx.clone()).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
