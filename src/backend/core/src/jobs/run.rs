//! Runs: concrete executions materialized from definitions, and their outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::definition::{HandlerRef, JobKey};
use super::job::{JobError, JobPriority};
use super::retry::RetryPolicy;

/// Group runs land in when their definition names none.
pub const DEFAULT_GROUP: &str = "default";

// ═══════════════════════════════════════════════════════════════════════════════
// Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Identifier shared by every attempt of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier of one schedule entry inside the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry-{}", self.0)
    }
}

/// How a run came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RunOrigin {
    /// Materialized from a schedule entry occurrence
    Scheduled { entry: EntryId },
    /// Requested for immediate execution
    Instant,
    /// Requested for a future instant
    Delayed,
    /// Executed before recurring scheduling began
    Startup,
}

impl fmt::Display for RunOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled { entry } => write!(f, "scheduled({})", entry),
            Self::Instant => write!(f, "instant"),
            Self::Delayed => write!(f, "delayed"),
            Self::Startup => write!(f, "startup"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Run
// ═══════════════════════════════════════════════════════════════════════════════

/// One concrete execution request.
///
/// Retries produce a new `JobRun` value with the same correlation id and an
/// incremented attempt number.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub correlation_id: CorrelationId,
    /// Key of the definition this run came from; `None` for ad-hoc runs
    pub job_key: Option<JobKey>,
    pub handler: HandlerRef,
    pub parameter: Option<serde_json::Value>,
    pub priority: JobPriority,
    pub group: String,
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Attempt number (1-indexed)
    pub attempt: u32,
    pub origin: RunOrigin,
    /// Per-run policy; `None` defers to the handler type, then the engine default
    pub retry_policy: Option<RetryPolicy>,
    first_attempt_at: Option<DateTime<Utc>>,
}

impl JobRun {
    /// A run for immediate execution of an arbitrary handler.
    pub fn instant(
        handler: HandlerRef,
        parameter: Option<serde_json::Value>,
        priority: JobPriority,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(handler, parameter, priority, now, now, RunOrigin::Instant)
    }

    pub(crate) fn new(
        handler: HandlerRef,
        parameter: Option<serde_json::Value>,
        priority: JobPriority,
        due_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
        origin: RunOrigin,
    ) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            job_key: None,
            handler,
            parameter,
            priority,
            group: DEFAULT_GROUP.to_string(),
            due_at,
            created_at,
            attempt: 1,
            origin,
            retry_policy: None,
            first_attempt_at: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_job_key(mut self, key: JobKey) -> Self {
        self.job_key = Some(key);
        self
    }

    pub fn with_retry_policy(mut self, policy: Option<RetryPolicy>) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Display name used in logs and reports.
    pub fn job_name(&self) -> &str {
        self.handler.name()
    }

    /// When the first attempt started, or the due instant if none has yet.
    pub fn first_attempt_at(&self) -> DateTime<Utc> {
        self.first_attempt_at.unwrap_or(self.due_at)
    }

    pub(crate) fn mark_started(&mut self, at: DateTime<Utc>) {
        if self.first_attempt_at.is_none() {
            self.first_attempt_at = Some(at);
        }
    }

    /// The follow-up attempt, due at `due_at`.
    pub fn next_attempt(&self, due_at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.attempt += 1;
        next.due_at = due_at;
        next
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Outcomes
// ═══════════════════════════════════════════════════════════════════════════════

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ExecutionOutcome {
    Succeeded,
    Failed { error: JobError },
    Cancelled,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { error } => write!(f, "failed: {}", error),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// What the history recorder and notification handlers see once a run ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRunReport {
    pub correlation_id: CorrelationId,
    pub job_name: String,
    pub job_key: Option<String>,
    pub parameter: Option<serde_json::Value>,
    pub origin: RunOrigin,
    pub outcome: ExecutionOutcome,
    /// Attempts that actually invoked the handler
    pub attempts: u32,
    pub due_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

impl JobRunReport {
    pub(crate) fn new(
        run: &JobRun,
        outcome: ExecutionOutcome,
        attempts: u32,
        started_at: Option<DateTime<Utc>>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id: run.correlation_id,
            job_name: run.job_name().to_string(),
            job_key: run.job_key.as_ref().map(|k| k.to_string()),
            parameter: run.parameter.clone(),
            origin: run.origin,
            outcome,
            attempts,
            due_at: run.due_at,
            started_at,
            finished_at,
        }
    }

    /// Time from first attempt to terminal outcome.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.started_at.map(|start| self.finished_at - start)
    }
}
