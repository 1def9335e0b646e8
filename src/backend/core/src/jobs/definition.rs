//! Job definitions and the fluent builder that produces them.
//!
//! ```rust,ignore
//! let definition = JobBuilder::new(HandlerRef::of::<ReportJob>())
//!     .with_cron_expression("* * * * *")
//!     .with_parameter("foo")
//!     .and()
//!     .with_cron_expression("0 * * * *")
//!     .with_parameter("bar")
//!     .build();
//! ```

use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::job::{FnJob, Job, JobContext, JobPriority, JobResult};
use super::retry::RetryPolicy;
use super::run::DEFAULT_GROUP;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Key
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique name of a registered job definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey(String);

impl JobKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for JobKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handler Reference
// ═══════════════════════════════════════════════════════════════════════════════

type Constructor = dyn Fn() -> Arc<dyn Job> + Send + Sync;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a handler, independent of its display name.
///
/// Type references share the identity of their type. Every closure, instance
/// or named constructor reference gets its own, kept across clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerId {
    Type(TypeId),
    Instance(u64),
}

impl HandlerId {
    fn fresh() -> Self {
        Self::Instance(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifies a handler and knows how to construct it when no factory
/// provides one.
#[derive(Clone)]
pub struct HandlerRef {
    id: HandlerId,
    name: Arc<str>,
    constructor: Arc<Constructor>,
}

impl HandlerRef {
    /// Reference a handler type, named by its type path.
    pub fn of<J: Job + Default>() -> Self {
        Self {
            id: HandlerId::Type(TypeId::of::<J>()),
            name: std::any::type_name::<J>().into(),
            constructor: Arc::new(|| Arc::new(J::default()) as Arc<dyn Job>),
        }
    }

    /// Reference a handler under an explicit name.
    pub fn named<F>(name: impl Into<Arc<str>>, constructor: F) -> Self
    where
        F: Fn() -> Arc<dyn Job> + Send + Sync + 'static,
    {
        Self {
            id: HandlerId::fresh(),
            name: name.into(),
            constructor: Arc::new(constructor),
        }
    }

    /// Reference a shared handler instance.
    pub fn instance<J: Job>(name: impl Into<Arc<str>>, job: Arc<J>) -> Self {
        Self::named(name, move || job.clone() as Arc<dyn Job>)
    }

    /// Wrap an async closure as a handler.
    pub fn from_fn<F, Fut>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let job: Arc<dyn Job> = Arc::new(FnJob::new(f));
        Self::named(name, move || job.clone())
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Construct the handler directly, bypassing any factory.
    pub fn construct(&self) -> Arc<dyn Job> {
        (self.constructor)()
    }
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerRef").field(&self.name).finish()
    }
}

impl PartialEq for HandlerRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for HandlerRef {}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Options
// ═══════════════════════════════════════════════════════════════════════════════

/// One schedule entry as written by the caller, before parsing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOption {
    pub cron_expression: Option<String>,
    pub second_precision: bool,
    pub parameter: Option<serde_json::Value>,
}

/// How a startup run's failure affects engine start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupMode {
    /// Failure aborts start
    Fatal,
    /// Failure is logged and start continues
    NonFatal,
}

/// Static description of a job.
#[derive(Debug, Clone)]
pub struct JobDefinition {
    pub key: JobKey,
    pub handler: HandlerRef,
    pub options: Vec<JobOption>,
    pub priority: JobPriority,
    pub group: String,
    pub retry_policy: Option<RetryPolicy>,
    pub startup: Option<StartupMode>,
}

impl JobDefinition {
    pub fn builder(handler: HandlerRef) -> JobBuilder {
        JobBuilder::new(handler)
    }

    /// Options that carry a cron expression.
    pub fn scheduled_options(&self) -> impl Iterator<Item = &JobOption> {
        self.options.iter().filter(|o| o.cron_expression.is_some())
    }

    /// Parameter used for startup runs: the first option's.
    pub fn default_parameter(&self) -> Option<serde_json::Value> {
        self.options.first().and_then(|o| o.parameter.clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════════════════════════

/// Fluent builder for [`JobDefinition`].
///
/// Each `with_cron_expression` call opens a new schedule entry;
/// `with_parameter` attaches to the most recent one.
#[derive(Debug, Clone)]
pub struct JobBuilder {
    handler: HandlerRef,
    name: Option<String>,
    options: Vec<JobOption>,
    priority: JobPriority,
    group: Option<String>,
    retry_policy: Option<RetryPolicy>,
    startup: Option<StartupMode>,
}

impl JobBuilder {
    pub fn new(handler: HandlerRef) -> Self {
        Self {
            handler,
            name: None,
            options: Vec::new(),
            priority: JobPriority::default(),
            group: None,
            retry_policy: None,
            startup: None,
        }
    }

    /// Add a minute-precision (5-field) entry.
    pub fn with_cron_expression(mut self, expression: impl Into<String>) -> Self {
        self.options.push(JobOption {
            cron_expression: Some(expression.into()),
            second_precision: false,
            parameter: None,
        });
        self
    }

    /// Add a second-precision (6-field) entry.
    pub fn with_seconds_cron_expression(mut self, expression: impl Into<String>) -> Self {
        self.options.push(JobOption {
            cron_expression: Some(expression.into()),
            second_precision: true,
            parameter: None,
        });
        self
    }

    /// Set the parameter of the most recent entry, replacing any earlier
    /// one, or add a parameter-only option when there is no entry yet.
    pub fn with_parameter(mut self, parameter: impl Into<serde_json::Value>) -> Self {
        let parameter = parameter.into();
        match self.options.last_mut() {
            Some(option) => option.parameter = Some(parameter),
            None => self.options.push(JobOption {
                parameter: Some(parameter),
                ..Default::default()
            }),
        }
        self
    }

    /// Separator between entries; reads better in long chains.
    pub fn and(self) -> Self {
        self
    }

    /// Register under `name` instead of the handler name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_concurrency_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Run once before recurring scheduling begins; failure aborts start.
    pub fn run_at_startup(mut self) -> Self {
        self.startup = Some(StartupMode::Fatal);
        self
    }

    /// Run once before recurring scheduling begins; failure is only logged.
    pub fn run_at_startup_non_fatal(mut self) -> Self {
        self.startup = Some(StartupMode::NonFatal);
        self
    }

    /// Options collected so far.
    pub fn options(&self) -> &[JobOption] {
        &self.options
    }

    pub fn build(self) -> JobDefinition {
        let key = self
            .name
            .map(JobKey::from)
            .unwrap_or_else(|| JobKey::from(self.handler.name()));
        JobDefinition {
            key,
            handler: self.handler,
            options: self.options,
            priority: self.priority,
            group: self.group.unwrap_or_else(|| DEFAULT_GROUP.to_string()),
            retry_policy: self.retry_policy,
            startup: self.startup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Default)]
    struct DummyJob;

    #[async_trait]
    impl Job for DummyJob {
        async fn run(&self, _ctx: &JobContext) -> JobResult {
            Ok(())
        }
    }

    fn builder() -> JobBuilder {
        JobBuilder::new(HandlerRef::of::<DummyJob>())
    }

    #[test]
    fn test_single_cron_expression() {
        let builder = builder().with_cron_expression("* * * * *");
        let options = builder.options();

        assert_eq!(options.len(), 1);
        assert_eq!(options[0].cron_expression.as_deref(), Some("* * * * *"));
        assert!(!options[0].second_precision);
        assert!(options[0].parameter.is_none());
    }

    #[test]
    fn test_multiple_entries_with_and() {
        let builder = builder()
            .with_cron_expression("* * * * *")
            .with_parameter("foo")
            .and()
            .with_cron_expression("0 * * * *")
            .with_parameter("bar");
        let options = builder.options();

        assert_eq!(options.len(), 2);
        assert_eq!(options[0].cron_expression.as_deref(), Some("* * * * *"));
        assert_eq!(options[0].parameter, Some(serde_json::json!("foo")));
        assert_eq!(options[1].cron_expression.as_deref(), Some("0 * * * *"));
        assert_eq!(options[1].parameter, Some(serde_json::json!("bar")));
    }

    #[test]
    fn test_multiple_entries_without_and() {
        let builder = builder()
            .with_cron_expression("* * * * *")
            .with_parameter("foo");
        let builder = builder
            .with_cron_expression("0 * * * *")
            .with_parameter("bar");
        let options = builder.options();

        assert_eq!(options.len(), 2);
        assert_eq!(options[0].parameter, Some(serde_json::json!("foo")));
        assert_eq!(options[1].parameter, Some(serde_json::json!("bar")));
    }

    #[test]
    fn test_second_precision_entry() {
        let builder = builder().with_seconds_cron_expression("*/5 * * * * *");
        assert!(builder.options()[0].second_precision);
    }

    #[test]
    fn test_parameter_only_option() {
        let definition = builder().with_parameter(42).build();
        assert_eq!(definition.options.len(), 1);
        assert!(definition.options[0].cron_expression.is_none());
        assert_eq!(definition.scheduled_options().count(), 0);
        assert_eq!(definition.default_parameter(), Some(serde_json::json!(42)));
    }

    #[test]
    fn test_build_defaults() {
        let definition = builder().with_cron_expression("* * * * *").build();
        assert_eq!(definition.key.as_str(), std::any::type_name::<DummyJob>());
        assert_eq!(definition.group, DEFAULT_GROUP);
        assert_eq!(definition.priority, JobPriority::Normal);
        assert!(definition.startup.is_none());
        assert!(definition.retry_policy.is_none());
    }

    #[test]
    fn test_build_overrides() {
        let definition = builder()
            .with_name("nightly-report")
            .with_priority(JobPriority::High)
            .with_concurrency_group("reports")
            .with_retry_policy(RetryPolicy::no_retry())
            .run_at_startup_non_fatal()
            .build();
        assert_eq!(definition.key, JobKey::from("nightly-report"));
        assert_eq!(definition.group, "reports");
        assert_eq!(definition.priority, JobPriority::High);
        assert_eq!(definition.startup, Some(StartupMode::NonFatal));
        assert_eq!(definition.retry_policy.map(|p| p.max_attempts), Some(1));
    }

    #[test]
    fn test_second_parameter_replaces_first() {
        let definition = builder()
            .with_cron_expression("* * * * *")
            .with_parameter("first")
            .with_parameter("second")
            .build();
        assert_eq!(definition.options.len(), 1);
        assert_eq!(definition.options[0].parameter, Some(serde_json::json!("second")));

        let definition = builder().with_parameter(1).with_parameter(2).build();
        assert_eq!(definition.options.len(), 1);
        assert_eq!(definition.default_parameter(), Some(serde_json::json!(2)));
    }

    #[test]
    fn test_handler_ref_identity() {
        let a = HandlerRef::of::<DummyJob>();
        let b = HandlerRef::of::<DummyJob>();
        assert_eq!(a, b);
        assert_eq!(a.id(), HandlerId::Type(TypeId::of::<DummyJob>()));
        assert_ne!(a, HandlerRef::from_fn("other", |_ctx| async { Ok(()) }));
    }

    #[test]
    fn test_same_name_closures_are_distinct() {
        let first = HandlerRef::from_fn("report", |_ctx| async { Ok(()) });
        let second = HandlerRef::from_fn("report", |_ctx| async { Ok(()) });
        assert_eq!(first.name(), second.name());
        assert_ne!(first, second);
        assert_eq!(first.clone(), first);
    }
}
