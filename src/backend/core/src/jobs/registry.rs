//! The job registry: authoritative store of definitions, their schedule
//! entries, and delayed one-off runs.
//!
//! All reads and writes go through one lock; every mutation signals the
//! change notifier so the scheduling loop re-evaluates its wait.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use super::cron::RecurrenceRule;
use super::definition::{JobDefinition, JobKey, JobOption, StartupMode};
use super::job::JobPriority;
use super::run::{CorrelationId, EntryId, JobRun, RunOrigin};
use crate::clock::Clock;
use crate::error::{CadenceError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Entry State
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle of a schedule entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum EntryStatus {
    /// Producing occurrences
    Active,
    /// The rule has no further occurrences
    Retired,
    /// The rule could not be parsed or could not advance
    Disabled { reason: String },
}

/// Registry-side state of one (rule, parameter) pair.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub id: EntryId,
    pub expression: String,
    pub second_precision: bool,
    pub rule: Option<RecurrenceRule>,
    pub parameter: Option<serde_json::Value>,
    pub next_due: Option<DateTime<Utc>>,
    pub status: EntryStatus,
}

/// Read-only view of a schedule entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub id: EntryId,
    pub expression: String,
    pub second_precision: bool,
    pub parameter: Option<serde_json::Value>,
    pub next_due: Option<DateTime<Utc>>,
    pub status: EntryStatus,
}

/// Read-only view of a registered job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub key: JobKey,
    pub handler: String,
    pub priority: JobPriority,
    pub group: String,
    pub startup: Option<StartupMode>,
    pub entries: Vec<EntrySummary>,
}

struct RegisteredJob {
    definition: JobDefinition,
    entries: Vec<ScheduleEntry>,
}

impl RegisteredJob {
    fn summary(&self) -> JobSummary {
        JobSummary {
            key: self.definition.key.clone(),
            handler: self.definition.handler.name().to_string(),
            priority: self.definition.priority,
            group: self.definition.group.clone(),
            startup: self.definition.startup,
            entries: self
                .entries
                .iter()
                .map(|e| EntrySummary {
                    id: e.id,
                    expression: e.expression.clone(),
                    second_precision: e.second_precision,
                    parameter: e.parameter.clone(),
                    next_due: e.next_due,
                    status: e.status.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    jobs: Vec<RegisteredJob>,
    delayed: Vec<JobRun>,
    next_entry_id: u64,
    closed: bool,
}

/// A delayed run offered after the registry stopped accepting them. The run
/// is handed back so the caller can finalize it.
#[derive(Debug)]
pub struct RegistryClosed(pub JobRun);

impl RegistryState {
    fn position(&self, key: &JobKey) -> Option<usize> {
        self.jobs.iter().position(|j| &j.definition.key == key)
    }

    fn find_mut(&mut self, key: &JobKey) -> Result<&mut RegisteredJob> {
        self.jobs
            .iter_mut()
            .find(|j| &j.definition.key == key)
            .ok_or_else(|| CadenceError::job_not_found(key))
    }

    /// Build entries for `options`, disabling (and logging) any that fail to parse.
    fn build_entries(
        &mut self,
        key: &JobKey,
        options: &[JobOption],
        now: DateTime<Utc>,
    ) -> Vec<ScheduleEntry> {
        let mut entries = Vec::new();
        for option in options {
            let Some(expression) = &option.cron_expression else {
                continue;
            };
            let id = EntryId(self.next_entry_id);
            self.next_entry_id += 1;

            let entry = match RecurrenceRule::parse(expression, option.second_precision) {
                Ok(rule) => activate(key, id, rule, option.parameter.clone(), now),
                Err(e) => {
                    error!(
                        job = %key,
                        entry = %id,
                        expression = %expression,
                        error = %e,
                        "Invalid cron expression, schedule entry disabled"
                    );
                    ScheduleEntry {
                        id,
                        expression: expression.clone(),
                        second_precision: option.second_precision,
                        rule: None,
                        parameter: option.parameter.clone(),
                        next_due: None,
                        status: EntryStatus::Disabled {
                            reason: e.to_string(),
                        },
                    }
                }
            };
            entries.push(entry);
        }
        entries
    }
}

fn activate(
    key: &JobKey,
    id: EntryId,
    rule: RecurrenceRule,
    parameter: Option<serde_json::Value>,
    now: DateTime<Utc>,
) -> ScheduleEntry {
    let mut entry = ScheduleEntry {
        id,
        expression: rule.expression().to_string(),
        second_precision: rule.has_second_precision(),
        rule: None,
        parameter,
        next_due: None,
        status: EntryStatus::Active,
    };
    advance_entry(key, &mut entry, &rule, now);
    entry.rule = Some(rule);
    entry
}

/// Move `entry.next_due` to the first occurrence after `after`, retiring or
/// disabling the entry when the rule cannot supply one.
fn advance_entry(key: &JobKey, entry: &mut ScheduleEntry, rule: &RecurrenceRule, after: DateTime<Utc>) {
    match rule.next_after(after) {
        Ok(Some(next)) => entry.next_due = Some(next),
        Ok(None) => {
            debug!(job = %key, entry = %entry.id, "Schedule entry has no further occurrences");
            entry.next_due = None;
            entry.status = EntryStatus::Retired;
        }
        Err(e) => {
            error!(
                job = %key,
                entry = %entry.id,
                expression = %entry.expression,
                error = %e,
                "Schedule entry cannot advance, disabled"
            );
            entry.next_due = None;
            entry.status = EntryStatus::Disabled {
                reason: e.to_string(),
            };
        }
    }
}

/// Reject a second registration of a key whose settings disagree with the first.
fn merge_conflict(existing: &JobDefinition, incoming: &JobDefinition) -> Result<()> {
    let conflict = if existing.handler != incoming.handler {
        Some(format!("handler '{}' vs '{}'", existing.handler.name(), incoming.handler.name()))
    } else if existing.priority != incoming.priority {
        Some(format!("priority {} vs {}", existing.priority, incoming.priority))
    } else if existing.group != incoming.group {
        Some(format!("group '{}' vs '{}'", existing.group, incoming.group))
    } else {
        match (&existing.retry_policy, &incoming.retry_policy) {
            (Some(a), Some(b)) if a != b => Some("retry policy".to_string()),
            _ => None,
        }
    };
    match conflict {
        Some(detail) => Err(CadenceError::invalid_job_definition(format!(
            "job '{}' registered twice with conflicting settings: {}",
            incoming.key, detail
        ))),
        None => Ok(()),
    }
}

/// Parse every scheduled option up front so a mutation either applies fully
/// or not at all.
fn validate_options(options: &[JobOption]) -> Result<()> {
    for option in options {
        if let Some(expression) = &option.cron_expression {
            RecurrenceRule::parse(expression, option.second_precision)?;
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Registry
// ═══════════════════════════════════════════════════════════════════════════════

/// Store of job definitions and pending delayed runs.
pub struct JobRegistry {
    state: RwLock<RegistryState>,
    changed: Notify,
    clock: Arc<dyn Clock>,
}

impl JobRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            changed: Notify::new(),
            clock,
        }
    }

    /// Register a definition at composition time.
    ///
    /// Invalid expressions disable their entry instead of failing. A key that
    /// is already present gains the new definition's entries; a startup flag
    /// on either side carries over, with `Fatal` taking precedence.
    ///
    /// # Errors
    ///
    /// `InvalidJobDefinition` if the key is present with a different handler,
    /// priority, group or retry policy. Nothing is changed on error.
    pub fn register(&self, definition: JobDefinition) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.write();

        match state.position(&definition.key) {
            Some(index) => {
                merge_conflict(&state.jobs[index].definition, &definition)?;
                let entries = state.build_entries(&definition.key, &definition.options, now);
                debug!(job = %definition.key, "Merging duplicate registration into existing job");
                let existing = &mut state.jobs[index].definition;
                existing.startup = match (existing.startup, definition.startup) {
                    (Some(StartupMode::Fatal), _) | (_, Some(StartupMode::Fatal)) => {
                        Some(StartupMode::Fatal)
                    }
                    (current, incoming) => current.or(incoming),
                };
                if existing.retry_policy.is_none() {
                    existing.retry_policy = definition.retry_policy;
                }
                existing.options.extend(definition.options);
                state.jobs[index].entries.extend(entries);
            }
            None => {
                let entries = state.build_entries(&definition.key, &definition.options, now);
                state.jobs.push(RegisteredJob { definition, entries });
            }
        }
        drop(state);
        self.changed.notify_one();
        Ok(())
    }

    /// Add a definition at runtime.
    ///
    /// # Errors
    ///
    /// `DuplicateJob` if the key is taken; a schedule error if any expression
    /// is invalid. Nothing is changed on error.
    pub fn add(&self, definition: JobDefinition) -> Result<()> {
        validate_options(&definition.options)?;
        let now = self.clock.now();
        {
            let mut state = self.state.write();
            if state.position(&definition.key).is_some() {
                return Err(CadenceError::duplicate_job(&definition.key));
            }
            let entries = state.build_entries(&definition.key, &definition.options, now);
            info!(job = %definition.key, entries = entries.len(), "Job added");
            state.jobs.push(RegisteredJob { definition, entries });
        }
        self.changed.notify_one();
        Ok(())
    }

    /// Remove a definition. Runs already queued are unaffected.
    pub fn remove(&self, key: &JobKey) -> Result<JobDefinition> {
        let removed = {
            let mut state = self.state.write();
            let index = state
                .position(key)
                .ok_or_else(|| CadenceError::job_not_found(key))?;
            state.jobs.remove(index)
        };
        info!(job = %key, "Job removed");
        self.changed.notify_one();
        Ok(removed.definition)
    }

    /// Replace every entry of `key` with a single entry on `expression`,
    /// keeping the first entry's parameter.
    pub fn update_schedule(
        &self,
        key: &JobKey,
        expression: &str,
        second_precision: bool,
    ) -> Result<()> {
        let rule = RecurrenceRule::parse(expression, second_precision)?;
        let now = self.clock.now();
        {
            let mut state = self.state.write();
            let id = EntryId(state.next_entry_id);
            let job = state.find_mut(key)?;
            let parameter = job.definition.default_parameter();
            job.definition.options = vec![JobOption {
                cron_expression: Some(expression.to_string()),
                second_precision,
                parameter: parameter.clone(),
            }];
            job.entries = vec![activate(key, id, rule, parameter, now)];
            state.next_entry_id += 1;
        }
        info!(job = %key, expression, "Job schedule updated");
        self.changed.notify_one();
        Ok(())
    }

    /// Set the parameter of every entry of `key`.
    pub fn update_parameter(&self, key: &JobKey, parameter: Option<serde_json::Value>) -> Result<()> {
        {
            let mut state = self.state.write();
            let job = state.find_mut(key)?;
            for option in &mut job.definition.options {
                option.parameter = parameter.clone();
            }
            for entry in &mut job.entries {
                entry.parameter = parameter.clone();
            }
        }
        info!(job = %key, "Job parameter updated");
        self.changed.notify_one();
        Ok(())
    }

    /// Hold a one-off run until its due instant.
    ///
    /// # Errors
    ///
    /// Returns the run if [`close`](Self::close) has already been called.
    pub fn schedule_delayed(&self, run: JobRun) -> std::result::Result<(), RegistryClosed> {
        {
            let mut state = self.state.write();
            if state.closed {
                return Err(RegistryClosed(run));
            }
            debug!(
                job = %run.job_name(),
                correlation_id = %run.correlation_id,
                due_at = %run.due_at,
                "Delayed run registered"
            );
            state.delayed.push(run);
        }
        self.changed.notify_one();
        Ok(())
    }

    /// Withdraw a delayed run that has not been materialized yet.
    pub fn cancel_delayed(&self, correlation_id: CorrelationId) -> Option<JobRun> {
        let mut state = self.state.write();
        let index = state
            .delayed
            .iter()
            .position(|r| r.correlation_id == correlation_id)?;
        Some(state.delayed.remove(index))
    }

    /// Stop accepting delayed runs and withdraw every pending one.
    pub fn close(&self) -> Vec<JobRun> {
        let mut state = self.state.write();
        state.closed = true;
        std::mem::take(&mut state.delayed)
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Earliest instant at which anything becomes due.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        let state = self.state.read();
        let scheduled = state
            .jobs
            .iter()
            .flat_map(|j| j.entries.iter())
            .filter_map(|e| e.next_due);
        let delayed = state.delayed.iter().map(|r| r.due_at);
        scheduled.chain(delayed).min()
    }

    /// Materialize every occurrence due at or before `now` and advance the
    /// entries past it.
    ///
    /// Each due occurrence yields exactly one run, including every occurrence
    /// missed while the loop was not running.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<JobRun> {
        let mut runs = Vec::new();
        let mut state = self.state.write();

        for job in state.jobs.iter_mut() {
            let definition = &job.definition;
            for entry in job.entries.iter_mut() {
                let Some(rule) = entry.rule.clone() else {
                    continue;
                };
                while let Some(due) = entry.next_due {
                    if due > now {
                        break;
                    }
                    runs.push(
                        JobRun::new(
                            definition.handler.clone(),
                            entry.parameter.clone(),
                            definition.priority,
                            due,
                            now,
                            RunOrigin::Scheduled { entry: entry.id },
                        )
                        .with_job_key(definition.key.clone())
                        .with_group(definition.group.clone())
                        .with_retry_policy(definition.retry_policy.clone()),
                    );
                    advance_entry(&definition.key, entry, &rule, due);
                }
            }
        }

        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.delayed)
            .into_iter()
            .partition(|r| r.due_at <= now);
        state.delayed = pending;
        runs.extend(due);

        runs.sort_by_key(|r| r.due_at);
        runs
    }

    /// Definitions marked to run at startup, in registration order.
    pub fn startup_jobs(&self) -> Vec<JobDefinition> {
        self.state
            .read()
            .jobs
            .iter()
            .filter(|j| j.definition.startup.is_some())
            .map(|j| j.definition.clone())
            .collect()
    }

    pub fn get(&self, key: &JobKey) -> Option<JobDefinition> {
        let state = self.state.read();
        state
            .jobs
            .iter()
            .find(|j| &j.definition.key == key)
            .map(|j| j.definition.clone())
    }

    pub fn contains(&self, key: &JobKey) -> bool {
        self.state.read().position(key).is_some()
    }

    pub fn summary(&self, key: &JobKey) -> Option<JobSummary> {
        let state = self.state.read();
        state
            .jobs
            .iter()
            .find(|j| &j.definition.key == key)
            .map(RegisteredJob::summary)
    }

    /// Every registered job, in registration order.
    pub fn jobs(&self) -> Vec<JobSummary> {
        self.state.read().jobs.iter().map(RegisteredJob::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().jobs.is_empty()
    }

    pub fn delayed_len(&self) -> usize {
        self.state.read().delayed.len()
    }

    /// Resolves after the next mutation (or immediately if one happened since
    /// the last wait).
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }
}
