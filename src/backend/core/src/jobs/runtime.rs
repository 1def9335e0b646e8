//! Live mutation of the job registry while the engine runs.

use std::sync::Arc;
use tracing::info;

use super::definition::{HandlerRef, JobBuilder, JobDefinition, JobKey};
use super::factory::JobFactoryRegistry;
use super::registry::{JobRegistry, JobSummary};
use crate::error::Result;

/// Add, remove and update jobs at runtime.
///
/// Every mutation is applied atomically and wakes the scheduling loop. Runs
/// already queued or executing keep the snapshot they were created with.
#[derive(Clone)]
pub struct RuntimeJobRegistry {
    registry: Arc<JobRegistry>,
    factory: Arc<JobFactoryRegistry>,
}

impl RuntimeJobRegistry {
    pub fn new(registry: Arc<JobRegistry>, factory: Arc<JobFactoryRegistry>) -> Self {
        Self { registry, factory }
    }

    /// Add a job definition.
    ///
    /// # Errors
    ///
    /// `DuplicateJob` if the key is already registered, or a schedule error
    /// for an invalid expression.
    pub fn add_job(&self, definition: JobDefinition) -> Result<()> {
        let handler = definition.handler.clone();
        self.registry.add(definition)?;
        self.factory.register(&handler);
        Ok(())
    }

    /// Build and add a definition for `handler`.
    pub fn add_job_with<F>(&self, handler: HandlerRef, configure: F) -> Result<()>
    where
        F: FnOnce(JobBuilder) -> JobBuilder,
    {
        self.add_job(configure(JobBuilder::new(handler)).build())
    }

    pub fn remove_job(&self, key: impl Into<JobKey>) -> Result<()> {
        let removed = self.registry.remove(&key.into())?;
        info!(job = %removed.key, "Job removed from runtime registry");
        Ok(())
    }

    /// Replace a job's schedule with a single entry.
    pub fn update_schedule(
        &self,
        key: impl Into<JobKey>,
        expression: &str,
        second_precision: bool,
    ) -> Result<()> {
        self.registry
            .update_schedule(&key.into(), expression, second_precision)
    }

    /// Replace the parameter on every schedule entry of a job.
    pub fn update_parameter(
        &self,
        key: impl Into<JobKey>,
        parameter: Option<serde_json::Value>,
    ) -> Result<()> {
        self.registry.update_parameter(&key.into(), parameter)
    }

    pub fn jobs(&self) -> Vec<JobSummary> {
        self.registry.jobs()
    }

    pub fn get(&self, key: impl Into<JobKey>) -> Option<JobSummary> {
        self.registry.summary(&key.into())
    }

    pub fn contains(&self, key: impl Into<JobKey>) -> bool {
        self.registry.contains(&key.into())
    }
}
