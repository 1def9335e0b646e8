//! Per-handler notification hooks invoked after each terminal outcome.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, warn};

use super::run::JobRunReport;

/// Observer for the outcomes of one handler.
#[async_trait]
pub trait JobNotificationHandler: Send + Sync + 'static {
    async fn handle(&self, report: &JobRunReport) -> anyhow::Result<()>;
}

/// Notification handlers keyed by handler name.
#[derive(Default)]
pub struct NotificationRegistry {
    handlers: DashMap<String, Vec<Arc<dyn JobNotificationHandler>>>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_name: impl Into<String>, handler: Arc<dyn JobNotificationHandler>) {
        self.handlers.entry(job_name.into()).or_default().push(handler);
    }

    pub fn has_handlers(&self, job_name: &str) -> bool {
        self.handlers.get(job_name).is_some_and(|h| !h.is_empty())
    }

    /// Invoke every handler registered for the report's job. Failures and
    /// panics are logged; later handlers still run.
    pub async fn notify(&self, report: &JobRunReport) {
        // Clone out so no map guard is held across an await.
        let handlers = match self.handlers.get(&report.job_name) {
            Some(handlers) => handlers.clone(),
            None => return,
        };

        for handler in handlers {
            match AssertUnwindSafe(handler.handle(report)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    job = %report.job_name,
                    correlation_id = %report.correlation_id,
                    error = %e,
                    "Notification handler failed"
                ),
                Err(_) => error!(
                    job = %report.job_name,
                    correlation_id = %report.correlation_id,
                    "Notification handler panicked"
                ),
            }
        }
    }
}
