//! Run history recording.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::run::{CorrelationId, JobRunReport};

/// Receives every terminal run outcome.
///
/// Errors are logged by the executor and never affect the run.
#[async_trait]
pub trait JobHistory: Send + Sync + 'static {
    async fn record(&self, report: &JobRunReport) -> anyhow::Result<()>;
}

/// Discards everything. The default recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpJobHistory;

#[async_trait]
impl JobHistory for NoOpJobHistory {
    async fn record(&self, _report: &JobRunReport) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keeps reports in memory, optionally bounded to the most recent `capacity`.
#[derive(Debug, Default)]
pub struct InMemoryJobHistory {
    reports: Mutex<Vec<JobRunReport>>,
    capacity: Option<usize>,
}

impl InMemoryJobHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            reports: Mutex::new(Vec::with_capacity(capacity)),
            capacity: Some(capacity),
        }
    }

    /// Snapshot of recorded reports, oldest first.
    pub fn reports(&self) -> Vec<JobRunReport> {
        self.reports.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }

    pub fn find(&self, correlation_id: CorrelationId) -> Option<JobRunReport> {
        self.reports
            .lock()
            .iter()
            .find(|r| r.correlation_id == correlation_id)
            .cloned()
    }

    /// Reports for one handler name.
    pub fn for_job(&self, job_name: &str) -> Vec<JobRunReport> {
        self.reports
            .lock()
            .iter()
            .filter(|r| r.job_name == job_name)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl JobHistory for InMemoryJobHistory {
    async fn record(&self, report: &JobRunReport) -> anyhow::Result<()> {
        let mut reports = self.reports.lock();
        if let Some(capacity) = self.capacity {
            if capacity == 0 {
                return Ok(());
            }
            if reports.len() >= capacity {
                reports.remove(0);
            }
        }
        reports.push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::definition::HandlerRef;
    use crate::jobs::run::{ExecutionOutcome, JobRun};
    use crate::jobs::JobPriority;
    use chrono::Utc;

    fn report(name: &str) -> JobRunReport {
        let run = JobRun::instant(
            HandlerRef::from_fn(name.to_string(), |_ctx| async { Ok(()) }),
            None,
            JobPriority::Normal,
            Utc::now(),
        );
        JobRunReport::new(&run, ExecutionOutcome::Succeeded, 1, Some(run.due_at), run.due_at)
    }

    #[tokio::test]
    async fn test_in_memory_history() {
        let history = InMemoryJobHistory::new();
        let first = report("a");
        history.record(&first).await.unwrap();
        history.record(&report("b")).await.unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history.for_job("a").len(), 1);
        assert!(history.find(first.correlation_id).is_some());
    }

    #[tokio::test]
    async fn test_bounded_history_drops_oldest() {
        let history = InMemoryJobHistory::with_capacity(2);
        for name in ["a", "b", "c"] {
            history.record(&report(name)).await.unwrap();
        }
        let names: Vec<_> = history.reports().into_iter().map(|r| r.job_name).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_noop_history() {
        assert!(NoOpJobHistory.record(&report("a")).await.is_ok());
    }
}
