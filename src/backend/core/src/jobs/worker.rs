//! Job worker: the scheduling loop.
//!
//! Sleeps until the earliest due instant across all schedule entries and
//! delayed runs, or until the registry changes, then moves everything due
//! onto the queue.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::executor::JobExecutor;
use super::queue::{JobQueueManager, QueueClosed};
use super::registry::JobRegistry;
use crate::clock::Clock;

pub struct JobWorker {
    registry: Arc<JobRegistry>,
    queue: Arc<JobQueueManager>,
    executor: Arc<JobExecutor>,
    clock: Arc<dyn Clock>,
}

impl JobWorker {
    pub fn new(
        registry: Arc<JobRegistry>,
        queue: Arc<JobQueueManager>,
        executor: Arc<JobExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            queue,
            executor,
            clock,
        }
    }

    /// Enqueue every run due at the current instant. Returns how many were
    /// materialized.
    pub async fn tick(&self) -> usize {
        let due = self.registry.take_due(self.clock.now());
        let count = due.len();

        for run in due {
            if let Err(QueueClosed(run)) = self.queue.push(run) {
                warn!(
                    job = %run.job_name(),
                    correlation_id = %run.correlation_id,
                    "Queue closed, due run cancelled"
                );
                self.executor.finalize_cancelled(run).await;
            }
        }
        count
    }

    /// Run the loop until `token` is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        info!("Job worker started");

        loop {
            // Subscribe before reading the registry so no mutation is missed.
            let changed = self.registry.changed();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if token.is_cancelled() {
                break;
            }

            let enqueued = self.tick().await;
            let next_due = self.registry.next_due();
            debug!(enqueued, next_due = ?next_due, "Scheduling loop waiting");

            match next_due {
                Some(deadline) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = &mut changed => debug!("Registry changed, recomputing"),
                        _ = self.clock.sleep_until(deadline) => {}
                    }
                }
                None => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = &mut changed => debug!("Registry changed, recomputing"),
                    }
                }
            }
        }

        info!("Job worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::jobs::definition::{HandlerRef, JobDefinition};
    use crate::jobs::factory::JobFactoryRegistry;
    use crate::jobs::history::NoOpJobHistory;
    use crate::jobs::notification::NotificationRegistry;
    use crate::jobs::retry::DefaultRetryHandler;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    struct Fixture {
        clock: Arc<VirtualClock>,
        registry: Arc<JobRegistry>,
        queue: Arc<JobQueueManager>,
        worker: Arc<JobWorker>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(VirtualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let registry = Arc::new(JobRegistry::new(clock.clone()));
        let queue = Arc::new(JobQueueManager::default());
        let executor = Arc::new(JobExecutor::new(
            Arc::new(JobFactoryRegistry::new()),
            Arc::new(DefaultRetryHandler::default()),
            Arc::new(NoOpJobHistory),
            Arc::new(NotificationRegistry::new()),
            clock.clone(),
        ));
        let worker = Arc::new(JobWorker::new(
            registry.clone(),
            queue.clone(),
            executor,
            clock.clone(),
        ));
        Fixture {
            clock,
            registry,
            queue,
            worker,
        }
    }

    fn every_minute() -> JobDefinition {
        JobDefinition::builder(HandlerRef::from_fn("tick", |_ctx| async { Ok(()) }))
            .with_cron_expression("* * * * *")
            .build()
    }

    #[tokio::test]
    async fn test_tick_only_enqueues_due_runs() {
        let f = fixture();
        f.registry.register(every_minute()).unwrap();

        assert_eq!(f.worker.tick().await, 0);
        f.clock.advance(Duration::from_secs(59));
        assert_eq!(f.worker.tick().await, 0);
        f.clock.advance(Duration::from_secs(1));
        assert_eq!(f.worker.tick().await, 1);
        assert_eq!(f.worker.tick().await, 0);
        assert_eq!(f.queue.len(), 1);
    }

    async fn wait_for_len(queue: &JobQueueManager, len: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while queue.len() < len {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_loop_wakes_on_clock_advance() {
        let f = fixture();
        f.registry.register(every_minute()).unwrap();

        let token = CancellationToken::new();
        let task = {
            let worker = f.worker.clone();
            let token = token.clone();
            tokio::spawn(async move { worker.run(token).await })
        };

        f.clock.advance(Duration::from_secs(60));
        wait_for_len(&f.queue, 1).await;

        token.cancel();
        task.await.unwrap();
        assert_eq!(f.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_loop_wakes_on_registry_change() {
        let f = fixture();

        let token = CancellationToken::new();
        let task = {
            let worker = f.worker.clone();
            let token = token.clone();
            tokio::spawn(async move { worker.run(token).await })
        };

        // Empty registry: the loop is parked on the change signal.
        tokio::time::sleep(Duration::from_millis(20)).await;
        f.clock.advance(Duration::from_secs(30));
        f.registry.add(every_minute()).unwrap();
        f.clock.advance(Duration::from_secs(30));
        wait_for_len(&f.queue, 1).await;

        token.cancel();
        task.await.unwrap();
    }
}
