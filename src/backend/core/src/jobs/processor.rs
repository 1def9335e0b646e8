//! Job processor: dequeues runs under the global parallelism bound and hands
//! them to the executor.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::executor::JobExecutor;
use super::queue::JobQueueManager;
use crate::telemetry::JobMetrics;

/// Counters shared with running executions.
#[derive(Debug, Default)]
pub struct ProcessorStats {
    executing: AtomicUsize,
    peak_executing: AtomicUsize,
    processed: AtomicU64,
}

impl ProcessorStats {
    fn started(self: &Arc<Self>) -> ExecutingGuard {
        let now = self.executing.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_executing.fetch_max(now, Ordering::SeqCst);
        JobMetrics::executing(now);
        ExecutingGuard(Arc::clone(self))
    }

    /// Runs currently holding a slot.
    pub fn executing(&self) -> usize {
        self.executing.load(Ordering::SeqCst)
    }

    /// Highest simultaneous slot usage observed.
    pub fn peak_executing(&self) -> usize {
        self.peak_executing.load(Ordering::SeqCst)
    }

    /// Runs that reached a terminal outcome through this processor.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ProcessorSnapshot {
        ProcessorSnapshot {
            executing: self.executing(),
            peak_executing: self.peak_executing(),
            processed: self.processed(),
        }
    }
}

/// Point-in-time copy of [`ProcessorStats`].
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ProcessorSnapshot {
    pub executing: usize,
    pub peak_executing: usize,
    pub processed: u64,
}

struct ExecutingGuard(Arc<ProcessorStats>);

impl Drop for ExecutingGuard {
    fn drop(&mut self) {
        let now = self.0.executing.fetch_sub(1, Ordering::SeqCst) - 1;
        self.0.processed.fetch_add(1, Ordering::SeqCst);
        JobMetrics::executing(now);
    }
}

/// Dispatch loop bounded by `max_degree_of_parallelism` permits.
pub struct JobProcessor {
    queue: Arc<JobQueueManager>,
    executor: Arc<JobExecutor>,
    permits: Arc<Semaphore>,
    max_degree_of_parallelism: usize,
    stats: Arc<ProcessorStats>,
}

impl JobProcessor {
    pub fn new(
        queue: Arc<JobQueueManager>,
        executor: Arc<JobExecutor>,
        max_degree_of_parallelism: usize,
    ) -> Self {
        let max_degree_of_parallelism = max_degree_of_parallelism.max(1);
        Self {
            queue,
            executor,
            permits: Arc::new(Semaphore::new(max_degree_of_parallelism)),
            max_degree_of_parallelism,
            stats: Arc::new(ProcessorStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ProcessorStats> {
        Arc::clone(&self.stats)
    }

    pub fn max_degree_of_parallelism(&self) -> usize {
        self.max_degree_of_parallelism
    }

    /// Dispatch until `token` is cancelled, then wait for every in-flight
    /// execution to finish.
    ///
    /// A permit is held from dequeue until the run's terminal outcome,
    /// including retry backoff.
    pub async fn run(&self, token: CancellationToken) {
        info!(
            max_degree_of_parallelism = self.max_degree_of_parallelism,
            "Job processor started"
        );
        let tracker = TaskTracker::new();

        loop {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let Some((run, lease)) = self.queue.pop(&token).await else {
                break;
            };

            debug!(
                job = %run.job_name(),
                correlation_id = %run.correlation_id,
                group = %lease.group(),
                "Run dispatched"
            );

            let executor = Arc::clone(&self.executor);
            let guard = self.stats.started();
            let child = token.child_token();
            tracker.spawn(async move {
                let _permit = permit;
                let _lease = lease;
                let _guard = guard;
                executor.execute(run, child).await;
            });
        }

        tracker.close();
        let in_flight = tracker.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for executing runs to finish");
        }
        tracker.wait().await;
        info!(processed = self.stats.processed(), "Job processor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::jobs::definition::HandlerRef;
    use crate::jobs::factory::JobFactoryRegistry;
    use crate::jobs::history::InMemoryJobHistory;
    use crate::jobs::notification::NotificationRegistry;
    use crate::jobs::retry::DefaultRetryHandler;
    use crate::jobs::run::JobRun;
    use crate::jobs::JobPriority;
    use chrono::Utc;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallelism_never_exceeds_limit() {
        let history = Arc::new(InMemoryJobHistory::new());
        let executor = Arc::new(JobExecutor::new(
            Arc::new(JobFactoryRegistry::new()),
            Arc::new(DefaultRetryHandler::default()),
            history.clone(),
            Arc::new(NotificationRegistry::new()),
            Arc::new(SystemClock),
        ));
        let queue = Arc::new(JobQueueManager::default());
        let processor = Arc::new(JobProcessor::new(queue.clone(), executor, 2));

        let handler = HandlerRef::from_fn("sleepy", |_ctx| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        });
        for _ in 0..10 {
            queue
                .push(JobRun::instant(handler.clone(), None, JobPriority::Normal, Utc::now()))
                .unwrap();
        }

        let token = CancellationToken::new();
        let task = {
            let processor = processor.clone();
            let token = token.clone();
            tokio::spawn(async move { processor.run(token).await })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while history.len() < 10 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        token.cancel();
        task.await.unwrap();

        let stats = processor.stats();
        assert_eq!(stats.processed(), 10);
        assert_eq!(stats.executing(), 0);
        assert!(stats.peak_executing() <= 2);
        assert!(stats.peak_executing() >= 1);
    }
}
