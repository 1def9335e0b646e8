//! Dispatch queue with priority ordering and per-group concurrency limits.
//!
//! Each concurrency group has its own heap. A group at its in-flight limit is
//! skipped when choosing the next run, so a saturated group never blocks the
//! others.

use parking_lot::Mutex;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::run::{CorrelationId, JobRun};
use crate::telemetry::JobMetrics;

/// A run waiting on the queue.
#[derive(Debug)]
struct QueuedRun {
    run: JobRun,
    seq: u64,
}

impl Eq for QueuedRun {}

impl PartialEq for QueuedRun {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl PartialOrd for QueuedRun {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRun {
    /// Max-heap order: higher priority, then earlier due, then earlier enqueue.
    fn cmp(&self, other: &Self) -> Ordering {
        self.run
            .priority
            .cmp(&other.run.priority)
            .then_with(|| other.run.due_at.cmp(&self.run.due_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct GroupQueue {
    heap: BinaryHeap<QueuedRun>,
    in_flight: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    groups: HashMap<String, GroupQueue>,
    seq: u64,
    closed: bool,
}

impl QueueState {
    fn pending(&self) -> usize {
        self.groups.values().map(|g| g.heap.len()).sum()
    }
}

/// Queue statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    /// Runs waiting, across all groups
    pub pending: usize,
    /// Runs dequeued and not yet released
    pub in_flight: usize,
    /// Runs waiting, per group
    pub pending_by_group: HashMap<String, usize>,
}

/// Error returned when pushing to a closed queue; carries the rejected run.
#[derive(Debug)]
pub struct QueueClosed(pub JobRun);

/// Priority queue shared by the scheduling loop, instant requests and the
/// processor.
#[derive(Debug, Default)]
pub struct JobQueueManager {
    state: Mutex<QueueState>,
    available: Notify,
    group_limits: HashMap<String, usize>,
}

impl JobQueueManager {
    pub fn new(group_limits: HashMap<String, usize>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            group_limits,
        }
    }

    fn limit_for(&self, group: &str) -> usize {
        self.group_limits.get(group).copied().unwrap_or(usize::MAX)
    }

    /// Enqueue a run.
    ///
    /// # Errors
    ///
    /// Returns the run back if the queue has been closed.
    pub fn push(&self, run: JobRun) -> Result<(), QueueClosed> {
        let depth = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(QueueClosed(run));
            }
            state.seq += 1;
            let seq = state.seq;
            debug!(
                job = %run.job_name(),
                correlation_id = %run.correlation_id,
                priority = %run.priority,
                group = %run.group,
                "Run enqueued"
            );
            JobMetrics::run_enqueued(&run.group);
            state
                .groups
                .entry(run.group.clone())
                .or_default()
                .heap
                .push(QueuedRun { run, seq });
            state.pending()
        };
        JobMetrics::queue_depth(depth);
        self.available.notify_waiters();
        Ok(())
    }

    /// Dequeue the best eligible run, if any, without waiting.
    pub fn try_pop(self: &Arc<Self>) -> Option<(JobRun, QueueLease)> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }

        let group = state
            .groups
            .iter()
            .filter(|(name, g)| g.in_flight < self.limit_for(name))
            .filter_map(|(name, g)| g.heap.peek().map(|head| (name, head)))
            .max_by(|(_, a), (_, b)| a.cmp(b))
            .map(|(name, _)| name.clone())?;

        let queue = state.groups.get_mut(&group)?;
        let queued = queue.heap.pop()?;
        queue.in_flight += 1;
        JobMetrics::queue_depth(state.pending());

        Some((
            queued.run,
            QueueLease {
                queue: Arc::clone(self),
                group,
            },
        ))
    }

    /// Wait for an eligible run. Returns `None` once `token` is cancelled or
    /// the queue is closed.
    pub async fn pop(self: &Arc<Self>, token: &CancellationToken) -> Option<(JobRun, QueueLease)> {
        loop {
            if token.is_cancelled() {
                return None;
            }
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(claimed) = self.try_pop() {
                return Some(claimed);
            }
            if self.is_closed() {
                return None;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    /// Take a specific run off the queue before it is dispatched.
    pub fn remove(&self, correlation_id: CorrelationId) -> Option<JobRun> {
        let mut state = self.state.lock();
        for group in state.groups.values_mut() {
            if group.heap.iter().any(|q| q.run.correlation_id == correlation_id) {
                let mut kept = Vec::with_capacity(group.heap.len());
                let mut removed = None;
                for queued in std::mem::take(&mut group.heap) {
                    if queued.run.correlation_id == correlation_id {
                        removed = Some(queued.run);
                    } else {
                        kept.push(queued);
                    }
                }
                group.heap = BinaryHeap::from(kept);
                return removed;
            }
        }
        None
    }

    fn release(&self, group: &str) {
        {
            let mut state = self.state.lock();
            if let Some(queue) = state.groups.get_mut(group) {
                queue.in_flight = queue.in_flight.saturating_sub(1);
            }
        }
        // A freed group slot may make a waiting run eligible.
        self.available.notify_waiters();
    }

    /// Stop accepting and dispatching runs; returns everything still queued,
    /// in dispatch order.
    pub fn close(&self) -> Vec<JobRun> {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            let mut all: Vec<QueuedRun> = state
                .groups
                .values_mut()
                .flat_map(|g| std::mem::take(&mut g.heap).into_vec())
                .collect();
            all.sort_by(|a, b| b.cmp(a));
            all.into_iter().map(|q| q.run).collect::<Vec<_>>()
        };
        JobMetrics::queue_depth(0);
        self.available.notify_waiters();
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            pending: state.pending(),
            in_flight: state.groups.values().map(|g| g.in_flight).sum(),
            pending_by_group: state
                .groups
                .iter()
                .map(|(name, g)| (name.clone(), g.heap.len()))
                .collect(),
        }
    }
}

/// Holds a group slot for a dispatched run; releases it on drop.
#[derive(Debug)]
pub struct QueueLease {
    queue: Arc<JobQueueManager>,
    group: String,
}

impl QueueLease {
    pub fn group(&self) -> &str {
        &self.group
    }
}

impl Drop for QueueLease {
    fn drop(&mut self) {
        self.queue.release(&self.group);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::definition::HandlerRef;
    use crate::jobs::run::RunOrigin;
    use crate::jobs::JobPriority;
    use chrono::{DateTime, TimeZone, Utc};
    use std::time::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn run(name: &str, priority: JobPriority, due: i64) -> JobRun {
        JobRun::new(
            HandlerRef::from_fn(name.to_string(), |_ctx| async { Ok(()) }),
            None,
            priority,
            t(due),
            t(0),
            RunOrigin::Instant,
        )
    }

    fn queue() -> Arc<JobQueueManager> {
        Arc::new(JobQueueManager::default())
    }

    fn pop_name(queue: &Arc<JobQueueManager>) -> String {
        let (run, _lease) = queue.try_pop().unwrap();
        run.job_name().to_string()
    }

    #[test]
    fn test_priority_then_due_then_fifo() {
        let queue = queue();
        queue.push(run("low", JobPriority::Low, 0)).unwrap();
        queue.push(run("normal-late", JobPriority::Normal, 30)).unwrap();
        queue.push(run("normal-early-a", JobPriority::Normal, 10)).unwrap();
        queue.push(run("normal-early-b", JobPriority::Normal, 10)).unwrap();
        queue.push(run("critical", JobPriority::Critical, 60)).unwrap();

        assert_eq!(pop_name(&queue), "critical");
        assert_eq!(pop_name(&queue), "normal-early-a");
        assert_eq!(pop_name(&queue), "normal-early-b");
        assert_eq!(pop_name(&queue), "normal-late");
        assert_eq!(pop_name(&queue), "low");
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_instant_run_ahead_of_later_due_scheduled_work() {
        let queue = queue();
        queue.push(run("scheduled", JobPriority::Normal, 120)).unwrap();
        queue.push(run("instant", JobPriority::Normal, 60)).unwrap();
        assert_eq!(pop_name(&queue), "instant");
    }

    #[test]
    fn test_group_limit_isolates_groups() {
        let mut limits = HashMap::new();
        limits.insert("reports".to_string(), 1);
        let queue = Arc::new(JobQueueManager::new(limits));

        queue
            .push(run("report-1", JobPriority::Critical, 0).with_group("reports"))
            .unwrap();
        queue
            .push(run("report-2", JobPriority::Critical, 0).with_group("reports"))
            .unwrap();
        queue.push(run("other", JobPriority::Low, 0)).unwrap();

        let (first, lease) = queue.try_pop().unwrap();
        assert_eq!(first.job_name(), "report-1");
        assert_eq!(lease.group(), "reports");

        // reports is saturated, so the low-priority default-group run goes next
        assert_eq!(pop_name(&queue), "other");
        assert!(queue.try_pop().is_none());

        drop(lease);
        assert_eq!(pop_name(&queue), "report-2");
    }

    #[test]
    fn test_remove_specific_run() {
        let queue = queue();
        let target = run("target", JobPriority::Normal, 0);
        let id = target.correlation_id;
        queue.push(target).unwrap();
        queue.push(run("other", JobPriority::Normal, 0)).unwrap();

        assert_eq!(queue.remove(id).map(|r| r.correlation_id), Some(id));
        assert!(queue.remove(id).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_close_drains_and_rejects() {
        let queue = queue();
        queue.push(run("a", JobPriority::Low, 0)).unwrap();
        queue.push(run("b", JobPriority::High, 0)).unwrap();

        let drained: Vec<_> = queue.close().into_iter().map(|r| r.job_name().to_string()).collect();
        assert_eq!(drained, vec!["b", "a"]);
        assert!(queue.push(run("c", JobPriority::Normal, 0)).is_err());
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_stats() {
        let queue = queue();
        queue.push(run("a", JobPriority::Normal, 0).with_group("x")).unwrap();
        queue.push(run("b", JobPriority::Normal, 0).with_group("y")).unwrap();
        let _lease = queue.try_pop().unwrap().1;

        let stats = queue.stats();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.pending_by_group.values().sum::<usize>(), 1);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = queue();
        let token = CancellationToken::new();

        let waiter = {
            let queue = queue.clone();
            let token = token.clone();
            tokio::spawn(async move { queue.pop(&token).await.map(|(r, _)| r.job_name().to_string()) })
        };

        tokio::task::yield_now().await;
        queue.push(run("late", JobPriority::Normal, 0)).unwrap();

        let name = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(name.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_pop_returns_none_on_cancel() {
        let queue = queue();
        let token = CancellationToken::new();
        token.cancel();
        assert!(queue.pop(&token).await.is_none());
    }
}
