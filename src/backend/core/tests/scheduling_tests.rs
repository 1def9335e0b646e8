//! Scheduling tests driven by a virtual clock.
//!
//! Tests cover:
//! - Due-instant computation through the running engine
//! - Multiple schedule entries on one job
//! - Second-precision entries
//! - Runtime add/remove/update while the loop is live
//! - Delayed one-off runs

use cadence_core::clock::{Clock, VirtualClock};
use cadence_core::jobs::{
    ExecutionOutcome, HandlerRef, InMemoryJobHistory, JobBuilder, JobContext, QueueWorker, RunOrigin,
};
use chrono::{DateTime, TimeZone, Timelike, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

type Seen = Arc<Mutex<Vec<(Option<serde_json::Value>, DateTime<Utc>)>>>;

/// Handler recording the parameter and due instant of every run.
fn recorder(name: &str, seen: Seen) -> HandlerRef {
    HandlerRef::from_fn(name.to_string(), move |ctx: JobContext| {
        let seen = seen.clone();
        async move {
            seen.lock().push((ctx.parameter_value().cloned(), ctx.due_at()));
            Ok(())
        }
    })
}

async fn wait_for(history: &InMemoryJobHistory, count: usize) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while history.len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {} reports, saw {}", count, history.len()));
}

/// Give the engine a moment to (wrongly) produce more runs.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

struct Harness {
    clock: Arc<VirtualClock>,
    history: Arc<InMemoryJobHistory>,
    engine: QueueWorker,
}

fn harness<F>(configure: F) -> Harness
where
    F: FnOnce(cadence_core::jobs::QueueWorkerBuilder) -> cadence_core::jobs::QueueWorkerBuilder,
{
    let clock = Arc::new(VirtualClock::new(start()));
    let history = Arc::new(InMemoryJobHistory::new());
    let engine = configure(
        QueueWorker::builder()
            .with_clock(clock.clone())
            .with_history(history.clone()),
    )
    .build()
    .unwrap();
    Harness {
        clock,
        history,
        engine,
    }
}

// ============================================================================
// Recurring Schedules
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_every_minute_advanced_one_minute_runs_once() {
    let seen: Seen = Arc::default();
    let h = harness(|b| b.add_job_with(recorder("tick", seen.clone()), |j| j.with_cron_expression("* * * * *")));

    h.engine.start().await.unwrap();
    h.clock.advance(Duration::from_secs(60));
    wait_for(&h.history, 1).await;
    settle().await;
    h.engine.stop().await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, None);
    assert_eq!(seen[0].1, start() + chrono::Duration::minutes(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_entries_over_one_hour() {
    let seen: Seen = Arc::default();
    let h = harness(|b| {
        b.add_job_with(recorder("multi", seen.clone()), |j| {
            j.with_cron_expression("* * * * *")
                .with_parameter("foo")
                .and()
                .with_cron_expression("0 * * * *")
                .with_parameter("bar")
        })
    });

    h.engine.start().await.unwrap();
    h.clock.advance(Duration::from_secs(3600));
    wait_for(&h.history, 61).await;
    settle().await;
    h.engine.stop().await;

    let seen = seen.lock();
    let foo = seen
        .iter()
        .filter(|(p, _)| p.as_ref() == Some(&serde_json::json!("foo")))
        .count();
    let bar: Vec<_> = seen
        .iter()
        .filter(|(p, _)| p.as_ref() == Some(&serde_json::json!("bar")))
        .collect();

    assert_eq!(seen.len(), 61);
    assert_eq!(foo, 60);
    assert_eq!(bar.len(), 1);
    assert_eq!(bar[0].1.minute(), 0);
    assert_eq!(bar[0].1.second(), 0);
    assert_eq!(bar[0].1, start() + chrono::Duration::hours(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_precision_entry() {
    let seen: Seen = Arc::default();
    let h = harness(|b| {
        b.add_job_with(recorder("fast", seen.clone()), |j| {
            j.with_seconds_cron_expression("*/10 * * * * *")
        })
    });

    h.engine.start().await.unwrap();
    h.clock.advance(Duration::from_secs(30));
    wait_for(&h.history, 3).await;
    settle().await;
    h.engine.stop().await;

    let due: Vec<_> = seen.lock().iter().map(|(_, due)| due.second()).collect();
    assert_eq!(due.len(), 3);
    let mut sorted = due.clone();
    sorted.sort();
    assert_eq!(sorted, vec![0, 10, 20]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_entry_does_not_stop_others() {
    let seen: Seen = Arc::default();
    let h = harness(|b| {
        b.add_job_with(recorder("mixed", seen.clone()), |j| {
            j.with_cron_expression("not a cron at all")
                .and()
                .with_cron_expression("* * * * *")
        })
    });

    let job = h.engine.runtime_registry().get("mixed").unwrap();
    assert_eq!(job.entries.len(), 2);

    h.engine.start().await.unwrap();
    h.clock.advance(Duration::from_secs(60));
    wait_for(&h.history, 1).await;
    h.engine.stop().await;
}

// ============================================================================
// Runtime Registry
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_job_added_at_runtime_is_scheduled() {
    let seen: Seen = Arc::default();
    let h = harness(|b| b);
    h.engine.start().await.unwrap();

    h.engine
        .runtime_registry()
        .add_job(
            JobBuilder::new(recorder("late", seen.clone()))
                .with_cron_expression("*/5 * * * *")
                .build(),
        )
        .unwrap();

    h.clock.advance(Duration::from_secs(5 * 60));
    wait_for(&h.history, 1).await;
    h.engine.stop().await;
    assert_eq!(seen.lock().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_removed_job_stops_producing_runs() {
    let seen: Seen = Arc::default();
    let h = harness(|b| b.add_job_with(recorder("gone", seen.clone()), |j| j.with_cron_expression("* * * * *")));

    h.engine.start().await.unwrap();
    h.clock.advance(Duration::from_secs(60));
    wait_for(&h.history, 1).await;

    h.engine.runtime_registry().remove_job("gone").unwrap();
    h.clock.advance(Duration::from_secs(600));
    settle().await;
    h.engine.stop().await;

    assert_eq!(seen.lock().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_updated_schedule_takes_effect() {
    let seen: Seen = Arc::default();
    let h = harness(|b| {
        b.add_job_with(recorder("hourly", seen.clone()), |j| {
            j.with_cron_expression("0 * * * *").with_parameter("p")
        })
    });

    h.engine.start().await.unwrap();
    h.engine
        .runtime_registry()
        .update_schedule("hourly", "*/2 * * * *", false)
        .unwrap();

    h.clock.advance(Duration::from_secs(120));
    wait_for(&h.history, 1).await;
    h.engine.stop().await;

    let seen = seen.lock();
    assert_eq!(seen[0].0, Some(serde_json::json!("p")));
    assert_eq!(seen[0].1, start() + chrono::Duration::minutes(2));
}

// ============================================================================
// Delayed Runs
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delayed_run_fires_when_due() {
    let seen: Seen = Arc::default();
    let h = harness(|b| b);
    h.engine.start().await.unwrap();

    let handle = h
        .engine
        .instant_jobs()
        .run_delayed_job(
            recorder("later", seen.clone()),
            Some(serde_json::json!(42)),
            Duration::from_secs(90),
        )
        .await;

    h.clock.advance(Duration::from_secs(89));
    settle().await;
    assert!(seen.lock().is_empty());

    h.clock.advance(Duration::from_secs(1));
    let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap()
        .unwrap();
    h.engine.stop().await;

    assert_eq!(report.outcome, ExecutionOutcome::Succeeded);
    assert_eq!(report.origin, RunOrigin::Delayed);
    assert_eq!(report.parameter, Some(serde_json::json!(42)));
    assert_eq!(report.due_at, h.clock.now());
}
