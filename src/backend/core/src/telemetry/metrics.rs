//! Job engine metrics.
//!
//! Recorded through the `metrics` facade. No exporter is installed here; a
//! host that wants Prometheus (or anything else) installs its own recorder
//! and calls [`describe_metrics`] once.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

pub const RUNS_ENQUEUED_TOTAL: &str = "cadence_runs_enqueued_total";
pub const RUNS_FINISHED_TOTAL: &str = "cadence_runs_finished_total";
pub const RUN_RETRIES_TOTAL: &str = "cadence_run_retries_total";
pub const RUN_DURATION_SECONDS: &str = "cadence_run_duration_seconds";
pub const EXECUTING_RUNS: &str = "cadence_executing_runs";
pub const QUEUE_DEPTH: &str = "cadence_queue_depth";

/// Register descriptions for every engine metric.
pub fn describe_metrics() {
    describe_counter!(RUNS_ENQUEUED_TOTAL, "Runs placed on the dispatch queue");
    describe_counter!(
        RUNS_FINISHED_TOTAL,
        "Runs that reached a terminal outcome, by handler and outcome"
    );
    describe_counter!(RUN_RETRIES_TOTAL, "Retry attempts scheduled");
    describe_histogram!(
        RUN_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Wall time from first attempt to terminal outcome"
    );
    describe_gauge!(EXECUTING_RUNS, "Handlers currently executing");
    describe_gauge!(QUEUE_DEPTH, "Runs waiting on the dispatch queue");
}

/// Recording helpers used by the engine components.
pub struct JobMetrics;

impl JobMetrics {
    pub fn run_enqueued(group: &str) {
        counter!(RUNS_ENQUEUED_TOTAL, "group" => group.to_string()).increment(1);
    }

    pub fn run_finished(job: &str, outcome: &'static str, duration: Duration) {
        counter!(
            RUNS_FINISHED_TOTAL,
            "job" => job.to_string(),
            "outcome" => outcome,
        )
        .increment(1);
        histogram!(RUN_DURATION_SECONDS, "job" => job.to_string()).record(duration.as_secs_f64());
    }

    pub fn retry_scheduled(job: &str) {
        counter!(RUN_RETRIES_TOTAL, "job" => job.to_string()).increment(1);
    }

    pub fn executing(count: usize) {
        gauge!(EXECUTING_RUNS).set(count as f64);
    }

    pub fn queue_depth(depth: usize) {
        gauge!(QUEUE_DEPTH).set(depth as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        describe_metrics();
        JobMetrics::run_enqueued("default");
        JobMetrics::run_finished("report", "succeeded", Duration::from_millis(5));
        JobMetrics::retry_scheduled("report");
        JobMetrics::executing(3);
        JobMetrics::queue_depth(0);
    }
}
