//! Metrics for job queue monitoring.
//!
//! Recorded through the `metrics` facade; no exporter is installed here.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Metric names for the job queue.
pub mod names {
    /// Total jobs enqueued.
    pub const JOBS_ENQUEUED_TOTAL: &str = "herald_jobs_enqueued_total";
    /// Total enqueue attempts that failed because the broker was unavailable.
    pub const JOBS_ENQUEUE_FAILED_TOTAL: &str = "herald_jobs_enqueue_failed_total";
    /// Total attempts started.
    pub const JOBS_STARTED_TOTAL: &str = "herald_jobs_started_total";
    /// Total jobs finished successfully.
    pub const JOBS_FINISHED_TOTAL: &str = "herald_jobs_finished_total";
    /// Total failed attempts scheduled for retry.
    pub const JOBS_RETRIED_TOTAL: &str = "herald_jobs_retried_total";
    /// Total jobs failed permanently.
    pub const JOBS_FAILED_TOTAL: &str = "herald_jobs_failed_total";
    /// Total attempts that exceeded the execution window.
    pub const JOBS_TIMED_OUT_TOTAL: &str = "herald_jobs_timed_out_total";
    /// Total in-flight jobs returned to the queue from dead workers.
    pub const JOBS_RECOVERED_TOTAL: &str = "herald_jobs_recovered_total";

    /// Attempt duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "herald_jobs_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total number of jobs enqueued");
    describe_counter!(
        names::JOBS_ENQUEUE_FAILED_TOTAL,
        "Total number of enqueue calls that failed"
    );
    describe_counter!(names::JOBS_STARTED_TOTAL, "Total number of attempts started");
    describe_counter!(
        names::JOBS_FINISHED_TOTAL,
        "Total number of jobs finished successfully"
    );
    describe_counter!(
        names::JOBS_RETRIED_TOTAL,
        "Total number of failed attempts scheduled for retry"
    );
    describe_counter!(
        names::JOBS_FAILED_TOTAL,
        "Total number of jobs that failed permanently"
    );
    describe_counter!(
        names::JOBS_TIMED_OUT_TOTAL,
        "Total number of attempts that timed out"
    );
    describe_counter!(
        names::JOBS_RECOVERED_TOTAL,
        "Total number of jobs recovered from dead workers"
    );
    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Job attempt duration in seconds"
    );
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job enqueued.
    pub fn job_enqueued(queue: &str, job_name: &str) {
        counter!(
            names::JOBS_ENQUEUED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }

    /// Record an enqueue that did not reach the broker.
    pub fn enqueue_failed(queue: &str, job_name: &str) {
        counter!(
            names::JOBS_ENQUEUE_FAILED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }

    /// Record an attempt started.
    pub fn job_started(queue: &str, job_name: &str) {
        counter!(
            names::JOBS_STARTED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }

    /// Record a job finished.
    pub fn job_finished(queue: &str, job_name: &str, duration: Duration) {
        counter!(
            names::JOBS_FINISHED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
        Self::record_duration(queue, job_name, "finished", duration);
    }

    /// Record a failed attempt that will be retried.
    pub fn job_retried(queue: &str, job_name: &str, attempt: u32, duration: Duration) {
        counter!(
            names::JOBS_RETRIED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "attempt" => attempt.to_string()
        )
        .increment(1);
        Self::record_duration(queue, job_name, "retrying", duration);
    }

    /// Record a job failed permanently.
    pub fn job_failed(queue: &str, job_name: &str, error_kind: &str, duration: Duration) {
        counter!(
            names::JOBS_FAILED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "error_type" => error_kind.to_string()
        )
        .increment(1);
        Self::record_duration(queue, job_name, "failed", duration);
    }

    /// Record a job timeout.
    pub fn job_timed_out(queue: &str, job_name: &str) {
        counter!(
            names::JOBS_TIMED_OUT_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }

    /// Record jobs recovered from dead workers.
    pub fn jobs_recovered(queue: &str, count: usize) {
        counter!(
            names::JOBS_RECOVERED_TOTAL,
            "queue" => queue.to_string()
        )
        .increment(count as u64);
    }

    fn record_duration(queue: &str, job_name: &str, status: &'static str, duration: Duration) {
        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "status" => status
        )
        .record(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // No recorder installed; calls must still be harmless
        register_metrics();
    }

    #[test]
    fn test_job_metrics() {
        JobMetrics::job_enqueued("notifications", "send_notification");
        JobMetrics::job_started("notifications", "send_notification");
        JobMetrics::job_finished("notifications", "send_notification", Duration::from_secs(1));
        JobMetrics::job_failed("notifications", "send_notification", "timeout", Duration::from_secs(5));
        JobMetrics::jobs_recovered("notifications", 2);
    }
}
