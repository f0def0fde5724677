//! Metric recording for the engine and the recurring scheduler.
//!
//! `MetricsCollector` wraps the raw Prometheus metrics with methods named
//! after engine events. Every method is a no-op until `init_metrics()` has
//! been called, so the engine records unconditionally.

use std::time::Duration;

use super::prometheus::{
    CRON_EVENTS_TOTAL, EXECUTIONS_TOTAL, JOBS_IN_PROGRESS, JOB_DURATION, LIVE_WORKERS,
    QUEUE_DEPTH, RETRIES_TOTAL,
};

/// Metrics collector for recording jobmill operational metrics.
///
/// # Example
///
/// ```ignore
/// use jobmill::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
/// collector.record_execution("success", Duration::from_millis(20));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record one execution attempt.
    ///
    /// `outcome` is one of "success", "failure" or "panic".
    pub fn record_execution(&self, outcome: &str, duration: Duration) {
        if let Some(executions) = EXECUTIONS_TOTAL.get() {
            executions.with_label_values(&[outcome]).inc();
        }

        if let Some(job_duration) = JOB_DURATION.get() {
            job_duration.observe(duration.as_secs_f64());
        }

        tracing::trace!(
            outcome = outcome,
            duration_ms = duration.as_millis() as u64,
            "Recorded execution metric"
        );
    }

    /// Record a failed attempt being re-enqueued.
    pub fn record_retry(&self) {
        if let Some(retries) = RETRIES_TOTAL.get() {
            retries.inc();
        }
    }

    /// Update the resident job count for a queue.
    pub fn update_queue_depth(&self, queue_name: &str, depth: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth
                .with_label_values(&[queue_name])
                .set(depth as f64);
        }
    }

    pub fn inc_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.inc();
        }
    }

    pub fn dec_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.dec();
        }
    }

    pub fn inc_live_workers(&self) {
        if let Some(live_workers) = LIVE_WORKERS.get() {
            live_workers.inc();
        }
    }

    pub fn dec_live_workers(&self) {
        if let Some(live_workers) = LIVE_WORKERS.get() {
            live_workers.dec();
        }
    }

    /// Record a result event published by the recurring scheduler.
    pub fn record_cron_event(&self, job_name: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };

        if let Some(cron_events) = CRON_EVENTS_TOTAL.get() {
            cron_events.with_label_values(&[job_name, outcome]).inc();
        }

        tracing::trace!(job = job_name, outcome = outcome, "Recorded cron event metric");
    }
}
