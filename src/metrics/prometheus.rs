//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by jobmill and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all jobmill metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total execution attempts, labeled by outcome (success, failure, panic).
pub static EXECUTIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Duration of a single execution attempt in seconds.
pub static JOB_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Total number of failed attempts that were re-enqueued.
pub static RETRIES_TOTAL: OnceLock<prometheus::Counter> = OnceLock::new();

/// Number of jobs resident in a queue, labeled by queue name.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of jobs currently being executed.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Number of worker loops alive.
pub static LIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Recurring-job result events, labeled by job name and outcome.
pub static CRON_EVENTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls build a fresh registry but leave the
/// already-stored statics untouched, so recording keeps working.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let executions_total = CounterVec::new(
        Opts::new("jobmill_executions_total", "Total job execution attempts"),
        &["outcome"],
    )?;

    let job_duration = Histogram::with_opts(
        HistogramOpts::new(
            "jobmill_job_duration_seconds",
            "Duration of a single job execution attempt in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
    )?;

    let retries_total = prometheus::Counter::new(
        "jobmill_retries_total",
        "Failed attempts re-enqueued for another try",
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("jobmill_queue_depth", "Number of jobs resident in the queue"),
        &["queue_name"],
    )?;

    let jobs_in_progress = Gauge::new(
        "jobmill_jobs_in_progress",
        "Number of jobs currently being executed",
    )?;

    let live_workers = Gauge::new("jobmill_live_workers", "Number of worker loops alive")?;

    let cron_events_total = CounterVec::new(
        Opts::new(
            "jobmill_cron_events_total",
            "Result events published by the recurring scheduler",
        ),
        &["job", "outcome"],
    )?;

    registry.register(Box::new(executions_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(retries_total.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(live_workers.clone()))?;
    registry.register(Box::new(cron_events_total.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = EXECUTIONS_TOTAL.set(executions_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = RETRIES_TOTAL.set(retries_total);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = LIVE_WORKERS.set(live_workers);
    let _ = CRON_EVENTS_TOTAL.set(cron_events_total);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, the
/// returned string is a `#` comment describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();

        if let Some(executions) = EXECUTIONS_TOTAL.get() {
            executions.with_label_values(&["success"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.is_empty());
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("jobmill_executions_total"));
    }
}
