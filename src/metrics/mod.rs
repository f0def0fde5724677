//! Metrics module for Prometheus-based monitoring.
//!
//! Collects engine metrics (executions, retries, queue depth, in-flight
//! jobs, live workers) and recurring-scheduler result events.
//!
//! # Example
//!
//! ```ignore
//! use jobmill::metrics::{init_metrics, export_metrics};
//!
//! // Initialize metrics on startup
//! init_metrics().expect("Failed to initialize metrics");
//!
//! // ... run a manager ...
//!
//! // Export metrics for Prometheus scraping
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use self::prometheus::{export_metrics, init_metrics};

pub use self::prometheus::{
    CRON_EVENTS_TOTAL, EXECUTIONS_TOTAL, JOBS_IN_PROGRESS, JOB_DURATION, LIVE_WORKERS,
    QUEUE_DEPTH, REGISTRY, RETRIES_TOTAL,
};
