//! jobmill: Bounded-concurrency job execution engine.
//!
//! This library runs jobs from a shared FIFO queue on a fixed pool of
//! worker tasks, re-enqueues failed jobs up to a retry limit, and can
//! drain the queue to completion. A recurring scheduler built on the same
//! engine re-runs registered jobs on an interval.

// Core modules
pub mod cli;
pub mod cron;
pub mod error;
pub mod metrics;
pub mod scheduler;

// Re-export commonly used types
pub use cron::{CronEvent, CronOutcome, CronScheduler};
pub use error::{ConfigError, CronError, EngineError, JobFailure};
pub use scheduler::{
    Config, FnJob, Job, JobHandle, JobObserver, JobOk, JobQueue, JobResult, LifecycleState,
    Manager, MemoryQueue, PoolStats, RetryPolicy,
};
