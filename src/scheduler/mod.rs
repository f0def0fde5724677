//! Bounded-concurrency job execution engine.
//!
//! This module provides the in-process execution core:
//!
//! - **JobQueue**: Thread-safe FIFO shared by producers and workers
//! - **Manager**: Fixed pool of workers draining the queue
//! - **RetryPolicy**: Re-enqueue or finalize after each attempt
//! - **Job**: The unit of work, plus its run counter and queue entry
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │  Producers   │
//!                      │ (any thread) │
//!                      └──────┬───────┘
//!                             │ enqueue
//!                      ┌──────▼───────┐
//!                 ┌───▶│   JobQueue   │
//!                 │    └──────┬───────┘
//!       requeue   │           │ dequeue
//!   (retry left)  │   ┌───────┼───────────────────┐
//!                 │   │       │                   │
//!                 │   ▼       ▼                   ▼
//!                 │ ┌─────────┐ ┌─────────┐  ┌─────────┐
//!                 └─│ worker-0│ │ worker-1│  │ worker-N│
//!                   └─────────┘ └─────────┘  └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use jobmill::scheduler::{Config, FnJob, JobHandle, JobOk, JobQueue, Manager, MemoryQueue};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let queue = Arc::new(MemoryQueue::new());
//! let config = Config::new(50, Duration::from_millis(200))?;
//! let manager = Manager::with_max_attempts(queue.clone(), config, 3)?;
//! manager.start()?;
//!
//! let job = JobHandle::new(FnJob::new("hello", || async { Ok(JobOk::new()) }));
//! queue.enqueue(job.clone());
//!
//! manager.finish_all_and_stop().await?;
//! assert_eq!(job.total_run(), 1);
//! ```
//!
//! # Guarantees
//!
//! - **Bounded concurrency**: at most `max_parallel_job_execute` jobs run at once
//! - **Fault containment**: a failing or panicking job never takes down its worker
//! - **Complete drain**: `finish_all_and_stop` waits out every retry

pub mod config;
pub mod job;
pub mod queue;
pub mod retry;
pub mod worker_pool;

// Re-export main types for convenience
pub use config::{Config, ENV_MAX_PARALLEL_JOBS, ENV_SLEEP_AFTER_CHECK_MS};
pub use job::{FnJob, Job, JobHandle, JobOk, JobResult, QueuedJob};
pub use queue::{JobQueue, MemoryQueue, DEFAULT_QUEUE_NAME};
pub use retry::{Finalized, RetryDecision, RetryPolicy, ENV_MAX_ATTEMPTS};
pub use worker_pool::{JobObserver, LifecycleState, Manager, PoolStats};
