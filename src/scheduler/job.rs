//! Job definitions for the engine.
//!
//! This module defines the core job types used by the worker pool:
//!
//! - `Job`: The capability a unit of work exposes (identity and `run`)
//! - `JobResult`: Typed outcome of a single run
//! - `JobHandle`: Shared reference to a job plus its `total_run` counter
//! - `QueuedJob`: Queue entry carrying the engine-owned attempt counter
//! - `FnJob`: A job built from an id and an async closure

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobFailure;

/// Successful outcome of a job run, with an optional result payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOk {
    /// Free-form detail reported by the job.
    #[serde(default)]
    pub detail: Option<String>,
}

impl JobOk {
    /// Creates a successful outcome without a payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a successful outcome carrying a detail message.
    pub fn with_detail(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
        }
    }
}

/// Outcome of a single execution attempt.
pub type JobResult = Result<JobOk, JobFailure>;

/// A unit of work executed by the worker pool.
///
/// `run` may be called from any worker task but never concurrently with
/// itself: a job is owned either by the queue or by exactly one worker.
/// Expected failures are returned as `Err(JobFailure)`; a panic inside
/// `run` is caught by the worker and treated as a failure as well.
#[async_trait]
pub trait Job: Send + Sync {
    /// Caller-assigned identity. Not required to be unique.
    fn id(&self) -> &str;

    /// Executes the work once.
    async fn run(&self) -> JobResult;
}

struct JobCell {
    job: Box<dyn Job>,
    total_run: AtomicU32,
}

/// Shared handle to an enqueued job.
///
/// The producer keeps a clone to read `total_run` after the job has left
/// the engine; the queue and the executing worker hold the other clones.
#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<JobCell>,
}

impl JobHandle {
    /// Wraps a job in a new handle with a zeroed run counter.
    pub fn new<J: Job + 'static>(job: J) -> Self {
        Self {
            inner: Arc::new(JobCell {
                job: Box::new(job),
                total_run: AtomicU32::new(0),
            }),
        }
    }

    /// Returns the job's identity.
    pub fn id(&self) -> &str {
        self.inner.job.id()
    }

    /// Number of completed execution attempts, successful or not.
    pub fn total_run(&self) -> u32 {
        self.inner.total_run.load(Ordering::SeqCst)
    }

    /// Returns whether two handles refer to the same job instance.
    pub fn ptr_eq(&self, other: &JobHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) async fn run(&self) -> JobResult {
        self.inner.job.run().await
    }

    /// Only the worker currently holding the job calls this.
    pub(crate) fn record_run(&self) -> u32 {
        self.inner.total_run.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id())
            .field("total_run", &self.total_run())
            .finish()
    }
}

/// A job as it sits in the queue.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    /// The job itself.
    pub job: JobHandle,
    /// Execution attempts made so far by the engine.
    pub attempts: u32,
    /// When this entry was (re-)enqueued.
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedJob {
    /// Creates a fresh entry with no attempts recorded.
    pub fn new(job: JobHandle) -> Self {
        Self {
            job,
            attempts: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// Marks the start of another attempt and returns its 1-based number.
    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Refreshes the enqueue timestamp before going back to the tail.
    pub(crate) fn touch(&mut self) {
        self.enqueued_at = Utc::now();
    }

    /// How long the entry has been waiting since it was last enqueued.
    pub fn waiting_for(&self) -> chrono::Duration {
        Utc::now() - self.enqueued_at
    }
}

/// A job built from an id and an async closure.
///
/// ```rust,ignore
/// let job = FnJob::new("report", || async { Ok(JobOk::new()) });
/// queue.enqueue(JobHandle::new(job));
/// ```
pub struct FnJob<F> {
    id: String,
    action: F,
}

impl<F, Fut> FnJob<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    /// Creates a job that calls `action` on every run.
    pub fn new(id: impl Into<String>, action: F) -> Self {
        Self {
            id: id.into(),
            action,
        }
    }
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self) -> JobResult {
        (self.action)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticJob {
        id: String,
        succeed: bool,
    }

    #[async_trait]
    impl Job for StaticJob {
        fn id(&self) -> &str {
            &self.id
        }

        async fn run(&self) -> JobResult {
            if self.succeed {
                Ok(JobOk::with_detail("done"))
            } else {
                Err(JobFailure::failed("nope"))
            }
        }
    }

    #[test]
    fn test_job_ok_constructors() {
        assert_eq!(JobOk::new().detail, None);
        assert_eq!(JobOk::with_detail("x").detail, Some("x".to_string()));
    }

    #[tokio::test]
    async fn test_handle_runs_job() {
        let ok = JobHandle::new(StaticJob {
            id: "ok".to_string(),
            succeed: true,
        });
        let bad = JobHandle::new(StaticJob {
            id: "bad".to_string(),
            succeed: false,
        });

        assert_eq!(ok.id(), "ok");
        assert_eq!(ok.run().await, Ok(JobOk::with_detail("done")));
        assert_eq!(bad.run().await, Err(JobFailure::failed("nope")));
        // Running does not touch the counter; only the worker records runs.
        assert_eq!(ok.total_run(), 0);
    }

    #[test]
    fn test_clones_share_counter() {
        let handle = JobHandle::new(StaticJob {
            id: "shared".to_string(),
            succeed: true,
        });
        let clone = handle.clone();

        assert_eq!(clone.record_run(), 1);
        assert_eq!(clone.record_run(), 2);
        assert_eq!(handle.total_run(), 2);
        assert!(handle.ptr_eq(&clone));

        let other = JobHandle::new(StaticJob {
            id: "shared".to_string(),
            succeed: true,
        });
        assert!(!handle.ptr_eq(&other));
    }

    #[test]
    fn test_queued_job_attempts() {
        let handle = JobHandle::new(StaticJob {
            id: "q".to_string(),
            succeed: true,
        });
        let mut entry = QueuedJob::new(handle);

        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.begin_attempt(), 1);
        assert_eq!(entry.begin_attempt(), 2);
        assert!(entry.waiting_for() >= chrono::Duration::zero());
    }

    #[tokio::test]
    async fn test_fn_job() {
        let job = FnJob::new("closure", || async { Ok(JobOk::with_detail("ran")) });
        assert_eq!(job.id(), "closure");
        assert_eq!(job.run().await, Ok(JobOk::with_detail("ran")));
    }

    #[test]
    fn test_handle_debug() {
        let handle = JobHandle::new(FnJob::new("dbg", || async { Ok(JobOk::new()) }));
        let rendered = format!("{:?}", handle);
        assert!(rendered.contains("dbg"));
        assert!(rendered.contains("total_run"));
    }
}
