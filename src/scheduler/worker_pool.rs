//! Worker pool draining a shared job queue.
//!
//! The [`Manager`] owns a fixed number of worker tasks that pull jobs from
//! a [`JobQueue`], run them, and re-enqueue failures according to a
//! [`RetryPolicy`].
//!
//! # Lifecycle
//!
//! ```text
//! Created ──start──▶ Running ──stop──▶ Stopping ──(last worker exits)──▶ Stopped
//!                        │
//!                        └──finish_all_and_stop──▶ Draining ──(fixed point)──▶ Stopped
//! ```
//!
//! # Drain accounting
//!
//! A worker claims an in-flight slot *before* it dequeues and releases it
//! only after the job's outcome has been applied (including a re-enqueue).
//! A draining worker exits when, after releasing its own claim, it sees no
//! claims left and an empty queue. Because a re-enqueue always happens
//! before the releasing decrement, no worker can observe "zero in flight"
//! while a retried job is on its way back into the queue.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, EngineError, JobFailure};
use crate::metrics::MetricsCollector;

use super::config::Config;
use super::job::{JobHandle, JobResult, QueuedJob};
use super::queue::JobQueue;
use super::retry::{Finalized, RetryDecision, RetryPolicy};

/// Lifecycle state of a [`Manager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    /// `stop()` was called; workers exit after their current job.
    Stopping,
    /// `finish_all_and_stop()` was called; workers run to the drain fixed point.
    Draining,
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Created => write!(f, "created"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopping => write!(f, "stopping"),
            LifecycleState::Draining => write!(f, "draining"),
            LifecycleState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Side channel notified once per finalized job.
///
/// Called on the worker that finalized the job, after the retry decision.
/// Nothing the observer does feeds back into the engine; a panicking
/// observer is logged and ignored.
pub trait JobObserver: Send + Sync {
    fn on_finalized(&self, job: &JobHandle, result: &JobResult, attempts: u32);
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Configured number of workers.
    pub num_workers: usize,
    /// Worker loops that have not exited yet.
    pub live_workers: usize,
    /// Jobs currently executing.
    pub in_flight: usize,
    /// Completed execution attempts, successful or not.
    pub executions: u64,
    /// Jobs finalized as successful.
    pub jobs_succeeded: u64,
    /// Jobs finalized after exhausting their attempts.
    pub jobs_failed: u64,
    /// Failed attempts that were re-enqueued.
    pub retries: u64,
    /// Attempts whose failure was a captured panic.
    pub panics: u64,
    /// Average duration of an execution attempt.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the number of finalized jobs.
    pub fn total_finalized(&self) -> u64 {
        self.jobs_succeeded + self.jobs_failed
    }

    /// Returns the share of finalized jobs that succeeded, as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_finalized();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_succeeded as f64 / total as f64) * 100.0
    }
}

struct SharedPoolStats {
    executions: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    retries: AtomicU64,
    panics: AtomicU64,
    total_duration_us: AtomicU64,
    executing: AtomicUsize,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            executions: AtomicU64::new(0),
            jobs_succeeded: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            panics: AtomicU64::new(0),
            total_duration_us: AtomicU64::new(0),
            executing: AtomicUsize::new(0),
        }
    }

    fn record_execution(&self, result: &JobResult, duration: Duration) {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.total_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::SeqCst);
        if matches!(result, Err(failure) if failure.is_fault()) {
            self.panics.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    fn record_finalized(&self, finalized: Finalized) {
        match finalized {
            Finalized::Succeeded => self.jobs_succeeded.fetch_add(1, Ordering::SeqCst),
            Finalized::Exhausted => self.jobs_failed.fetch_add(1, Ordering::SeqCst),
        };
    }

    fn to_pool_stats(&self, num_workers: usize, live_workers: usize) -> PoolStats {
        let executions = self.executions.load(Ordering::SeqCst);
        let total_duration_us = self.total_duration_us.load(Ordering::SeqCst);

        let average_job_duration = if executions > 0 {
            Duration::from_micros(total_duration_us / executions)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            live_workers,
            in_flight: self.executing.load(Ordering::SeqCst),
            executions,
            jobs_succeeded: self.jobs_succeeded.load(Ordering::SeqCst),
            jobs_failed: self.jobs_failed.load(Ordering::SeqCst),
            retries: self.retries.load(Ordering::SeqCst),
            panics: self.panics.load(Ordering::SeqCst),
            average_job_duration,
        }
    }
}

/// State shared between the manager and its workers.
struct Shared {
    state: watch::Sender<LifecycleState>,
    /// Claims held by workers between "about to dequeue" and "outcome applied".
    claims: AtomicUsize,
    live_workers: AtomicUsize,
    /// Wakes idle workers when the last claim is released.
    settled: Notify,
    fault: Mutex<Option<EngineError>>,
    stats: SharedPoolStats,
    metrics: MetricsCollector,
}

impl Shared {
    fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    fn release_claim(&self) -> Result<usize, EngineError> {
        self.claims
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|previous| previous - 1)
            .map_err(|_| {
                EngineError::AccountingViolation(
                    "released an in-flight claim that was never taken".to_string(),
                )
            })
    }

    fn record_fault(&self, fault: EngineError) {
        error!(error = %fault, "Engine fault");
        let mut slot = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert(fault);
    }

    fn fault(&self) -> Option<EngineError> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Moves a running or draining pool to `Stopping`.
    fn request_stop(&self) -> Option<LifecycleState> {
        let previous = self.state();
        let changed = self.state.send_if_modified(|state| match *state {
            LifecycleState::Running | LifecycleState::Draining => {
                *state = LifecycleState::Stopping;
                true
            }
            _ => false,
        });
        changed.then_some(previous)
    }
}

/// An in-flight claim, released on every exit path including unwind.
struct Claim<'a> {
    shared: &'a Shared,
    released: bool,
}

impl<'a> Claim<'a> {
    fn take(shared: &'a Shared) -> Self {
        shared.claims.fetch_add(1, Ordering::SeqCst);
        Self {
            shared,
            released: false,
        }
    }

    /// Returns the number of claims still held by other workers.
    fn release(mut self) -> Result<usize, EngineError> {
        self.released = true;
        self.shared.release_claim()
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.shared.release_claim();
            self.shared.settled.notify_waiters();
        }
    }
}

/// Bounded-concurrency job execution engine.
///
/// ```rust,ignore
/// let queue = Arc::new(MemoryQueue::new());
/// let manager = Manager::with_max_attempts(queue.clone(), Config::new(50, Duration::from_millis(200))?, 2)?;
/// manager.start()?;
/// queue.enqueue(JobHandle::new(my_job));
/// manager.finish_all_and_stop().await?;
/// assert_eq!(queue.len(), 0);
/// ```
pub struct Manager {
    queue: Arc<dyn JobQueue>,
    config: Config,
    retry: RetryPolicy,
    observer: Option<Arc<dyn JobObserver>>,
    shared: Arc<Shared>,
    worker_handles: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Manager {
    /// Creates a manager with a single attempt per job (no retry).
    pub fn new(queue: Arc<dyn JobQueue>, config: Config) -> Self {
        let (state, _) = watch::channel(LifecycleState::Created);

        Self {
            queue,
            config,
            retry: RetryPolicy::default(),
            observer: None,
            shared: Arc::new(Shared {
                state,
                claims: AtomicUsize::new(0),
                live_workers: AtomicUsize::new(0),
                settled: Notify::new(),
                fault: Mutex::new(None),
                stats: SharedPoolStats::new(),
                metrics: MetricsCollector::new(),
            }),
            worker_handles: Mutex::new(Vec::new()),
        }
    }

    /// Creates a manager allowing up to `max_attempts` executions per job.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidMaxAttempts` if `max_attempts` is zero.
    pub fn with_max_attempts(
        queue: Arc<dyn JobQueue>,
        config: Config,
        max_attempts: u32,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(queue, config).with_retry_policy(RetryPolicy::new(max_attempts)?))
    }

    /// Sets the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the observer notified on every finalized job.
    pub fn with_observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Spawns `max_parallel_job_execute` workers on the current tokio runtime.
    ///
    /// Allowed once per manager. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AlreadyStarted` if the manager has left the
    /// `Created` state, whether it is running or already stopped.
    pub fn start(&self) -> Result<(), EngineError> {
        let started = self.shared.state.send_if_modified(|state| {
            if *state == LifecycleState::Created {
                *state = LifecycleState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(EngineError::AlreadyStarted);
        }

        let num_workers = self.config.max_parallel_job_execute();
        let mut handles = self
            .worker_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        for i in 0..num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                queue: Arc::clone(&self.queue),
                retry: self.retry,
                observer: self.observer.clone(),
                sleep_after_check: self.config.sleep_after_check(),
                shared: Arc::clone(&self.shared),
            };

            self.shared.live_workers.fetch_add(1, Ordering::SeqCst);
            self.shared.metrics.inc_live_workers();

            let id = worker.id.clone();
            let handle = tokio::spawn(worker.run());
            handles.push((id, handle));
        }

        info!(
            num_workers = num_workers,
            queue = self.queue.name(),
            max_attempts = self.retry.max_attempts(),
            "Worker pool started"
        );

        Ok(())
    }

    /// Requests an immediate stop without waiting.
    ///
    /// Workers finish the job in their hand (applying its outcome, which
    /// may re-enqueue it) and then exit without dequeuing again. Jobs left
    /// in the queue stay there. Calling `stop` again is a no-op; on a
    /// manager that was never started it moves straight to `Stopped`.
    pub fn stop(&self) {
        let never_started = self.shared.state.send_if_modified(|state| {
            if *state == LifecycleState::Created {
                *state = LifecycleState::Stopped;
                true
            } else {
                false
            }
        });
        let previous = if never_started {
            Some(LifecycleState::Created)
        } else {
            self.shared.request_stop()
        };

        if let Some(previous) = previous {
            let pending = self.queue.len();
            self.shared
                .metrics
                .update_queue_depth(self.queue.name(), pending);
            info!(from = %previous, pending = pending, "Worker pool stop requested");
        }
    }

    /// Drains the queue and stops.
    ///
    /// Resolves once the queue is empty and no job is in flight, counting
    /// every job re-enqueued by the retry policy along the way. Jobs added
    /// by external producers after this call have no ordering guarantee
    /// relative to completion. If `stop` was called first, this waits for
    /// the workers to exit and leaves the queue as it is.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotStarted` if the manager was never started,
    /// or the first engine fault observed by a worker. A fault stops the
    /// pool, and every caller of this method sees it.
    pub async fn finish_all_and_stop(&self) -> Result<(), EngineError> {
        let previous = self.shared.state();
        let changed = self.shared.state.send_if_modified(|state| {
            if *state == LifecycleState::Running {
                *state = LifecycleState::Draining;
                true
            } else {
                false
            }
        });

        if previous == LifecycleState::Created && !changed {
            return Err(EngineError::NotStarted);
        }

        if changed {
            info!(pending = self.queue.len(), "Draining worker pool");
        }

        let handles = std::mem::take(
            &mut *self
                .worker_handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        for (worker_id, handle) in handles {
            if let Err(e) = handle.await {
                let message = if e.is_panic() {
                    panic_message(e.into_panic().as_ref())
                } else {
                    e.to_string()
                };
                self.shared.record_fault(EngineError::WorkerPanicked { worker_id, message });
            }
        }

        // Another caller may own the handles; wait on the state instead.
        let mut state_rx = self.shared.state.subscribe();
        let _ = state_rx
            .wait_for(|state| *state == LifecycleState::Stopped)
            .await;

        match self.shared.fault() {
            Some(fault) => Err(fault),
            None => {
                info!(remaining = self.queue.len(), "Worker pool stopped");
                Ok(())
            }
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.shared.state()
    }

    /// Subscribes to lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.shared.state.subscribe()
    }

    /// Returns whether workers are accepting new jobs from the queue.
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            LifecycleState::Running | LifecycleState::Draining
        )
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.shared.stats.to_pool_stats(
            self.config.max_parallel_job_execute(),
            self.shared.live_workers.load(Ordering::SeqCst),
        )
    }

    /// Returns a reference to the job queue.
    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        // Spawned workers hold their own Arc<Shared>; without this they
        // would keep polling after the manager is gone.
        self.stop();
    }
}

/// Decrements the live-worker count when a worker exits, even by panic.
struct LiveWorkerGuard {
    shared: Arc<Shared>,
}

impl Drop for LiveWorkerGuard {
    fn drop(&mut self) {
        self.shared.metrics.dec_live_workers();
        if self.shared.live_workers.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.state.send_replace(LifecycleState::Stopped);
        }
        self.shared.settled.notify_waiters();
    }
}

/// A single worker loop.
struct Worker {
    id: String,
    queue: Arc<dyn JobQueue>,
    retry: RetryPolicy,
    observer: Option<Arc<dyn JobObserver>>,
    sleep_after_check: Duration,
    shared: Arc<Shared>,
}

impl Worker {
    async fn run(self) {
        let _guard = LiveWorkerGuard {
            shared: Arc::clone(&self.shared),
        };

        debug!(worker_id = %self.id, "Worker started");

        // A job's own panic is caught in process_job; anything landing here
        // came from the queue or the engine itself.
        if let Err(panic) = AssertUnwindSafe(self.work()).catch_unwind().await {
            self.shared.record_fault(EngineError::WorkerPanicked {
                worker_id: self.id.clone(),
                message: panic_message(panic.as_ref()),
            });
            self.shared.request_stop();
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }

    async fn work(&self) {
        let mut state_rx = self.shared.state.subscribe();

        loop {
            let state = *state_rx.borrow_and_update();
            if !matches!(state, LifecycleState::Running | LifecycleState::Draining) {
                break;
            }

            let claim = Claim::take(&self.shared);

            if let Some(entry) = self.queue.dequeue() {
                self.process_job(entry, claim).await;
                continue;
            }

            let remaining = match claim.release() {
                Ok(remaining) => remaining,
                Err(fault) => {
                    self.shared.record_fault(fault);
                    self.shared.request_stop();
                    break;
                }
            };

            if self.shared.state() == LifecycleState::Draining
                && remaining == 0
                && self.queue.is_empty()
            {
                debug!(worker_id = %self.id, "Drain complete, worker exiting");
                self.shared.settled.notify_waiters();
                break;
            }

            self.idle(&mut state_rx).await;
        }
    }

    /// Backs off after an empty poll, waking early on a state change or
    /// when the last in-flight job settles.
    async fn idle(&self, state_rx: &mut watch::Receiver<LifecycleState>) {
        let settled = self.shared.settled.notified();
        tokio::select! {
            _ = tokio::time::sleep(self.sleep_after_check) => {}
            _ = settled => {}
            _ = state_rx.changed() => {}
        }
    }

    async fn process_job(&self, mut entry: QueuedJob, claim: Claim<'_>) {
        let attempt = entry.begin_attempt();
        let job = entry.job.clone();
        let start_time = Instant::now();

        debug!(
            worker_id = %self.id,
            job_id = %job.id(),
            attempt = attempt,
            "Processing job"
        );

        self.shared.stats.executing.fetch_add(1, Ordering::SeqCst);
        self.shared.metrics.inc_jobs_in_progress();

        let result = match AssertUnwindSafe(job.run()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(JobFailure::Panicked {
                message: panic_message(panic.as_ref()),
            }),
        };
        let duration = start_time.elapsed();
        let total_run = job.record_run();

        self.shared.stats.executing.fetch_sub(1, Ordering::SeqCst);
        self.shared.metrics.dec_jobs_in_progress();
        self.shared.stats.record_execution(&result, duration);
        self.shared
            .metrics
            .record_execution(outcome_label(&result), duration);

        match self.retry.decide(&result, attempt) {
            RetryDecision::Requeue => {
                if let Err(ref failure) = result {
                    warn!(
                        worker_id = %self.id,
                        job_id = %job.id(),
                        attempt = attempt,
                        remaining_attempts = self.retry.remaining_attempts(attempt),
                        error = %failure,
                        "Job failed, requeueing for retry"
                    );
                }
                self.shared.stats.record_retry();
                self.shared.metrics.record_retry();
                self.queue.requeue(entry);
            }
            RetryDecision::Finalize(finalized) => {
                match &result {
                    Ok(_) => debug!(
                        worker_id = %self.id,
                        job_id = %job.id(),
                        duration_ms = duration.as_millis() as u64,
                        total_run = total_run,
                        "Job completed successfully"
                    ),
                    Err(failure) => warn!(
                        worker_id = %self.id,
                        job_id = %job.id(),
                        attempts = attempt,
                        error = %failure,
                        "Job failed, attempts exhausted"
                    ),
                }
                self.shared.stats.record_finalized(finalized);
                self.notify_observer(&job, &result, attempt);
            }
        }

        match claim.release() {
            Ok(0) => self.shared.settled.notify_waiters(),
            Ok(_) => {}
            Err(fault) => {
                self.shared.record_fault(fault);
                self.shared.request_stop();
            }
        }
    }

    fn notify_observer(&self, job: &JobHandle, result: &JobResult, attempts: u32) {
        let Some(observer) = &self.observer else {
            return;
        };

        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            observer.on_finalized(job, result, attempts)
        }));
        if let Err(panic) = outcome {
            error!(
                worker_id = %self.id,
                job_id = %job.id(),
                error = %panic_message(panic.as_ref()),
                "Job observer panicked"
            );
        }
    }
}

fn outcome_label(result: &JobResult) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(failure) if failure.is_fault() => "panic",
        Err(_) => "failure",
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
