//! Recurring jobs on top of the worker pool.
//!
//! A [`CronScheduler`] owns its own queue and [`Manager`]. Each registered
//! job runs once, publishes a [`CronEvent`], sleeps its interval, and is
//! enqueued again as a fresh job instance. Only one run of a given job is
//! ever outstanding.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, CronError};
use crate::metrics::MetricsCollector;
use crate::scheduler::{
    Config, Job, JobHandle, JobObserver, JobQueue, JobResult, LifecycleState, Manager,
    MemoryQueue, PoolStats,
};

use super::event::CronEvent;

/// Events buffered per subscriber before the slowest one starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Largest event buffer accepted by [`CronScheduler::with_event_capacity`].
pub const MAX_EVENT_CHANNEL_CAPACITY: usize = usize::MAX / 2;

const CRON_QUEUE_NAME: &str = "cron";

type CronAction = Arc<dyn Fn() -> BoxFuture<'static, JobResult> + Send + Sync>;

struct CronEntry {
    name: String,
    every: Duration,
    action: CronAction,
    runs: AtomicU64,
    active: AtomicBool,
}

/// One run of a recurring job, as seen by the worker pool.
struct CronRun {
    entry: Arc<CronEntry>,
}

#[async_trait]
impl Job for CronRun {
    fn id(&self) -> &str {
        &self.entry.name
    }

    async fn run(&self) -> JobResult {
        (self.entry.action)().await
    }
}

struct Outstanding {
    handle: JobHandle,
    entry: Arc<CronEntry>,
    run_number: u64,
}

struct CronRegistry {
    entries: RwLock<HashMap<String, Arc<CronEntry>>>,
    outstanding: Mutex<Vec<Outstanding>>,
    queue: Arc<MemoryQueue>,
    events: broadcast::Sender<CronEvent>,
    started: AtomicBool,
    shutdown: watch::Sender<bool>,
    metrics: MetricsCollector,
}

impl CronRegistry {
    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn enqueue_run(&self, entry: &Arc<CronEntry>) {
        let run_number = entry.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = JobHandle::new(CronRun {
            entry: Arc::clone(entry),
        });

        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Outstanding {
                handle: handle.clone(),
                entry: Arc::clone(entry),
                run_number,
            });
        self.queue.enqueue(handle);

        debug!(job = %entry.name, run_number = run_number, "Recurring job enqueued");
    }

    fn take_outstanding(&self, job: &JobHandle) -> Option<Outstanding> {
        let mut outstanding = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let index = outstanding.iter().position(|o| o.handle.ptr_eq(job))?;
        Some(outstanding.swap_remove(index))
    }

    fn should_reschedule(&self, entry: &CronEntry) -> bool {
        entry.active.load(Ordering::SeqCst) && !self.is_shut_down()
    }
}

/// Observer hook the manager calls when a run finalizes.
struct Rescheduler {
    registry: Arc<CronRegistry>,
}

impl JobObserver for Rescheduler {
    fn on_finalized(&self, job: &JobHandle, result: &JobResult, _attempts: u32) {
        let Some(finished) = self.registry.take_outstanding(job) else {
            warn!(job = %job.id(), "Finalized run is not tracked by the cron scheduler");
            return;
        };
        let entry = finished.entry;

        let event = CronEvent::new(entry.name.clone(), finished.run_number, result);
        self.registry
            .metrics
            .record_cron_event(&entry.name, event.is_success());
        if self.registry.events.send(event).is_err() {
            debug!(job = %entry.name, "No subscribers for cron event");
        }

        if !self.registry.should_reschedule(&entry) {
            debug!(job = %entry.name, "Recurring job not rescheduled");
            return;
        }

        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let mut shutdown = registry.shutdown.subscribe();
            if *shutdown.borrow_and_update() {
                return;
            }
            // The flag only ever flips to true, so any change means shutdown.
            tokio::select! {
                _ = tokio::time::sleep(entry.every) => {}
                _ = shutdown.changed() => return,
            }

            if registry.should_reschedule(&entry) {
                registry.enqueue_run(&entry);
            }
        });
    }
}

/// Recurring job scheduler.
///
/// ```rust,ignore
/// let scheduler = CronScheduler::new(Config::default())?;
/// let mut events = scheduler.subscribe();
/// scheduler.register("heartbeat", Duration::from_secs(1), || async { Ok(JobOk::new()) })?;
/// scheduler.start()?;
///
/// while let Ok(event) = events.recv().await {
///     println!("{} #{}: {:?}", event.job_name, event.run_number, event.outcome);
/// }
/// ```
pub struct CronScheduler {
    registry: Arc<CronRegistry>,
    manager: Manager,
}

impl CronScheduler {
    /// Creates a scheduler running at most `config.max_parallel_job_execute()`
    /// recurring jobs at once, buffering [`EVENT_CHANNEL_CAPACITY`] events
    /// per subscriber.
    pub fn new(config: Config) -> Result<Self, CronError> {
        Self::with_event_capacity(config, EVENT_CHANNEL_CAPACITY)
    }

    /// Same as [`CronScheduler::new`] with a custom per-subscriber event
    /// buffer.
    ///
    /// # Errors
    ///
    /// Returns `CronError::Config` if `event_capacity` is zero or above
    /// [`MAX_EVENT_CHANNEL_CAPACITY`].
    pub fn with_event_capacity(config: Config, event_capacity: usize) -> Result<Self, CronError> {
        if event_capacity == 0 || event_capacity > MAX_EVENT_CHANNEL_CAPACITY {
            return Err(ConfigError::InvalidValue {
                key: "event_capacity".to_string(),
                message: format!(
                    "must be between 1 and {}, got {}",
                    MAX_EVENT_CHANNEL_CAPACITY, event_capacity
                ),
            }
            .into());
        }

        let queue = Arc::new(MemoryQueue::named(CRON_QUEUE_NAME));
        let (events, _) = broadcast::channel(event_capacity);
        let (shutdown, _) = watch::channel(false);

        let registry = Arc::new(CronRegistry {
            entries: RwLock::new(HashMap::new()),
            outstanding: Mutex::new(Vec::new()),
            queue: Arc::clone(&queue),
            events,
            started: AtomicBool::new(false),
            shutdown,
            metrics: MetricsCollector::new(),
        });

        let manager = Manager::new(queue, config).with_observer(Arc::new(Rescheduler {
            registry: Arc::clone(&registry),
        }));

        Ok(Self { registry, manager })
    }

    /// Registers a recurring job.
    ///
    /// The first run is enqueued right away if the scheduler is running,
    /// otherwise at [`CronScheduler::start`].
    ///
    /// # Errors
    ///
    /// - `CronError::DuplicateName` if `name` is already registered
    /// - `CronError::ShutDown` after shutdown
    /// - `CronError::Config` for a zero interval
    pub fn register<F, Fut>(
        &self,
        name: impl Into<String>,
        every: Duration,
        action: F,
    ) -> Result<(), CronError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let name = name.into();
        if every.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "every".to_string(),
                message: format!("interval of '{}' must be greater than zero", name),
            }
            .into());
        }
        if self.registry.is_shut_down() {
            return Err(CronError::ShutDown);
        }

        let mut entries = self
            .registry
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&name) {
            return Err(CronError::DuplicateName(name));
        }

        let entry = Arc::new(CronEntry {
            name: name.clone(),
            every,
            action: Arc::new(move || action().boxed()),
            runs: AtomicU64::new(0),
            active: AtomicBool::new(true),
        });
        entries.insert(name.clone(), Arc::clone(&entry));

        info!(job = %name, every_ms = every.as_millis() as u64, "Recurring job registered");

        if self.registry.started.load(Ordering::SeqCst) {
            self.registry.enqueue_run(&entry);
        }

        Ok(())
    }

    /// Removes a recurring job. A run already in flight finishes and
    /// still publishes its event, but is not rescheduled.
    pub fn unregister(&self, name: &str) -> Result<(), CronError> {
        let entry = self
            .registry
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| CronError::UnknownJob(name.to_string()))?;

        entry.active.store(false, Ordering::SeqCst);
        info!(job = %name, "Recurring job unregistered");

        Ok(())
    }

    /// Names of the registered jobs, sorted.
    pub fn registered_jobs(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registry
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Subscribes to result events. Only events published after this call
    /// are received.
    pub fn subscribe(&self) -> broadcast::Receiver<CronEvent> {
        self.registry.events.subscribe()
    }

    /// Starts the worker pool and enqueues the first run of every
    /// registered job.
    pub fn start(&self) -> Result<(), CronError> {
        if self.registry.is_shut_down() {
            return Err(CronError::ShutDown);
        }

        // Held across the start so a concurrent register cannot enqueue twice.
        let entries = self
            .registry
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        self.manager.start()?;
        self.registry.started.store(true, Ordering::SeqCst);

        for entry in entries.values() {
            self.registry.enqueue_run(entry);
        }

        info!(jobs = entries.len(), "Cron scheduler started");
        Ok(())
    }

    /// Stops rescheduling and stops the worker pool without draining.
    /// Resolves once every worker has exited.
    pub async fn shutdown(&self) {
        self.registry.shutdown.send_replace(true);
        self.manager.stop();

        let mut state = self.manager.subscribe_state();
        let _ = state
            .wait_for(|state| *state == LifecycleState::Stopped)
            .await;

        info!(pending = self.registry.queue.len(), "Cron scheduler shut down");
    }

    /// Stops rescheduling, then runs every queued and in-flight run to
    /// completion before stopping.
    pub async fn shutdown_and_drain(&self) -> Result<(), CronError> {
        self.registry.shutdown.send_replace(true);

        if !self.registry.started.load(Ordering::SeqCst) {
            self.manager.stop();
            return Ok(());
        }

        self.manager.finish_all_and_stop().await?;
        info!("Cron scheduler drained and shut down");
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        self.manager.state()
    }

    pub fn stats(&self) -> PoolStats {
        self.manager.stats()
    }

    /// Runs waiting in the queue.
    pub fn pending(&self) -> usize {
        self.registry.queue.len()
    }
}

impl Drop for CronScheduler {
    fn drop(&mut self) {
        // Pending interval timers hold the registry, not the scheduler.
        self.registry.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobFailure;
    use crate::scheduler::JobOk;

    fn scheduler() -> CronScheduler {
        let config = Config::new(2, Duration::from_millis(5)).expect("valid config");
        CronScheduler::new(config).expect("scheduler")
    }

    #[test]
    fn test_register_and_unregister() {
        let scheduler = scheduler();
        scheduler
            .register("b", Duration::from_secs(1), || async { Ok(JobOk::new()) })
            .expect("register b");
        scheduler
            .register("a", Duration::from_secs(1), || async { Ok(JobOk::new()) })
            .expect("register a");

        assert_eq!(scheduler.registered_jobs(), vec!["a", "b"]);

        let err = scheduler
            .register("a", Duration::from_secs(5), || async { Ok(JobOk::new()) })
            .expect_err("duplicate name");
        assert!(matches!(err, CronError::DuplicateName(ref name) if name == "a"));

        scheduler.unregister("a").expect("unregister a");
        assert_eq!(scheduler.registered_jobs(), vec!["b"]);
        assert!(matches!(
            scheduler.unregister("a"),
            Err(CronError::UnknownJob(_))
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let scheduler = scheduler();
        let err = scheduler
            .register("tight", Duration::ZERO, || async { Ok(JobOk::new()) })
            .expect_err("zero interval");
        assert!(matches!(err, CronError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_event_capacity_validated() {
        let config = Config::new(1, Duration::from_millis(5)).expect("valid config");

        for capacity in [0, MAX_EVENT_CHANNEL_CAPACITY + 1] {
            let err = CronScheduler::with_event_capacity(config, capacity)
                .err()
                .expect("capacity rejected");
            assert!(matches!(
                err,
                CronError::Config(ConfigError::InvalidValue { ref key, .. }) if key == "event_capacity"
            ));
        }

        assert!(CronScheduler::with_event_capacity(config, 1).is_ok());
    }

    #[tokio::test]
    async fn test_nothing_runs_before_start() {
        let scheduler = scheduler();
        scheduler
            .register("idle", Duration::from_millis(10), || async { Ok(JobOk::new()) })
            .expect("register");

        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.state(), LifecycleState::Created);

        scheduler.shutdown_and_drain().await.expect("drain unstarted");
        assert_eq!(scheduler.state(), LifecycleState::Stopped);
        assert!(matches!(scheduler.start(), Err(CronError::ShutDown)));
    }

    #[tokio::test]
    async fn test_register_after_shutdown() {
        let scheduler = scheduler();
        scheduler.shutdown().await;

        let err = scheduler
            .register("late", Duration::from_millis(10), || async { Ok(JobOk::new()) })
            .expect_err("shut down");
        assert!(matches!(err, CronError::ShutDown));
    }

    #[tokio::test]
    async fn test_runs_repeat_with_increasing_run_numbers() {
        let scheduler = scheduler();
        let mut events = scheduler.subscribe();
        scheduler
            .register("tick", Duration::from_millis(10), || async {
                Ok(JobOk::with_detail("tock"))
            })
            .expect("register");
        scheduler.start().expect("start");

        for expected in 1..=3 {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("event within timeout")
                .expect("channel open");
            assert_eq!(event.job_name, "tick");
            assert_eq!(event.run_number, expected);
            assert!(event.is_success());
        }

        scheduler.shutdown().await;
        assert_eq!(scheduler.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_failures_are_rescheduled_too() {
        let scheduler = scheduler();
        let mut events = scheduler.subscribe();
        scheduler
            .register("flaky", Duration::from_millis(10), || async {
                Err(JobFailure::failed("upstream unavailable"))
            })
            .expect("register");
        scheduler.start().expect("start");

        for expected in 1..=2 {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("event within timeout")
                .expect("channel open");
            assert_eq!(event.run_number, expected);
            assert!(!event.is_success());
        }

        scheduler.shutdown_and_drain().await.expect("drain");
    }
}
