//! In-process FIFO job queue.
//!
//! The queue is the only resource shared between the worker pool and
//! external producers. It supports:
//!
//! - Non-blocking dequeue (an empty queue yields `None` immediately)
//! - Unbounded, always-succeeding enqueue
//! - Re-enqueue of retried jobs at the tail, keeping their attempt counter
//!
//! `len()` is a snapshot. It is exact only when no producer or worker is
//! touching the queue, e.g. after a drain has completed. `MemoryQueue`
//! publishes its length to the `jobmill_queue_depth` gauge on every change.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::job::{JobHandle, QueuedJob};
use crate::metrics::MetricsCollector;

/// Default name used for metrics labels and logs.
pub const DEFAULT_QUEUE_NAME: &str = "default";

/// A thread-safe FIFO of pending jobs.
///
/// Every mutating operation is atomic with respect to concurrent callers:
/// a job is never lost or handed to two workers.
pub trait JobQueue: Send + Sync {
    /// Appends a new job at the tail.
    fn enqueue(&self, job: JobHandle);

    /// Puts an already-attempted entry back at the tail.
    fn requeue(&self, entry: QueuedJob);

    /// Removes and returns the head entry, if any.
    fn dequeue(&self) -> Option<QueuedJob>;

    /// Number of resident jobs (excludes jobs being executed).
    fn len(&self) -> usize;

    /// Name used for logs and metrics.
    fn name(&self) -> &str;

    /// Returns whether the queue currently holds no jobs.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueues several jobs, preserving their order.
    fn enqueue_batch(&self, jobs: Vec<JobHandle>) {
        for job in jobs {
            self.enqueue(job);
        }
    }
}

/// Unbounded in-memory queue backed by a `VecDeque`.
#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    entries: Mutex<VecDeque<QueuedJob>>,
    metrics: MetricsCollector,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    /// Creates an empty queue named [`DEFAULT_QUEUE_NAME`].
    pub fn new() -> Self {
        Self::named(DEFAULT_QUEUE_NAME)
    }

    /// Creates an empty queue with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(VecDeque::new()),
            metrics: MetricsCollector::new(),
        }
    }

    /// Returns the ids of the resident jobs, head first.
    pub fn snapshot_ids(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|entry| entry.job.id().to_string())
            .collect()
    }

    // The critical sections only push/pop a VecDeque, so a poisoned lock
    // still guards a consistent deque.
    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedJob>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_depth(&self, entries: &VecDeque<QueuedJob>) {
        self.metrics.update_queue_depth(&self.name, entries.len());
    }
}

impl JobQueue for MemoryQueue {
    fn enqueue(&self, job: JobHandle) {
        let mut entries = self.lock();
        entries.push_back(QueuedJob::new(job));
        self.publish_depth(&entries);
    }

    fn requeue(&self, mut entry: QueuedJob) {
        entry.touch();
        let mut entries = self.lock();
        entries.push_back(entry);
        self.publish_depth(&entries);
    }

    fn dequeue(&self) -> Option<QueuedJob> {
        let mut entries = self.lock();
        let entry = entries.pop_front()?;
        self.publish_depth(&entries);
        Some(entry)
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn enqueue_batch(&self, jobs: Vec<JobHandle>) {
        let mut entries = self.lock();
        entries.extend(jobs.into_iter().map(QueuedJob::new));
        self.publish_depth(&entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{FnJob, JobOk};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn create_test_job(id: &str) -> JobHandle {
        JobHandle::new(FnJob::new(id, || async { Ok(JobOk::new()) }))
    }

    #[test]
    fn test_fifo_order() {
        let queue = MemoryQueue::new();
        queue.enqueue(create_test_job("1"));
        queue.enqueue(create_test_job("2"));
        queue.enqueue(create_test_job("3"));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.snapshot_ids(), vec!["1", "2", "3"]);

        let ids: Vec<String> = std::iter::from_fn(|| queue.dequeue())
            .map(|entry| entry.job.id().to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_dequeue_empty_does_not_block() {
        let queue = MemoryQueue::named("empty");
        assert!(queue.dequeue().is_none());
        assert_eq!(queue.name(), "empty");
    }

    #[test]
    fn test_requeue_goes_to_tail_and_keeps_attempts() {
        let queue = MemoryQueue::new();
        queue.enqueue(create_test_job("retry-me"));
        queue.enqueue(create_test_job("next"));

        let mut entry = queue.dequeue().expect("entry should be present");
        entry.begin_attempt();
        queue.requeue(entry);

        assert_eq!(queue.snapshot_ids(), vec!["next", "retry-me"]);

        queue.dequeue();
        let retried = queue.dequeue().expect("retried entry should be present");
        assert_eq!(retried.job.id(), "retry-me");
        assert_eq!(retried.attempts, 1);
    }

    #[test]
    fn test_enqueue_batch_preserves_order() {
        let queue = MemoryQueue::new();
        queue.enqueue(create_test_job("first"));
        queue.enqueue_batch(vec![create_test_job("a"), create_test_job("b")]);

        assert_eq!(queue.snapshot_ids(), vec!["first", "a", "b"]);
    }

    #[test]
    fn test_depth_gauge_follows_queue() {
        let _ = crate::metrics::init_metrics();
        let depth = || {
            crate::metrics::QUEUE_DEPTH
                .get()
                .map(|gauge| gauge.with_label_values(&["depth-gauge"]).get())
        };

        let queue = MemoryQueue::named("depth-gauge");
        queue.enqueue_batch(vec![create_test_job("a"), create_test_job("b")]);
        queue.enqueue(create_test_job("c"));
        assert_eq!(depth(), Some(3.0));

        let mut entry = queue.dequeue().expect("entry should be present");
        assert_eq!(depth(), Some(2.0));

        entry.begin_attempt();
        queue.requeue(entry);
        assert_eq!(depth(), Some(3.0));
    }

    #[test]
    fn test_concurrent_producers_and_consumers() {
        let queue = Arc::new(MemoryQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        queue.enqueue(create_test_job(&format!("{}-{}", p, i)));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().expect("producer thread panicked");
        }

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(entry) = queue.dequeue() {
                        seen.push(entry.job.id().to_string());
                    }
                    seen
                })
            })
            .collect();

        let mut all = HashSet::new();
        let mut total = 0;
        for consumer in consumers {
            let seen = consumer.join().expect("consumer thread panicked");
            total += seen.len();
            all.extend(seen);
        }

        assert_eq!(total, 1000);
        assert_eq!(all.len(), 1000);
        assert!(queue.is_empty());
    }
}
