//! Recurring job scheduling.
//!
//! Registered jobs run on a dedicated worker pool, sleep their interval
//! after each run, and come back as a fresh job instance. Every finished
//! run is published as a [`CronEvent`] on a broadcast channel.

pub mod event;
pub mod scheduler;

pub use event::{CronEvent, CronOutcome};
pub use scheduler::{CronScheduler, EVENT_CHANNEL_CAPACITY, MAX_EVENT_CHANNEL_CAPACITY};
