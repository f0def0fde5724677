//! Error types for jobmill operations.
//!
//! Defines the error types for the major subsystems:
//! - Configuration and retry-policy validation
//! - Job-level failures reported by (or captured from) a job's `run()`
//! - Engine faults and lifecycle misuse of the worker pool
//! - The recurring scheduler layer

use thiserror::Error;

/// Errors raised while building or validating execution parameters.
///
/// These are construction-time failures; nothing in this enum is produced
/// once a manager is running.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_parallel_job_execute must be at least 1, got {0}")]
    InvalidParallelism(usize),

    #[error("sleep_after_check must not be negative, got {0}ms")]
    NegativeSleep(i64),

    #[error("max_attempts must be at least 1, got {0}")]
    InvalidMaxAttempts(u32),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// A recoverable failure produced by a job run.
///
/// `Failed` is what a job returns for expected failure paths. `Panicked`
/// is produced by the worker when the job's future panics; the panic
/// message is kept for diagnostics and the failure goes through the same
/// retry policy as any other.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobFailure {
    #[error("job failed: {message}")]
    Failed { message: String },

    #[error("job panicked: {message}")]
    Panicked { message: String },
}

impl JobFailure {
    /// Creates an expected failure with the given message.
    pub fn failed(message: impl Into<String>) -> Self {
        JobFailure::Failed {
            message: message.into(),
        }
    }

    /// Returns whether this failure was captured from a panic.
    pub fn is_fault(&self) -> bool {
        matches!(self, JobFailure::Panicked { .. })
    }

    /// Returns the failure message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            JobFailure::Failed { message } | JobFailure::Panicked { message } => message,
        }
    }
}

/// Errors surfaced by the worker-pool engine itself.
///
/// Job failures never show up here. `WorkerPanicked` and
/// `AccountingViolation` are engine faults and indicate a bug in the
/// engine rather than in a job.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Manager is already started")]
    AlreadyStarted,

    #[error("Manager was never started")]
    NotStarted,

    #[error("Worker {worker_id} panicked outside of job execution: {message}")]
    WorkerPanicked { worker_id: String, message: String },

    #[error("In-flight accounting violated: {0}")]
    AccountingViolation(String),
}

impl EngineError {
    /// Returns whether this error is an internal engine fault rather than
    /// lifecycle misuse by the caller.
    pub fn is_engine_fault(&self) -> bool {
        matches!(
            self,
            EngineError::WorkerPanicked { .. } | EngineError::AccountingViolation(_)
        )
    }
}

/// Errors that can occur in the recurring scheduler.
#[derive(Debug, Error)]
pub enum CronError {
    #[error("A recurring job named '{0}' is already registered")]
    DuplicateName(String),

    #[error("No recurring job named '{0}' is registered")]
    UnknownJob(String),

    #[error("Scheduler has been shut down")]
    ShutDown,

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
