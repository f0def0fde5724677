//! Retry decisions for completed executions.

use super::config::parse_env_value;
use super::job::JobResult;
use crate::error::ConfigError;

/// Environment variable for the attempt limit.
pub const ENV_MAX_ATTEMPTS: &str = "JOBMILL_MAX_ATTEMPTS";

/// What the engine does with a job after an execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the same job instance back at the queue tail.
    Requeue,
    /// Drop the job from the engine; the outcome is terminal.
    Finalize(Finalized),
}

/// Terminal state of a finalized job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalized {
    Succeeded,
    /// Failed on its last allowed attempt.
    Exhausted,
}

impl std::fmt::Display for Finalized {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Finalized::Succeeded => write!(f, "succeeded"),
            Finalized::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Stateless policy deciding between re-enqueue and finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl Default for RetryPolicy {
    /// One attempt, no retry.
    fn default() -> Self {
        Self { max_attempts: 1 }
    }
}

impl RetryPolicy {
    /// Creates a policy allowing up to `max_attempts` executions per job.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidMaxAttempts` if `max_attempts` is zero.
    pub fn new(max_attempts: u32) -> Result<Self, ConfigError> {
        if max_attempts < 1 {
            return Err(ConfigError::InvalidMaxAttempts(max_attempts));
        }
        Ok(Self { max_attempts })
    }

    /// Reads `JOBMILL_MAX_ATTEMPTS`, falling back to a single attempt.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(ENV_MAX_ATTEMPTS) {
            Ok(val) => Self::new(parse_env_value(&val, ENV_MAX_ATTEMPTS)?),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what happens after attempt number `attempt` (1-based).
    ///
    /// Success always finalizes. A failure is re-enqueued while
    /// `attempt < max_attempts` and finalized as exhausted otherwise.
    pub fn decide(&self, result: &JobResult, attempt: u32) -> RetryDecision {
        match result {
            Ok(_) => RetryDecision::Finalize(Finalized::Succeeded),
            Err(_) if attempt < self.max_attempts => RetryDecision::Requeue,
            Err(_) => RetryDecision::Finalize(Finalized::Exhausted),
        }
    }

    /// Attempts left after `attempt` executions.
    pub fn remaining_attempts(&self, attempt: u32) -> u32 {
        self.max_attempts.saturating_sub(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobFailure;
    use crate::scheduler::job::JobOk;

    #[test]
    fn test_default_is_single_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(
            policy.decide(&Err(JobFailure::failed("x")), 1),
            RetryDecision::Finalize(Finalized::Exhausted)
        );
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert_eq!(RetryPolicy::new(0), Err(ConfigError::InvalidMaxAttempts(0)));
    }

    #[test]
    fn test_success_always_finalizes() {
        let policy = RetryPolicy::new(5).expect("valid policy");
        for attempt in 1..=5 {
            assert_eq!(
                policy.decide(&Ok(JobOk::new()), attempt),
                RetryDecision::Finalize(Finalized::Succeeded)
            );
        }
    }

    #[test]
    fn test_failure_requeues_until_exhausted() {
        let policy = RetryPolicy::new(3).expect("valid policy");
        let failure: JobResult = Err(JobFailure::failed("boom"));

        assert_eq!(policy.decide(&failure, 1), RetryDecision::Requeue);
        assert_eq!(policy.decide(&failure, 2), RetryDecision::Requeue);
        assert_eq!(
            policy.decide(&failure, 3),
            RetryDecision::Finalize(Finalized::Exhausted)
        );
        assert_eq!(policy.remaining_attempts(1), 2);
        assert_eq!(policy.remaining_attempts(4), 0);
    }

    #[test]
    fn test_panic_is_retried_like_failure() {
        let policy = RetryPolicy::new(2).expect("valid policy");
        let fault: JobResult = Err(JobFailure::Panicked {
            message: "oops".to_string(),
        });
        assert_eq!(policy.decide(&fault, 1), RetryDecision::Requeue);
    }

    #[test]
    fn test_finalized_display() {
        assert_eq!(Finalized::Succeeded.to_string(), "succeeded");
        assert_eq!(Finalized::Exhausted.to_string(), "exhausted");
    }
}
