//! Execution parameters for the worker pool.
//!
//! A [`Config`] is validated once at construction and never mutated
//! afterwards; the manager clones it into every worker.

use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable for the number of workers.
pub const ENV_MAX_PARALLEL_JOBS: &str = "JOBMILL_MAX_PARALLEL_JOBS";
/// Environment variable for the idle backoff in milliseconds.
pub const ENV_SLEEP_AFTER_CHECK_MS: &str = "JOBMILL_SLEEP_AFTER_CHECK_MS";

const DEFAULT_MAX_PARALLEL_JOB_EXECUTE: usize = 5;
const DEFAULT_SLEEP_AFTER_CHECK: Duration = Duration::from_millis(100);

/// Immutable execution parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    max_parallel_job_execute: usize,
    sleep_after_check: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_parallel_job_execute: DEFAULT_MAX_PARALLEL_JOB_EXECUTE,
            sleep_after_check: DEFAULT_SLEEP_AFTER_CHECK,
        }
    }
}

impl Config {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidParallelism` if `max_parallel_job_execute`
    /// is zero. A zero `sleep_after_check` is allowed and means busy polling.
    pub fn new(
        max_parallel_job_execute: usize,
        sleep_after_check: Duration,
    ) -> Result<Self, ConfigError> {
        if max_parallel_job_execute < 1 {
            return Err(ConfigError::InvalidParallelism(max_parallel_job_execute));
        }

        Ok(Self {
            max_parallel_job_execute,
            sleep_after_check,
        })
    }

    /// Creates a configuration from a signed millisecond backoff.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NegativeSleep` for a negative interval, in
    /// addition to the checks done by [`Config::new`].
    pub fn with_sleep_millis(
        max_parallel_job_execute: usize,
        sleep_after_check_ms: i64,
    ) -> Result<Self, ConfigError> {
        let millis = u64::try_from(sleep_after_check_ms)
            .map_err(|_| ConfigError::NegativeSleep(sleep_after_check_ms))?;
        Self::new(max_parallel_job_execute, Duration::from_millis(millis))
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `JOBMILL_MAX_PARALLEL_JOBS`: Number of workers (default: 5)
    /// - `JOBMILL_SLEEP_AFTER_CHECK_MS`: Idle backoff in milliseconds (default: 100)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed or is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_parallel = match lookup(ENV_MAX_PARALLEL_JOBS) {
            Some(val) => parse_env_value(&val, ENV_MAX_PARALLEL_JOBS)?,
            None => defaults.max_parallel_job_execute,
        };

        let sleep_ms: i64 = match lookup(ENV_SLEEP_AFTER_CHECK_MS) {
            Some(val) => parse_env_value(&val, ENV_SLEEP_AFTER_CHECK_MS)?,
            None => defaults.sleep_after_check.as_millis() as i64,
        };

        Self::with_sleep_millis(max_parallel, sleep_ms)
    }

    /// Hard cap on concurrently executing jobs; also the worker count.
    pub fn max_parallel_job_execute(&self) -> usize {
        self.max_parallel_job_execute
    }

    /// Backoff applied by a worker that found the queue empty.
    pub fn sleep_after_check(&self) -> Duration {
        self.sleep_after_check
    }
}

/// Parse an environment variable into any `FromStr` type.
pub(crate) fn parse_env_value<T: std::str::FromStr>(
    value: &str,
    key: &str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_parallel_job_execute(), 5);
        assert_eq!(config.sleep_after_check(), Duration::from_millis(100));
    }

    #[test]
    fn test_new_validates_parallelism() {
        assert_eq!(
            Config::new(0, Duration::from_millis(10)),
            Err(ConfigError::InvalidParallelism(0))
        );

        let config = Config::new(1, Duration::ZERO).expect("zero sleep is allowed");
        assert_eq!(config.max_parallel_job_execute(), 1);
        assert_eq!(config.sleep_after_check(), Duration::ZERO);
    }

    #[test]
    fn test_negative_sleep_rejected() {
        assert_eq!(
            Config::with_sleep_millis(4, -1),
            Err(ConfigError::NegativeSleep(-1))
        );
        let config = Config::with_sleep_millis(4, 250).expect("valid config");
        assert_eq!(config.sleep_after_check(), Duration::from_millis(250));
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).expect("defaults are valid");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            (ENV_MAX_PARALLEL_JOBS, "50"),
            (ENV_SLEEP_AFTER_CHECK_MS, "200"),
        ]))
        .expect("valid env");

        assert_eq!(config.max_parallel_job_execute(), 50);
        assert_eq!(config.sleep_after_check(), Duration::from_millis(200));
    }

    #[test]
    fn test_from_lookup_invalid_values() {
        let err = Config::from_lookup(lookup_from(&[(ENV_MAX_PARALLEL_JOBS, "many")]))
            .expect_err("non-numeric parallelism");
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == ENV_MAX_PARALLEL_JOBS));

        let err = Config::from_lookup(lookup_from(&[(ENV_SLEEP_AFTER_CHECK_MS, "-20")]))
            .expect_err("negative sleep");
        assert_eq!(err, ConfigError::NegativeSleep(-20));

        let err = Config::from_lookup(lookup_from(&[(ENV_MAX_PARALLEL_JOBS, "0")]))
            .expect_err("zero workers");
        assert_eq!(err, ConfigError::InvalidParallelism(0));
    }
}
