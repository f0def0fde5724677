//! Result events published by the recurring scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scheduler::JobResult;

/// Outcome of one recurring run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CronOutcome {
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Failure {
        message: String,
        /// The run panicked instead of returning a failure.
        fault: bool,
    },
}

impl From<&JobResult> for CronOutcome {
    fn from(result: &JobResult) -> Self {
        match result {
            Ok(ok) => CronOutcome::Success {
                detail: ok.detail.clone(),
            },
            Err(failure) => CronOutcome::Failure {
                message: failure.message().to_string(),
                fault: failure.is_fault(),
            },
        }
    }
}

/// Immutable record of a finished recurring run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronEvent {
    pub event_id: Uuid,
    pub job_name: String,
    /// 1-based run counter of this recurring job.
    pub run_number: u64,
    pub outcome: CronOutcome,
    pub finished_at: DateTime<Utc>,
}

impl CronEvent {
    pub fn new(job_name: impl Into<String>, run_number: u64, result: &JobResult) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            job_name: job_name.into(),
            run_number,
            outcome: CronOutcome::from(result),
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CronOutcome::Success { .. })
    }
}
