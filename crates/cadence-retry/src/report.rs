//! Reporting sink for retry decisions.

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use crate::{JobExecutionError, JobKey};

/// A failed run that will be retried on a one-shot trigger.
#[derive(Debug)]
pub struct RetryScheduled<'a> {
    pub job: &'a JobKey,
    pub job_type: &'a str,
    pub failure: &'a JobExecutionError,
    pub wait_interval_secs: u32,
    pub attempt: u32,
    pub fire_at: DateTime<Utc>,
}

/// A failed run that used up the retry budget.
#[derive(Debug)]
pub struct RetriesExhausted<'a> {
    pub job: &'a JobKey,
    pub job_type: &'a str,
    pub failure: &'a JobExecutionError,
    pub max_retries: u32,
    pub attempts: u32,
}

/// Receives retry decisions. Both methods default to doing nothing.
pub trait RetryReporter: Send + Sync {
    /// Error-level: a run failed and a retry was scheduled.
    fn retry_scheduled(&self, _event: &RetryScheduled<'_>) {}

    /// Warning-level: the retry budget is exhausted.
    fn retries_exhausted(&self, _event: &RetriesExhausted<'_>) {}
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl RetryReporter for NoopReporter {}

/// Emits reports as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl RetryReporter for TracingReporter {
    fn retry_scheduled(&self, event: &RetryScheduled<'_>) {
        error!(
            job = %event.job,
            job_type = event.job_type,
            error = %event.failure,
            wait_interval_secs = event.wait_interval_secs,
            attempt = event.attempt,
            fire_at = %event.fire_at,
            "job failed, running again in {} seconds",
            event.wait_interval_secs
        );
    }

    fn retries_exhausted(&self, event: &RetriesExhausted<'_>) {
        warn!(
            job = %event.job,
            job_type = event.job_type,
            error = %event.failure,
            max_retries = event.max_retries,
            attempts = event.attempts,
            "job failed on every attempt, returning to primary schedule"
        );
    }
}
