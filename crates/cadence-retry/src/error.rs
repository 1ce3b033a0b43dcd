//! Error types for the retry policy and scheduler.

use thiserror::Error;

use crate::{JobKey, TriggerKey};

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Invalid policy or job configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Job already exists.
    #[error("job already exists: {0}")]
    JobExists(JobKey),

    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(JobKey),

    /// Trigger key is already in use by another job.
    #[error("trigger already exists: {0}")]
    TriggerExists(TriggerKey),

    /// No job is driven by the given trigger.
    #[error("trigger not found: {0}")]
    TriggerNotFound(TriggerKey),

    /// Cron expression could not be parsed.
    #[error("invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    /// Time zone could not be parsed.
    #[error("invalid time zone: {0}")]
    InvalidTimeZone(String),

    /// The caller's cancellation token fired before the operation completed.
    #[error("operation cancelled")]
    Cancelled,

    /// The scheduler has been shut down.
    #[error("scheduler is shut down")]
    ShutDown,
}

/// Failure reported by a job body.
///
/// This is the input to the retry decision, not an error of the scheduler itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct JobExecutionError {
    message: String,
}

impl JobExecutionError {
    /// Create a failure with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for JobExecutionError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for JobExecutionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
