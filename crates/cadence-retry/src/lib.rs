//! Retry-on-failure scheduling policy for Cadence.
//!
//! This crate provides:
//! - [`RetryPolicyEngine`], a job listener that moves a failing job from its
//!   primary cron cadence onto a fixed-interval one-shot retry trigger, and back
//!   once it succeeds or exhausts its retry budget
//! - the [`Scheduler`] and [`JobListener`] contracts the engine plugs into
//! - [`InMemoryScheduler`], a process-local scheduler implementing both sides
//!
//! Retry state lives in each job's [`JobDataMap`] and is not persisted across
//! restarts.

mod config;
mod cron;
mod engine;
mod error;
mod listener;
pub mod report;
mod scheduler;
mod types;

pub use config::RetryConfiguration;
pub use engine::RetryPolicyEngine;
pub use error::{JobExecutionError, SchedulerError};
pub use listener::{JobContext, JobListener};
pub use report::{NoopReporter, RetryReporter, TracingReporter};
pub use scheduler::{InMemoryScheduler, JobExecutor, Scheduler};
pub use types::{
    DEFAULT_GROUP, JobDataMap, JobDetail, JobKey, JobRetryState, MAX_RETRIES_KEY,
    RETRY_STATE_KEY, Trigger, TriggerKey, TriggerSchedule, WAIT_INTERVAL_KEY,
};
