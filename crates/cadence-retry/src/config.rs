//! Retry policy configuration.

use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// Construction-time settings of a [`RetryPolicyEngine`](crate::RetryPolicyEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfiguration {
    /// Unique listener name of the policy instance.
    pub name: String,
    /// Cron expression of the job's normal cadence.
    pub primary_schedule: String,
    /// Time zone for `primary_schedule`. `None` uses the scheduler's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl RetryConfiguration {
    pub fn new(name: impl Into<String>, primary_schedule: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_schedule: primary_schedule.into(),
            time_zone: None,
        }
    }

    pub fn with_time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.time_zone = Some(time_zone.into());
        self
    }

    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.name.trim().is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "policy name must not be empty".to_string(),
            ));
        }
        if self.primary_schedule.trim().is_empty() {
            return Err(SchedulerError::InvalidConfig(format!(
                "policy '{}' has an empty primary schedule",
                self.name
            )));
        }
        if self
            .time_zone
            .as_deref()
            .is_some_and(|tz| tz.trim().is_empty())
        {
            return Err(SchedulerError::InvalidConfig(format!(
                "policy '{}' has an empty time zone",
                self.name
            )));
        }
        Ok(())
    }
}
