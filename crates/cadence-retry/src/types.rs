//! Scheduler types.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Group used when a key is created without an explicit group.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Job data key holding the retry budget.
pub const MAX_RETRIES_KEY: &str = "MaxRetries";

/// Job data key holding the delay before a retry, in seconds.
pub const WAIT_INTERVAL_KEY: &str = "WaitInterval";

/// Job data key holding the serialized [`JobRetryState`].
pub const RETRY_STATE_KEY: &str = "RetryState";

/// Identity of a job: a name unique within its group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

impl JobKey {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    /// Create a key in [`DEFAULT_GROUP`].
    pub fn with_default_group(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_GROUP)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Identity of a trigger: a name unique within its group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    pub name: String,
    pub group: String,
}

impl TriggerKey {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    /// Create a key with a fresh random name in the given group.
    pub fn unique(group: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), group)
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// When a trigger fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSchedule {
    /// Fire on every occurrence of a cron expression.
    Cron {
        expression: String,
        /// Fixed UTC offset such as `+02:00`, or `UTC`. `None` means UTC.
        time_zone: Option<String>,
    },
    /// Fire once at a specific instant.
    Once { at: DateTime<Utc> },
}

/// A trigger bound to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub key: TriggerKey,
    pub job_key: JobKey,
    pub schedule: TriggerSchedule,
}

impl Trigger {
    /// Create a recurring cron trigger.
    pub fn cron(
        key: TriggerKey,
        job_key: JobKey,
        expression: impl Into<String>,
        time_zone: Option<String>,
    ) -> Self {
        Self {
            key,
            job_key,
            schedule: TriggerSchedule::Cron {
                expression: expression.into(),
                time_zone,
            },
        }
    }

    /// Create a one-shot trigger.
    pub fn once(key: TriggerKey, job_key: JobKey, at: DateTime<Utc>) -> Self {
        Self {
            key,
            job_key,
            schedule: TriggerSchedule::Once { at },
        }
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self.schedule, TriggerSchedule::Once { .. })
    }
}

/// Mutable per-job key-value store.
///
/// Values are JSON so that callers can keep arbitrary settings next to the
/// integer tunables the retry policy reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobDataMap(HashMap<String, Value>);

impl JobDataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Insert a value, returning the previous one.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Read a non-negative integer that fits in `u32`.
    ///
    /// Returns `None` when the key is absent or holds anything else.
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.0
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A job registered with a scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetail {
    pub key: JobKey,
    /// Descriptor of what the job does, used in reports.
    pub job_type: String,
    pub data: JobDataMap,
}

impl JobDetail {
    pub fn new(key: JobKey, job_type: impl Into<String>) -> Self {
        Self {
            key,
            job_type: job_type.into(),
            data: JobDataMap::new(),
        }
    }

    /// Set a single data entry.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.put(key, value);
        self
    }

    /// Set the retry budget and the wait between retries.
    pub fn with_retry_budget(self, max_retries: u32, wait_interval_secs: u32) -> Self {
        self.with_data(MAX_RETRIES_KEY, max_retries)
            .with_data(WAIT_INTERVAL_KEY, wait_interval_secs)
    }
}

/// Retry bookkeeping for one job, kept in the job's own data map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRetryState {
    /// Executions since the last success or reset.
    pub attempt_count: u32,
    /// Whether the job currently runs on a one-shot retry trigger.
    pub on_retry_schedule: bool,
}

impl JobRetryState {
    /// Read the state from a job's data map.
    ///
    /// A missing entry is the initial state. An unreadable entry is also
    /// treated as the initial state.
    pub fn load(data: &JobDataMap) -> Self {
        match data.get(RETRY_STATE_KEY) {
            None => Self::default(),
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "unreadable retry state, starting from zero");
                Self::default()
            }),
        }
    }

    /// Write the state back into a job's data map.
    pub fn store(&self, data: &mut JobDataMap) {
        match serde_json::to_value(self) {
            Ok(value) => {
                data.put(RETRY_STATE_KEY, value);
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize retry state"),
        }
    }
}
