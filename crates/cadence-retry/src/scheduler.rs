//! Scheduler contract and an in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cron::next_fire_time;
use crate::{
    JobContext, JobDataMap, JobDetail, JobExecutionError, JobKey, JobListener, SchedulerError,
    Trigger, TriggerKey,
};

/// Minimum sleep duration between scheduler checks.
const MIN_SLEEP_SECS: u64 = 1;

/// Maximum sleep duration between scheduler checks.
const MAX_SLEEP_SECS: u64 = 60;

/// Type alias for the job executor function.
pub type JobExecutor = Box<
    dyn Fn(JobDetail) -> Pin<Box<dyn Future<Output = Result<(), JobExecutionError>> + Send>>
        + Send
        + Sync,
>;

/// Operations a listener may call back into.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Replace the trigger identified by `trigger_key` with `new_trigger`.
    ///
    /// The new trigger drives the same job as the old one. Returns the new
    /// trigger's next fire time.
    async fn reschedule_job(
        &self,
        trigger_key: &TriggerKey,
        new_trigger: Trigger,
        cancel: &CancellationToken,
    ) -> Result<Option<DateTime<Utc>>, SchedulerError>;
}

struct JobRecord {
    detail: JobDetail,
    trigger: Trigger,
    /// `None` once a one-shot trigger has fired.
    next_fire: Option<DateTime<Utc>>,
    paused: bool,
    /// A one-shot trigger was spent by a veto and is re-armed on resume.
    vetoed_one_shot: bool,
}

impl JobRecord {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_fire.is_some_and(|next| next <= now)
    }
}

struct Inner {
    jobs: RwLock<HashMap<JobKey, JobRecord>>,
    listeners: RwLock<Vec<Arc<dyn JobListener>>>,
    running: Mutex<HashSet<JobKey>>,
    shutdown: CancellationToken,
}

/// Process-local scheduler.
///
/// Jobs, triggers and job data live only in memory. Cloning yields another
/// handle to the same scheduler.
#[derive(Clone)]
pub struct InMemoryScheduler {
    inner: Arc<Inner>,
}

impl Default for InMemoryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryScheduler {
    /// Create a new scheduler.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: RwLock::new(HashMap::new()),
                listeners: RwLock::new(Vec::new()),
                running: Mutex::new(HashSet::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Register a listener, replacing any listener with the same name.
    pub async fn add_listener(&self, listener: Arc<dyn JobListener>) {
        let mut listeners = self.inner.listeners.write().await;
        if let Some(existing) = listeners.iter_mut().find(|l| l.name() == listener.name()) {
            debug!(listener = listener.name(), "replacing listener");
            *existing = listener;
        } else {
            debug!(listener = listener.name(), "adding listener");
            listeners.push(listener);
        }
    }

    /// Names of the registered listeners, in invocation order.
    pub async fn listener_names(&self) -> Vec<String> {
        self.inner
            .listeners
            .read()
            .await
            .iter()
            .map(|l| l.name().to_string())
            .collect()
    }

    /// Add a job driven by `trigger`.
    #[tracing::instrument(skip(self, detail, trigger), fields(job = %detail.key))]
    pub async fn schedule_job(
        &self,
        detail: JobDetail,
        trigger: Trigger,
    ) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        let next_fire = next_fire_time(&trigger.schedule, Utc::now())?;

        let mut jobs = self.inner.jobs.write().await;
        if jobs.contains_key(&detail.key) {
            return Err(SchedulerError::JobExists(detail.key));
        }
        if jobs.values().any(|r| r.trigger.key == trigger.key) {
            return Err(SchedulerError::TriggerExists(trigger.key));
        }

        info!(trigger = %trigger.key, next_fire = ?next_fire, "scheduled job");
        let trigger = Trigger {
            job_key: detail.key.clone(),
            ..trigger
        };
        jobs.insert(
            detail.key.clone(),
            JobRecord {
                detail,
                trigger,
                next_fire,
                paused: false,
                vetoed_one_shot: false,
            },
        );
        Ok(next_fire)
    }

    /// Remove a job and its trigger.
    pub async fn delete_job(&self, key: &JobKey) -> Result<(), SchedulerError> {
        if self.inner.jobs.write().await.remove(key).is_none() {
            return Err(SchedulerError::JobNotFound(key.clone()));
        }
        info!(job = %key, "deleted job");
        Ok(())
    }

    /// Veto the job's runs until [`InMemoryScheduler::resume_job`] is called.
    pub async fn pause_job(&self, key: &JobKey) -> Result<(), SchedulerError> {
        let mut jobs = self.inner.jobs.write().await;
        let record = jobs
            .get_mut(key)
            .ok_or_else(|| SchedulerError::JobNotFound(key.clone()))?;
        record.paused = true;
        debug!(job = %key, "paused job");
        Ok(())
    }

    /// Stop vetoing the job's runs.
    ///
    /// A one-shot trigger that was vetoed while paused fires again, right away
    /// if its instant has passed.
    pub async fn resume_job(&self, key: &JobKey) -> Result<(), SchedulerError> {
        let mut jobs = self.inner.jobs.write().await;
        let record = jobs
            .get_mut(key)
            .ok_or_else(|| SchedulerError::JobNotFound(key.clone()))?;
        record.paused = false;
        if record.vetoed_one_shot {
            record.next_fire = next_fire_time(&record.trigger.schedule, Utc::now())?;
            record.vetoed_one_shot = false;
            debug!(job = %key, next_fire = ?record.next_fire, "re-armed vetoed one-shot trigger");
        }
        debug!(job = %key, "resumed job");
        Ok(())
    }

    /// Keys of all registered jobs.
    pub async fn job_keys(&self) -> Vec<JobKey> {
        let mut keys: Vec<_> = self.inner.jobs.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Current data map of a job.
    pub async fn job_data(&self, key: &JobKey) -> Option<JobDataMap> {
        self.inner
            .jobs
            .read()
            .await
            .get(key)
            .map(|r| r.detail.data.clone())
    }

    /// Active trigger of a job.
    pub async fn trigger(&self, key: &JobKey) -> Option<Trigger> {
        self.inner
            .jobs
            .read()
            .await
            .get(key)
            .map(|r| r.trigger.clone())
    }

    /// When the job's trigger fires next.
    pub async fn next_fire_time(&self, key: &JobKey) -> Option<DateTime<Utc>> {
        self.inner
            .jobs
            .read()
            .await
            .get(key)
            .and_then(|r| r.next_fire)
    }

    /// Stop the run loop and refuse further reschedules.
    pub fn shutdown(&self) {
        info!("scheduler shutdown requested");
        self.inner.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Run the scheduler loop until [`InMemoryScheduler::shutdown`] is called.
    pub async fn run(&self, executor: JobExecutor) {
        info!("scheduler starting");

        loop {
            if self.is_shut_down() {
                break;
            }

            for key in self.due_jobs().await {
                if self.is_shut_down() {
                    info!("shutdown requested, not starting new jobs");
                    break;
                }

                if let Err(e) = self.execute_job(&key, &executor).await {
                    error!(job = %key, error = %e, "job listener failed");
                }
            }

            let sleep_duration = self.calculate_sleep_duration().await;

            tokio::select! {
                _ = self.inner.shutdown.cancelled() => {
                    info!("scheduler received shutdown signal");
                }
                _ = sleep(sleep_duration) => {}
            }
        }

        info!("scheduler shut down gracefully");
    }

    /// Keys of all jobs that are due to run.
    async fn due_jobs(&self) -> Vec<JobKey> {
        let now = Utc::now();
        let mut due: Vec<_> = self
            .inner
            .jobs
            .read()
            .await
            .values()
            .filter(|r| r.is_due(now))
            .map(|r| (r.next_fire, r.detail.key.clone()))
            .collect();
        due.sort();
        due.into_iter().map(|(_, key)| key).collect()
    }

    /// Calculate how long to sleep until the next job is due.
    pub async fn calculate_sleep_duration(&self) -> std::time::Duration {
        let jobs = self.inner.jobs.read().await;
        let now = Utc::now();

        let next_due = jobs.values().filter_map(|r| r.next_fire).min();

        let secs = match next_due {
            Some(next) => {
                let diff = (next - now).num_seconds();
                (diff.max(MIN_SLEEP_SECS as i64) as u64).min(MAX_SLEEP_SECS)
            }
            None => MAX_SLEEP_SECS,
        };

        std::time::Duration::from_secs(secs)
    }

    /// Fire a job now, whether or not its trigger is due.
    ///
    /// The trigger advances first (cron to its next occurrence, one-shot to
    /// spent), then listeners and the executor run. Listener errors are
    /// returned after the job's data has been persisted. A job that is already
    /// running is skipped.
    #[tracing::instrument(skip(self, executor), fields(job = %key))]
    pub async fn execute_job(
        &self,
        key: &JobKey,
        executor: &JobExecutor,
    ) -> Result<(), SchedulerError> {
        if !self.inner.running.lock().await.insert(key.clone()) {
            debug!("job already running, skipping");
            return Ok(());
        }

        let result = self.fire(key, executor).await;
        self.inner.running.lock().await.remove(key);
        result
    }

    async fn fire(&self, key: &JobKey, executor: &JobExecutor) -> Result<(), SchedulerError> {
        let now = Utc::now();

        let (detail, trigger, paused) = {
            let mut jobs = self.inner.jobs.write().await;
            let record = jobs
                .get_mut(key)
                .ok_or_else(|| SchedulerError::JobNotFound(key.clone()))?;
            record.next_fire = if record.trigger.is_one_shot() {
                record.vetoed_one_shot = record.paused;
                None
            } else {
                next_fire_time(&record.trigger.schedule, now)?
            };
            (
                record.detail.clone(),
                record.trigger.clone(),
                record.paused,
            )
        };

        let listeners = self.inner.listeners.read().await.clone();
        let mut ctx = JobContext {
            job: detail,
            trigger,
            scheduler: Arc::new(self.clone()),
            cancel: self.inner.shutdown.child_token(),
        };

        let result = if paused {
            info!("job paused, execution vetoed");
            Self::notify_vetoed(&listeners, &mut ctx).await
        } else {
            Self::run_with_listeners(&listeners, &mut ctx, executor).await
        };

        // Partial listener progress is kept
        if let Some(record) = self.inner.jobs.write().await.get_mut(key) {
            record.detail.data = ctx.job.data;
        }

        result
    }

    async fn notify_vetoed(
        listeners: &[Arc<dyn JobListener>],
        ctx: &mut JobContext,
    ) -> Result<(), SchedulerError> {
        for listener in listeners {
            listener.on_execution_vetoed(ctx).await?;
        }
        Ok(())
    }

    async fn run_with_listeners(
        listeners: &[Arc<dyn JobListener>],
        ctx: &mut JobContext,
        executor: &JobExecutor,
    ) -> Result<(), SchedulerError> {
        for listener in listeners {
            listener.on_before_execute(ctx).await?;
        }

        info!(job_type = %ctx.job.job_type, trigger = %ctx.trigger.key, "executing job");
        let result = executor(ctx.job.clone()).await;
        match &result {
            Ok(()) => debug!("job completed"),
            Err(e) => warn!(error = %e, "job failed"),
        }

        let failure = result.err();
        for listener in listeners {
            listener.on_after_execute(ctx, failure.as_ref()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Scheduler for InMemoryScheduler {
    #[tracing::instrument(skip(self, new_trigger, cancel), fields(trigger = %trigger_key))]
    async fn reschedule_job(
        &self,
        trigger_key: &TriggerKey,
        new_trigger: Trigger,
        cancel: &CancellationToken,
    ) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        if self.is_shut_down() {
            return Err(SchedulerError::ShutDown);
        }
        if cancel.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }

        let next_fire = next_fire_time(&new_trigger.schedule, Utc::now())?;

        let mut jobs = self.inner.jobs.write().await;
        if new_trigger.key != *trigger_key
            && jobs.values().any(|r| r.trigger.key == new_trigger.key)
        {
            return Err(SchedulerError::TriggerExists(new_trigger.key));
        }
        let record = jobs
            .values_mut()
            .find(|r| r.trigger.key == *trigger_key)
            .ok_or_else(|| SchedulerError::TriggerNotFound(trigger_key.clone()))?;

        debug!(
            job = %record.detail.key,
            new_trigger = %new_trigger.key,
            next_fire = ?next_fire,
            "rescheduled job"
        );
        record.trigger = Trigger {
            job_key: record.detail.key.clone(),
            ..new_trigger
        };
        record.next_fire = next_fire;
        record.vetoed_one_shot = false;
        Ok(next_fire)
    }
}
