//! Retry-on-failure policy.
//!
//! [`RetryPolicyEngine`] listens to job executions and moves each job between
//! two cadences:
//! - the primary cadence, a cron trigger built from [`RetryConfiguration`]
//! - the retry cadence, a one-shot trigger `WaitInterval` seconds after a failure
//!
//! A job stays on the retry cadence until it succeeds or its attempt count
//! exceeds `MaxRetries`. All bookkeeping lives in the job's own data map as a
//! [`JobRetryState`], so one engine can supervise any number of jobs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::report::{RetriesExhausted, RetryReporter, RetryScheduled, TracingReporter};
use crate::{
    JobContext, JobDataMap, JobExecutionError, JobKey, JobListener, JobRetryState,
    MAX_RETRIES_KEY, RetryConfiguration, SchedulerError, Trigger, TriggerKey, WAIT_INTERVAL_KEY,
};

/// Listener that reschedules failed jobs onto a fixed-interval retry trigger.
pub struct RetryPolicyEngine {
    configuration: RetryConfiguration,
    reporter: Arc<dyn RetryReporter>,
}

impl RetryPolicyEngine {
    /// Create an engine reporting through `tracing`.
    ///
    /// Only the presence of each setting is checked here. The cron expression
    /// and time zone are parsed when a trigger is scheduled, so schedule the
    /// job with [`RetryPolicyEngine::primary_trigger`] at startup to surface a
    /// bad primary schedule before the first failure needs it.
    pub fn new(configuration: RetryConfiguration) -> Result<Self, SchedulerError> {
        configuration.validate()?;
        Ok(Self {
            configuration,
            reporter: Arc::new(TracingReporter),
        })
    }

    /// Replace the reporting sink.
    pub fn with_reporter(mut self, reporter: Arc<dyn RetryReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn configuration(&self) -> &RetryConfiguration {
        &self.configuration
    }

    /// Build the cron trigger of the primary cadence for a job.
    pub fn primary_trigger(&self, job_key: &JobKey) -> Trigger {
        Trigger::cron(
            TriggerKey::unique(job_key.group.clone()),
            job_key.clone(),
            self.configuration.primary_schedule.clone(),
            self.configuration.time_zone.clone(),
        )
    }

    /// Move the job back onto its primary cadence.
    ///
    /// The on-retry flag is only cleared once the scheduler accepted the trigger.
    async fn restore_primary(
        &self,
        ctx: &mut JobContext,
        state: &mut JobRetryState,
    ) -> Result<(), SchedulerError> {
        let trigger = self.primary_trigger(&ctx.job.key);
        let next_fire = ctx
            .scheduler
            .reschedule_job(&ctx.trigger.key, trigger, &ctx.cancel)
            .await?;

        state.on_retry_schedule = false;
        state.store(&mut ctx.job.data);
        info!(
            job = %ctx.job.key,
            schedule = %self.configuration.primary_schedule,
            next_fire = ?next_fire,
            "restored primary schedule"
        );
        Ok(())
    }

    async fn handle_failure(
        &self,
        ctx: &mut JobContext,
        mut state: JobRetryState,
        failure: &JobExecutionError,
    ) -> Result<(), SchedulerError> {
        let max_retries = read_tunable(&ctx.job.data, MAX_RETRIES_KEY, &ctx.job.key);
        let wait_interval_secs = read_tunable(&ctx.job.data, WAIT_INTERVAL_KEY, &ctx.job.key);

        // Strictly greater: a job gets max_retries + 1 attempts in total.
        if state.attempt_count > max_retries {
            self.reporter.retries_exhausted(&RetriesExhausted {
                job: &ctx.job.key,
                job_type: &ctx.job.job_type,
                failure,
                max_retries,
                attempts: state.attempt_count,
            });

            state.attempt_count = 0;
            state.store(&mut ctx.job.data);
            return self.restore_primary(ctx, &mut state).await;
        }

        let fire_at = Utc::now() + Duration::seconds(i64::from(wait_interval_secs));
        let retry_trigger = Trigger::once(
            TriggerKey::unique(ctx.job.key.group.clone()),
            ctx.job.key.clone(),
            fire_at,
        );

        self.reporter.retry_scheduled(&RetryScheduled {
            job: &ctx.job.key,
            job_type: &ctx.job.job_type,
            failure,
            wait_interval_secs,
            attempt: state.attempt_count,
            fire_at,
        });

        ctx.scheduler
            .reschedule_job(&ctx.trigger.key, retry_trigger, &ctx.cancel)
            .await?;

        state.on_retry_schedule = true;
        state.store(&mut ctx.job.data);
        Ok(())
    }
}

/// Read a non-negative integer tunable, treating anything unusable as 0.
fn read_tunable(data: &JobDataMap, key: &str, job: &JobKey) -> u32 {
    match data.get_u32(key) {
        Some(value) => value,
        None => {
            warn!(job = %job, key, value = ?data.get(key), "missing or invalid tunable, using 0");
            0
        }
    }
}

#[async_trait]
impl JobListener for RetryPolicyEngine {
    fn name(&self) -> &str {
        &self.configuration.name
    }

    async fn on_before_execute(&self, ctx: &mut JobContext) -> Result<(), SchedulerError> {
        let mut state = JobRetryState::load(&ctx.job.data);
        state.attempt_count = state.attempt_count.saturating_add(1);
        state.store(&mut ctx.job.data);

        debug!(job = %ctx.job.key, attempt = state.attempt_count, "job about to execute");
        Ok(())
    }

    async fn on_after_execute(
        &self,
        ctx: &mut JobContext,
        failure: Option<&JobExecutionError>,
    ) -> Result<(), SchedulerError> {
        let mut state = JobRetryState::load(&ctx.job.data);

        match failure {
            None => {
                state.attempt_count = 0;
                state.store(&mut ctx.job.data);

                if state.on_retry_schedule {
                    self.restore_primary(ctx, &mut state).await?;
                }
                Ok(())
            }
            Some(failure) => self.handle_failure(ctx, state, failure).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    use crate::{JobDetail, Scheduler, TriggerSchedule};

    /// Scheduler fake that records every reschedule.
    #[derive(Default)]
    struct RecordingScheduler {
        calls: Mutex<Vec<(TriggerKey, Trigger, bool)>>,
        fail: bool,
    }

    impl RecordingScheduler {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<(TriggerKey, Trigger, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Scheduler for RecordingScheduler {
        async fn reschedule_job(
            &self,
            trigger_key: &TriggerKey,
            new_trigger: Trigger,
            cancel: &CancellationToken,
        ) -> Result<Option<DateTime<Utc>>, SchedulerError> {
            self.calls.lock().unwrap().push((
                trigger_key.clone(),
                new_trigger,
                cancel.is_cancelled(),
            ));
            if self.fail {
                return Err(SchedulerError::ShutDown);
            }
            Ok(None)
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        retries: Mutex<Vec<(u32, u32)>>,
        exhausted: Mutex<Vec<(u32, u32)>>,
    }

    impl RetryReporter for RecordingReporter {
        fn retry_scheduled(&self, event: &RetryScheduled<'_>) {
            self.retries
                .lock()
                .unwrap()
                .push((event.attempt, event.wait_interval_secs));
        }

        fn retries_exhausted(&self, event: &RetriesExhausted<'_>) {
            self.exhausted
                .lock()
                .unwrap()
                .push((event.attempts, event.max_retries));
        }
    }

    fn engine(reporter: Arc<RecordingReporter>) -> RetryPolicyEngine {
        RetryPolicyEngine::new(
            RetryConfiguration::new("retry", "0 0 * * * *").with_time_zone("+02:00"),
        )
        .unwrap()
        .with_reporter(reporter)
    }

    fn context(scheduler: Arc<RecordingScheduler>, max_retries: u32, wait: u32) -> JobContext {
        let key = JobKey::new("sync", "billing");
        JobContext {
            job: JobDetail::new(key.clone(), "SyncJob").with_retry_budget(max_retries, wait),
            trigger: Trigger::cron(
                TriggerKey::new("primary", "billing"),
                key,
                "0 0 * * * *",
                None,
            ),
            scheduler,
            cancel: CancellationToken::new(),
        }
    }

    fn state(ctx: &JobContext) -> JobRetryState {
        JobRetryState::load(&ctx.job.data)
    }

    #[test]
    fn test_name_is_configuration_name() {
        let engine = engine(Arc::default());
        assert_eq!(engine.name(), "retry");
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        let result = RetryPolicyEngine::new(RetryConfiguration::new("retry", " "));
        assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_before_execute_increments_without_cap() {
        let engine = engine(Arc::default());
        let mut ctx = context(Arc::default(), 1, 10);

        engine.on_before_execute(&mut ctx).await.unwrap();
        assert_eq!(state(&ctx).attempt_count, 1);

        // No intervening on_after_execute: still increments
        engine.on_before_execute(&mut ctx).await.unwrap();
        engine.on_before_execute(&mut ctx).await.unwrap();
        assert_eq!(state(&ctx).attempt_count, 3);
    }

    #[tokio::test]
    async fn test_vetoed_changes_nothing() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let engine = engine(Arc::default());
        let mut ctx = context(scheduler.clone(), 1, 10);
        engine.on_before_execute(&mut ctx).await.unwrap();
        let before = ctx.job.data.clone();

        engine.on_execution_vetoed(&mut ctx).await.unwrap();

        assert_eq!(ctx.job.data, before);
        assert!(scheduler.calls().is_empty());
    }

    #[tokio::test]
    async fn test_success_on_primary_does_not_reschedule() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let engine = engine(Arc::default());
        let mut ctx = context(scheduler.clone(), 1, 10);

        engine.on_before_execute(&mut ctx).await.unwrap();
        engine.on_after_execute(&mut ctx, None).await.unwrap();

        assert_eq!(state(&ctx), JobRetryState::default());
        assert!(scheduler.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failure_within_budget_schedules_one_shot() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let reporter = Arc::new(RecordingReporter::default());
        let engine = engine(reporter.clone());
        let mut ctx = context(scheduler.clone(), 3, 30);
        let failure = JobExecutionError::new("boom");

        let before = Utc::now();
        engine.on_before_execute(&mut ctx).await.unwrap();
        engine
            .on_after_execute(&mut ctx, Some(&failure))
            .await
            .unwrap();
        let after = Utc::now();

        assert_eq!(
            state(&ctx),
            JobRetryState {
                attempt_count: 1,
                on_retry_schedule: true
            }
        );

        let calls = scheduler.calls();
        assert_eq!(calls.len(), 1);
        let (replaced, trigger, _) = &calls[0];
        assert_eq!(replaced, &TriggerKey::new("primary", "billing"));
        assert_eq!(trigger.key.group, "billing");
        assert_eq!(trigger.job_key, JobKey::new("sync", "billing"));
        match trigger.schedule {
            TriggerSchedule::Once { at } => {
                assert!(at >= before + Duration::seconds(30));
                assert!(at <= after + Duration::seconds(30));
            }
            ref other => panic!("expected one-shot trigger, got {other:?}"),
        }
        assert_eq!(*reporter.retries.lock().unwrap(), vec![(1, 30)]);
        assert!(reporter.exhausted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_success_after_retry_restores_primary() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let engine = engine(Arc::default());
        let mut ctx = context(scheduler.clone(), 3, 30);

        engine.on_before_execute(&mut ctx).await.unwrap();
        engine
            .on_after_execute(&mut ctx, Some(&JobExecutionError::new("boom")))
            .await
            .unwrap();
        engine.on_before_execute(&mut ctx).await.unwrap();
        engine.on_after_execute(&mut ctx, None).await.unwrap();

        assert_eq!(state(&ctx), JobRetryState::default());
        let calls = scheduler.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[1].1.schedule,
            TriggerSchedule::Cron {
                expression: "0 0 * * * *".to_string(),
                time_zone: Some("+02:00".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_exhaustion_uses_strict_comparison() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let reporter = Arc::new(RecordingReporter::default());
        let engine = engine(reporter.clone());
        let mut ctx = context(scheduler.clone(), 2, 5);
        let failure = JobExecutionError::new("boom");

        // Attempts 1 and 2 stay within budget
        for attempt in 1..=2 {
            engine.on_before_execute(&mut ctx).await.unwrap();
            engine
                .on_after_execute(&mut ctx, Some(&failure))
                .await
                .unwrap();
            assert_eq!(state(&ctx).attempt_count, attempt);
            assert!(state(&ctx).on_retry_schedule);
        }

        // Attempt 3 exceeds max_retries = 2
        engine.on_before_execute(&mut ctx).await.unwrap();
        engine
            .on_after_execute(&mut ctx, Some(&failure))
            .await
            .unwrap();

        assert_eq!(state(&ctx), JobRetryState::default());
        assert_eq!(*reporter.exhausted.lock().unwrap(), vec![(3, 2)]);
        assert_eq!(reporter.retries.lock().unwrap().len(), 2);

        let calls = scheduler.calls();
        assert_eq!(calls.len(), 3);
        assert!(!calls[2].1.is_one_shot());
    }

    #[tokio::test]
    async fn test_missing_tunables_exhaust_immediately() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let reporter = Arc::new(RecordingReporter::default());
        let engine = engine(reporter.clone());
        let mut ctx = context(scheduler.clone(), 0, 0);
        ctx.job.data.remove(MAX_RETRIES_KEY);
        ctx.job.data.put(WAIT_INTERVAL_KEY, "soon");

        engine.on_before_execute(&mut ctx).await.unwrap();
        engine
            .on_after_execute(&mut ctx, Some(&JobExecutionError::new("boom")))
            .await
            .unwrap();

        assert_eq!(*reporter.exhausted.lock().unwrap(), vec![(1, 0)]);
        assert_eq!(scheduler.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_failure_propagates_and_keeps_flag() {
        let scheduler = Arc::new(RecordingScheduler::failing());
        let engine = engine(Arc::default());
        let mut ctx = context(scheduler.clone(), 3, 30);

        engine.on_before_execute(&mut ctx).await.unwrap();
        let result = engine
            .on_after_execute(&mut ctx, Some(&JobExecutionError::new("boom")))
            .await;

        assert!(matches!(result, Err(SchedulerError::ShutDown)));
        // The counter is bookkeeping and stays; the cadence did not change
        assert_eq!(
            state(&ctx),
            JobRetryState {
                attempt_count: 1,
                on_retry_schedule: false
            }
        );
    }

    #[tokio::test]
    async fn test_cancellation_token_is_passed_through() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let engine = engine(Arc::default());
        let mut ctx = context(scheduler.clone(), 3, 30);
        ctx.cancel.cancel();

        engine.on_before_execute(&mut ctx).await.unwrap();
        engine
            .on_after_execute(&mut ctx, Some(&JobExecutionError::new("boom")))
            .await
            .unwrap();

        let calls = scheduler.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].2, "reschedule should observe the cancelled token");
    }

    #[tokio::test]
    async fn test_one_engine_tracks_jobs_independently() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let engine = engine(Arc::default());
        let mut failing = context(scheduler.clone(), 3, 30);
        let mut healthy = context(scheduler.clone(), 3, 30);
        healthy.job.key = JobKey::new("report", "billing");

        engine.on_before_execute(&mut failing).await.unwrap();
        engine
            .on_after_execute(&mut failing, Some(&JobExecutionError::new("boom")))
            .await
            .unwrap();
        engine.on_before_execute(&mut healthy).await.unwrap();
        engine.on_after_execute(&mut healthy, None).await.unwrap();

        assert!(state(&failing).on_retry_schedule);
        assert!(!state(&healthy).on_retry_schedule);
        // Only the failing job was rescheduled
        assert_eq!(scheduler.calls().len(), 1);
    }
}
