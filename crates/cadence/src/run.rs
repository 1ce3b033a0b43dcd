//! Simulated job under the retry policy.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use miette::{IntoDiagnostic, Result};
use tracing::info;

use cadence_retry::{
    InMemoryScheduler, JobDetail, JobExecutionError, JobExecutor, JobKey, RetryConfiguration,
    RetryPolicyEngine,
};

/// Job type reported for the simulated job.
const JOB_TYPE: &str = "cadence::FlakyJob";

/// Build an executor whose first `fail_first` runs fail.
fn flaky_executor(fail_first: u32) -> JobExecutor {
    let runs = Arc::new(AtomicU32::new(0));
    Box::new(move |job| {
        let run = runs.fetch_add(1, Ordering::SeqCst) + 1;
        Box::pin(async move {
            if run <= fail_first {
                return Err(JobExecutionError::new(format!(
                    "simulated failure {run} of {fail_first}"
                )));
            }
            info!(job = %job.key, run, "simulated job succeeded");
            Ok(())
        })
    })
}

/// Run the scheduler with one simulated job until Ctrl-C.
pub async fn run(
    name: &str,
    cron: &str,
    time_zone: Option<String>,
    max_retries: u32,
    wait_interval: u32,
    fail_first: u32,
) -> Result<()> {
    let mut configuration = RetryConfiguration::new(name, cron);
    configuration.time_zone = time_zone;
    let engine = Arc::new(RetryPolicyEngine::new(configuration).into_diagnostic()?);

    let scheduler = InMemoryScheduler::new();
    scheduler.add_listener(engine.clone()).await;

    let key = JobKey::new("flaky", "cadence");
    let detail = JobDetail::new(key.clone(), JOB_TYPE).with_retry_budget(max_retries, wait_interval);
    let next_fire = scheduler
        .schedule_job(detail, engine.primary_trigger(&key))
        .await
        .map_err(|e| miette::miette!("failed to schedule job: {}", e))?;

    info!(
        job = %key,
        cron,
        max_retries,
        wait_interval,
        fail_first,
        next_fire = ?next_fire,
        "scheduled simulated job"
    );

    // Handle shutdown signals
    let shutdown = scheduler.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        shutdown.shutdown();
    });

    scheduler.run(flaky_executor(fail_first)).await;
    Ok(())
}
