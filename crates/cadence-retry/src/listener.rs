//! Job lifecycle listener contract.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{JobDetail, JobExecutionError, Scheduler, SchedulerError, Trigger};

/// Everything a listener sees about one firing of a job.
pub struct JobContext {
    /// The job being run. Changes to `job.data` are persisted by the scheduler
    /// once all listeners have returned.
    pub job: JobDetail,
    /// The trigger that fired.
    pub trigger: Trigger,
    /// Handle back to the scheduler that owns the job.
    pub scheduler: Arc<dyn Scheduler>,
    /// Cancellation signal of the invoking context.
    pub cancel: CancellationToken,
}

/// Observer of job executions, registered with a scheduler under [`JobListener::name`].
///
/// For a given job the scheduler never overlaps these callbacks: each run sees
/// either `on_before_execute` then `on_after_execute`, or only
/// `on_execution_vetoed`.
#[async_trait]
pub trait JobListener: Send + Sync {
    /// Name used to register and deduplicate the listener.
    fn name(&self) -> &str;

    /// Called right before the job body runs.
    async fn on_before_execute(&self, ctx: &mut JobContext) -> Result<(), SchedulerError>;

    /// Called instead of the other callbacks when the run was vetoed.
    async fn on_execution_vetoed(&self, _ctx: &mut JobContext) -> Result<(), SchedulerError> {
        Ok(())
    }

    /// Called after the job body ran. `failure` is `None` on success.
    async fn on_after_execute(
        &self,
        ctx: &mut JobContext,
        failure: Option<&JobExecutionError>,
    ) -> Result<(), SchedulerError>;
}
