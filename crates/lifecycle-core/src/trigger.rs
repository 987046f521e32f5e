use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::error::AppError;
use crate::traits::{Trigger, TriggerCallback};

/// Cron-driven trigger. Expressions have six fields, seconds first.
#[derive(Default)]
pub struct CronTrigger {
    scheduler: Mutex<Option<JobScheduler>>,
}

impl CronTrigger {
    pub fn new() -> Self {
        Self::default()
    }
}

fn scheduler_error(context: &str) -> impl FnOnce(JobSchedulerError) -> AppError + '_ {
    move |e| AppError::SchedulerError(format!("{context}: {e}"))
}

impl Trigger for CronTrigger {
    async fn start(&self, schedule: &str, callback: TriggerCallback) -> Result<(), AppError> {
        let mut slot = self.scheduler.lock().await;
        if slot.is_some() {
            return Err(AppError::SchedulerError("trigger already started".into()));
        }

        let scheduler = JobScheduler::new()
            .await
            .map_err(scheduler_error("failed to create scheduler"))?;
        let job = Job::new_async(schedule, move |_uuid, _lock| callback())
            .map_err(scheduler_error("invalid cron expression"))?;
        scheduler
            .add(job)
            .await
            .map_err(scheduler_error("failed to register job"))?;
        scheduler
            .start()
            .await
            .map_err(scheduler_error("failed to start scheduler"))?;

        tracing::info!(%schedule, "Cron trigger started");
        *slot = Some(scheduler);
        Ok(())
    }

    async fn stop(&self) -> Result<(), AppError> {
        let Some(mut scheduler) = self.scheduler.lock().await.take() else {
            return Ok(());
        };
        scheduler
            .shutdown()
            .await
            .map_err(scheduler_error("failed to stop scheduler"))?;
        tracing::info!("Cron trigger stopped");
        Ok(())
    }
}
