//! Lifecycle scheduler wiring: runs `domains::incidents::
//! LifecycleScheduler::sweep` on a fixed period via `tokio-cron-scheduler`.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::domains::incidents::LifecycleScheduler;

/// Starts the lifecycle sweep on `period`. Returns the running
/// `JobScheduler`; callers must keep it alive for the sweep to keep firing
/// (dropping it stops the scheduler).
pub async fn start_lifecycle_scheduler(
    lifecycle: Arc<LifecycleScheduler>,
    period: std::time::Duration,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_repeated_async(period, move |_uuid, _lock| {
        let lifecycle = Arc::clone(&lifecycle);
        Box::pin(async move {
            match lifecycle.sweep(Utc::now()).await {
                Ok(expired) if expired.is_empty() => {
                    tracing::debug!("lifecycle sweep tick: nothing expired");
                }
                Ok(expired) => {
                    tracing::info!(count = expired.len(), "lifecycle sweep tick: expired incidents");
                }
                Err(err) => {
                    tracing::error!(error = %err, "lifecycle sweep tick failed");
                }
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    tracing::info!(period_secs = period.as_secs(), "lifecycle scheduler started");
    Ok(scheduler)
}
