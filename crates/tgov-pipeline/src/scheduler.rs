//! Daily cron scheduling for serve mode, plus the scheduler-miss watch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::alert::AlertSeverity;
use crate::error::PipelineError;
use crate::orchestrator::Pipeline;

/// How often serve mode re-checks for a missed daily slot.
const MISS_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Build the scheduler with the daily extraction job at the configured
/// local time.
pub async fn build_scheduler(pipeline: Arc<Pipeline>) -> Result<JobScheduler> {
    let extraction = &pipeline.config().extraction;
    let timezone: chrono_tz::Tz = extraction
        .timezone
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid extraction timezone: {}", extraction.timezone))?;
    let cron = format!("0 {} {} * * *", extraction.minute, extraction.hour);

    let scheduler = JobScheduler::new().await.context("creating scheduler")?;
    let job_pipeline = pipeline.clone();
    let job = Job::new_async_tz(cron.as_str(), timezone, move |_uuid, _lock| {
        let pipeline = job_pipeline.clone();
        Box::pin(async move {
            info!("scheduled extraction starting");
            match pipeline.run_once(None).await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    status = summary.status.as_str(),
                    "scheduled extraction finished"
                ),
                // A run already in flight holds the advisory lock; log
                // and skip this slot.
                Err(PipelineError::AlreadyRunning) => {
                    warn!("scheduled extraction skipped: run already in progress")
                }
                Err(err) => error!(error = %err, "scheduled extraction failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    scheduler.add(job).await.context("adding scheduler job")?;

    info!(
        hour = extraction.hour,
        minute = extraction.minute,
        timezone = %timezone,
        "daily extraction scheduled"
    );
    Ok(scheduler)
}

/// Periodically check whether the daily slot was missed and alert once
/// per stale period.
pub fn spawn_miss_watch(pipeline: Arc<Pipeline>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MISS_CHECK_INTERVAL);
        // The first tick fires immediately; skip it so a fresh deploy
        // with an empty log does not alert at startup.
        interval.tick().await;
        let mut alerted = false;

        loop {
            interval.tick().await;
            match pipeline.check_scheduler_miss().await {
                Some(message) if !alerted => {
                    warn!(miss = %message, "scheduler miss detected");
                    pipeline
                        .alerter()
                        .send("Scheduler miss", &message, AlertSeverity::Warning)
                        .await;
                    alerted = true;
                }
                Some(_) => {}
                None => alerted = false,
            }
        }
    })
}
