// Queue processor: polls due jobs, dispatches them by name, resolves them

use super::registry::HandlerRegistry;
use super::store::JobQueueStore;
use crate::config::Settings;
use crate::errors::{QueueError, ScheduleError};
use crate::execution_log::ExecutionLogStore;
use crate::models::QueueJob;
use crate::schedule::{parse_timezone, ConnectorSchedule};
use crate::telemetry::{self, JobOutcome};
use chrono::Utc;
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

/// Processor configuration
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub poll_interval: Duration,
    pub batch_size: u32,
    /// Jobs of one batch handled at the same time; 1 means strictly sequential
    pub concurrency: usize,
    pub default_max_retries: u32,
    pub retention_days: u32,
    pub execution_log_retention_days: Option<u32>,
    pub cleanup_schedule: ConnectorSchedule,
}

impl ProcessorConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, ScheduleError> {
        let timezone = parse_timezone(&settings.scheduler.timezone)?;
        Ok(Self {
            poll_interval: Duration::from_secs(settings.queue.poll_interval_seconds),
            batch_size: settings.queue.batch_size,
            concurrency: settings.queue.concurrency.max(1) as usize,
            default_max_retries: settings.queue.default_max_retries,
            retention_days: settings.queue.retention_days,
            execution_log_retention_days: settings.execution_log.retention_days,
            cleanup_schedule: ConnectorSchedule::parse(&settings.queue.cleanup_cron, timezone)?,
        })
    }
}

/// How a single claimed job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    /// Not claimed, or cancelled while running
    Skipped,
    Finished,
    Retried,
    Failed,
}

/// Counts for one poll tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub claimed: usize,
    pub finished: usize,
    pub retried: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A previous tick was still running
    Skipped,
    Completed(TickSummary),
}

/// Result of a retention cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub jobs_deleted: u64,
    pub logs_deleted: u64,
}

/// Single ticking consumer of the job queue
pub struct QueueProcessor {
    config: ProcessorConfig,
    store: Arc<dyn JobQueueStore>,
    registry: HandlerRegistry,
    execution_logs: Option<Arc<dyn ExecutionLogStore>>,
    in_flight: Mutex<()>,
    shutdown_tx: broadcast::Sender<()>,
}

impl QueueProcessor {
    pub fn new(
        config: ProcessorConfig,
        store: Arc<dyn JobQueueStore>,
        registry: HandlerRegistry,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            store,
            registry,
            execution_logs: None,
            in_flight: Mutex::new(()),
            shutdown_tx,
        }
    }

    /// Let the cleanup tick also prune execution logs
    pub fn with_execution_logs(mut self, logs: Arc<dyn ExecutionLogStore>) -> Self {
        self.execution_logs = Some(logs);
        self
    }

    /// Run the poll and cleanup ticks until `stop` is called
    #[instrument(skip(self))]
    pub async fn start(self: Arc<Self>) -> Result<(), QueueError> {
        info!(
            poll_interval_seconds = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            handlers = ?self.registry.names(),
            "Starting queue processor"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut next_cleanup = self.next_cleanup_deadline();

        loop {
            let deadline = next_cleanup;
            let cleanup_due = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = poll.tick() => {
                    let processor = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = processor.process_pending_jobs().await {
                            error!(error = %e, "Queue poll failed");
                        }
                    });
                }
                _ = cleanup_due => {
                    if let Err(e) = self.cleanup().await {
                        error!(error = %e, "Queue cleanup failed");
                    }
                    next_cleanup = self.next_cleanup_deadline();
                }
                _ = shutdown_rx.recv() => {
                    info!("Queue processor received shutdown signal");
                    break;
                }
            }
        }

        // Let a running tick resolve its jobs before returning
        let _running = self.in_flight.lock().await;
        info!("Queue processor stopped");
        Ok(())
    }

    pub fn stop(&self) {
        info!("Stopping queue processor");
        let _ = self.shutdown_tx.send(());
    }

    fn next_cleanup_deadline(&self) -> Option<tokio::time::Instant> {
        let now = Utc::now();
        match self.config.cleanup_schedule.next_after(now) {
            Ok(at) => {
                let delay = (at - now).to_std().unwrap_or(Duration::ZERO);
                Some(tokio::time::Instant::now() + delay)
            }
            Err(e) => {
                error!(error = %e, "Cleanup schedule has no next execution");
                None
            }
        }
    }

    /// One poll tick. Returns `Skipped` without touching the queue while another tick runs.
    #[instrument(skip(self))]
    pub async fn process_pending_jobs(&self) -> Result<TickOutcome, QueueError> {
        let _running = match self.in_flight.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Previous poll still running, skipping tick");
                return Ok(TickOutcome::Skipped);
            }
        };

        let jobs = self.store.get_pending_jobs(self.config.batch_size).await?;
        if jobs.is_empty() {
            debug!("No pending jobs");
            return Ok(TickOutcome::Completed(TickSummary::default()));
        }

        debug!(count = jobs.len(), "Processing pending jobs");

        let resolutions: Vec<Resolution> = futures::stream::iter(jobs)
            .map(|job| self.process_job(job))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let summary = resolutions
            .into_iter()
            .fold(TickSummary::default(), |mut summary, resolution| {
                match resolution {
                    Resolution::Skipped => summary.skipped += 1,
                    Resolution::Finished => summary.finished += 1,
                    Resolution::Retried => summary.retried += 1,
                    Resolution::Failed => summary.failed += 1,
                }
                if resolution != Resolution::Skipped {
                    summary.claimed += 1;
                }
                summary
            });

        telemetry::record_jobs_claimed(summary.claimed as u64);
        info!(
            claimed = summary.claimed,
            finished = summary.finished,
            retried = summary.retried,
            failed = summary.failed,
            skipped = summary.skipped,
            "Poll tick completed"
        );

        Ok(TickOutcome::Completed(summary))
    }

    #[instrument(skip(self, job), fields(job_id = job.id, job_name = %job.name))]
    async fn process_job(&self, job: QueueJob) -> Resolution {
        match self.store.mark_as_processing(job.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Job is no longer pending, skipping");
                return Resolution::Skipped;
            }
            Err(e) => {
                error!(error = %e, "Failed to claim job");
                return Resolution::Skipped;
            }
        }

        let Some(handler) = self.registry.get(&job.name) else {
            let err = QueueError::NoHandler(job.name.clone());
            error!(error = %err, "Job has no registered handler");
            return self.fail_job(&job, &err.to_string(), false).await;
        };

        let started = Instant::now();
        let result = match AssertUnwindSafe(handler.handle(&job)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "Job handler panicked");
                Err(anyhow::anyhow!("Job handler panicked: {}", message))
            }
        };
        telemetry::record_job_duration(&job.name, started.elapsed().as_secs_f64());

        match result {
            Ok(()) => match self.store.mark_as_finished(job.id).await {
                Ok(true) => {
                    info!("Job finished");
                    telemetry::record_job_outcome(&job.name, JobOutcome::Finished);
                    Resolution::Finished
                }
                Ok(false) => {
                    info!("Job was cancelled while running, leaving it cancelled");
                    Resolution::Skipped
                }
                Err(e) => {
                    error!(error = %e, "Failed to mark job as finished");
                    Resolution::Failed
                }
            },
            Err(e) => {
                let message = format!("{:#}", e);
                warn!(error = %message, "Job handler failed");
                self.fail_job(&job, &message, true).await
            }
        }
    }

    async fn fail_job(&self, job: &QueueJob, message: &str, retry: bool) -> Resolution {
        match self.store.mark_as_failed(job.id, message).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Job was cancelled while running, leaving it cancelled");
                return Resolution::Skipped;
            }
            Err(e) => {
                error!(error = %e, "Failed to mark job as failed");
                return Resolution::Failed;
            }
        }

        if !retry {
            telemetry::record_job_outcome(&job.name, JobOutcome::Failed);
            return Resolution::Failed;
        }

        let max_retries = job.max_retries().unwrap_or(self.config.default_max_retries);
        match self.store.retry_job(job.id, max_retries).await {
            Ok(true) => {
                info!(max_retries = max_retries, "Job rescheduled for retry");
                telemetry::record_job_outcome(&job.name, JobOutcome::Retried);
                Resolution::Retried
            }
            Ok(false) => {
                warn!(
                    max_retries = max_retries,
                    "Job exhausted its retries and remains failed"
                );
                telemetry::record_job_outcome(&job.name, JobOutcome::Failed);
                Resolution::Failed
            }
            Err(e) => {
                error!(error = %e, "Failed to reschedule job");
                Resolution::Failed
            }
        }
    }

    /// Retention pass: finished jobs, then execution logs when configured
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> Result<CleanupSummary, QueueError> {
        let jobs_deleted = self.store.cleanup_old_jobs(self.config.retention_days).await?;
        telemetry::record_jobs_cleaned(jobs_deleted);

        let mut logs_deleted = 0;
        if let (Some(days), Some(logs)) = (
            self.config.execution_log_retention_days,
            self.execution_logs.as_ref(),
        ) {
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
            match logs.delete_older_than(cutoff, None).await {
                Ok(n) => logs_deleted = n,
                Err(e) => error!(error = %e, "Failed to prune execution logs"),
            }
        }

        info!(
            jobs_deleted = jobs_deleted,
            logs_deleted = logs_deleted,
            retention_days = self.config.retention_days,
            "Retention cleanup completed"
        );

        Ok(CleanupSummary {
            jobs_deleted,
            logs_deleted,
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
