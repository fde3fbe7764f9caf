// Job queue store interface

use crate::errors::QueueError;
use crate::models::{JobStatus, NewJob, Pagination, QueueJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Fixed delay before a failed job becomes due again
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Operator query over the job table
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub pagination: Pagination,
}

impl JobFilter {
    /// True when `job` passes the status and `scheduledAt` range filters
    pub fn matches(&self, job: &QueueJob) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.from_date.map_or(true, |from| job.scheduled_at >= from)
            && self.to_date.map_or(true, |to| job.scheduled_at <= to)
    }
}

/// Durable at-least-once work queue
///
/// Status transitions:
/// `pending → processing → finished | failed`, `failed → pending` (retry),
/// `pending | processing → cancelled`.
#[async_trait]
pub trait JobQueueStore: Send + Sync {
    /// Insert a job in `pending` with zero attempts
    async fn create_job(&self, job: NewJob) -> Result<QueueJob, QueueError>;

    /// Due pending jobs, oldest `scheduled_at` first
    async fn get_pending_jobs(&self, limit: u32) -> Result<Vec<QueueJob>, QueueError>;

    /// Atomically claim a pending job. Returns false when the job is no longer pending.
    async fn mark_as_processing(&self, id: i64) -> Result<bool, QueueError>;

    /// Resolve a processing job as finished. Returns false (no-op) for any other status.
    async fn mark_as_finished(&self, id: i64) -> Result<bool, QueueError>;

    /// Resolve a processing job as failed. Returns false (no-op) for any other status.
    async fn mark_as_failed(&self, id: i64, message: &str) -> Result<bool, QueueError>;

    /// Requeue a failed job while `attempts < max_retries`
    ///
    /// Returns false, leaving the job untouched, once the attempts are exhausted.
    async fn retry_job(&self, id: i64, max_retries: u32) -> Result<bool, QueueError>;

    /// Cancel a pending or processing job
    async fn cancel_job(&self, id: i64) -> Result<QueueJob, QueueError>;

    /// Delete finished jobs processed more than `retention_days` ago
    async fn cleanup_old_jobs(&self, retention_days: u32) -> Result<u64, QueueError>;

    async fn find_one(&self, id: i64) -> Result<QueueJob, QueueError>;

    /// Filtered page, newest `scheduled_at` first
    async fn find_all(&self, filter: &JobFilter) -> Result<Vec<QueueJob>, QueueError>;

    async fn count(&self, filter: &JobFilter) -> Result<u64, QueueError>;
}
