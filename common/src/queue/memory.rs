// In-memory job queue store

use super::store::{JobFilter, JobQueueStore, DEFAULT_RETRY_DELAY};
use crate::errors::QueueError;
use crate::models::{JobStatus, NewJob, QueueJob};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    jobs: BTreeMap<i64, QueueJob>,
}

/// Process-local queue store with the same state machine as the Postgres store
#[derive(Debug)]
pub struct InMemoryJobQueueStore {
    inner: Mutex<Inner>,
    retry_delay: Duration,
}

impl Default for InMemoryJobQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobQueueStore {
    pub fn new() -> Self {
        Self::with_retry_delay(DEFAULT_RETRY_DELAY)
    }

    pub fn with_retry_delay(retry_delay: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            retry_delay,
        }
    }

    /// Insert a fully-formed job, keeping its id; used to seed historical rows
    pub async fn seed(&self, job: QueueJob) {
        let mut inner = self.inner.lock().await;
        inner.next_id = inner.next_id.max(job.id);
        inner.jobs.insert(job.id, job);
    }

    pub async fn all_jobs(&self) -> Vec<QueueJob> {
        self.inner.lock().await.jobs.values().cloned().collect()
    }
}

fn invalid(job: &QueueJob, action: &'static str) -> QueueError {
    QueueError::InvalidTransition {
        id: job.id,
        status: job.status.to_string(),
        action,
    }
}

#[async_trait]
impl JobQueueStore for InMemoryJobQueueStore {
    async fn create_job(&self, job: NewJob) -> Result<QueueJob, QueueError> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let created = QueueJob {
            id: inner.next_id,
            name: job.name,
            payload: job.payload,
            scheduled_at: job.scheduled_at,
            status: JobStatus::Pending,
            attempts: 0,
            error_message: None,
            processed_at: None,
            entry_user_id: job.entry_user_id,
            created_at: Utc::now(),
        };
        inner.jobs.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_pending_jobs(&self, limit: u32) -> Result<Vec<QueueJob>, QueueError> {
        let now = Utc::now();
        let inner = self.inner.lock().await;
        let mut due: Vec<QueueJob> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.scheduled_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn mark_as_processing(&self, id: i64) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Processing;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(QueueError::JobNotFound(id)),
        }
    }

    async fn mark_as_finished(&self, id: i64) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = JobStatus::Finished;
                job.attempts += 1;
                job.processed_at = Some(Utc::now());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(QueueError::JobNotFound(id)),
        }
    }

    async fn mark_as_failed(&self, id: i64, message: &str) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = JobStatus::Failed;
                job.attempts += 1;
                job.error_message = Some(message.to_string());
                job.processed_at = Some(Utc::now());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(QueueError::JobNotFound(id)),
        }
    }

    async fn retry_job(&self, id: i64, max_retries: u32) -> Result<bool, QueueError> {
        let delay = chrono::Duration::from_std(self.retry_delay)
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or(QueueError::JobNotFound(id))?;

        if job.status != JobStatus::Failed {
            return Err(invalid(job, "retried"));
        }
        if job.attempts >= i32::try_from(max_retries).unwrap_or(i32::MAX) {
            return Ok(false);
        }

        job.status = JobStatus::Pending;
        job.scheduled_at = Utc::now() + delay;
        Ok(true)
    }

    async fn cancel_job(&self, id: i64) -> Result<QueueJob, QueueError> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or(QueueError::JobNotFound(id))?;

        match job.status {
            JobStatus::Pending | JobStatus::Processing => {
                job.status = JobStatus::Cancelled;
                job.processed_at = Some(Utc::now());
                Ok(job.clone())
            }
            _ => Err(invalid(job, "cancelled")),
        }
    }

    async fn cleanup_old_jobs(&self, retention_days: u32) -> Result<u64, QueueError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let mut inner = self.inner.lock().await;
        let before = inner.jobs.len();
        inner.jobs.retain(|_, job| {
            !(job.status == JobStatus::Finished && job.processed_at.is_some_and(|p| p < cutoff))
        });
        Ok((before - inner.jobs.len()) as u64)
    }

    async fn find_one(&self, id: i64) -> Result<QueueJob, QueueError> {
        self.inner
            .lock()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or(QueueError::JobNotFound(id))
    }

    async fn find_all(&self, filter: &JobFilter) -> Result<Vec<QueueJob>, QueueError> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<QueueJob> = inner
            .jobs
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at).then(b.id.cmp(&a.id)));
        Ok(jobs
            .into_iter()
            .skip(filter.pagination.offset() as usize)
            .take(filter.pagination.page_size as usize)
            .collect())
    }

    async fn count(&self, filter: &JobFilter) -> Result<u64, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.values().filter(|j| filter.matches(j)).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Pagination;

    fn new_job(name: &str, offset_secs: i64) -> NewJob {
        NewJob {
            name: name.to_string(),
            payload: serde_json::json!({ "connectorId": 1 }),
            scheduled_at: Utc::now() + chrono::Duration::seconds(offset_secs),
            entry_user_id: 1,
        }
    }

    async fn failed_job(store: &InMemoryJobQueueStore) -> QueueJob {
        let job = store.create_job(new_job("connector.import", -5)).await.unwrap();
        assert!(store.mark_as_processing(job.id).await.unwrap());
        assert!(store.mark_as_failed(job.id, "boom").await.unwrap());
        store.find_one(job.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_retry_ceiling_above_i32_range_still_retries() {
        let store = InMemoryJobQueueStore::with_retry_delay(Duration::ZERO);
        let job = failed_job(&store).await;
        assert!(store.retry_job(job.id, u32::MAX).await.unwrap());
        assert_eq!(store.find_one(job.id).await.unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_create_job_starts_pending() {
        let store = InMemoryJobQueueStore::new();
        let job = store.create_job(new_job("connector.import", 0)).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.error_message.is_none());
    }

    #[tokio::test]
    async fn test_pending_jobs_oldest_first_and_bounded() {
        let store = InMemoryJobQueueStore::new();
        let late = store.create_job(new_job("a", -10)).await.unwrap();
        let early = store.create_job(new_job("b", -100)).await.unwrap();
        let middle = store.create_job(new_job("c", -50)).await.unwrap();
        store.create_job(new_job("future", 3600)).await.unwrap();

        let pending = store.get_pending_jobs(10).await.unwrap();
        let ids: Vec<i64> = pending.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![early.id, middle.id, late.id]);

        let bounded = store.get_pending_jobs(2).await.unwrap();
        assert_eq!(bounded.len(), 2);
        assert_eq!(bounded[0].id, early.id);
    }

    #[tokio::test]
    async fn test_claim_is_compare_and_swap() {
        let store = InMemoryJobQueueStore::new();
        let job = store.create_job(new_job("a", -1)).await.unwrap();
        assert!(store.mark_as_processing(job.id).await.unwrap());
        assert!(!store.mark_as_processing(job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_finish_increments_attempts() {
        let store = InMemoryJobQueueStore::new();
        let job = store.create_job(new_job("a", -1)).await.unwrap();
        store.mark_as_processing(job.id).await.unwrap();
        assert!(store.mark_as_finished(job.id).await.unwrap());

        let job = store.find_one(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.attempts, 1);
        assert!(job.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_records_message() {
        let store = InMemoryJobQueueStore::new();
        let job = failed_job(&store).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_retry_requeues_with_delay() {
        let store = InMemoryJobQueueStore::new();
        let job = failed_job(&store).await;

        let before = Utc::now();
        assert!(store.retry_job(job.id, 3).await.unwrap());
        let job = store.find_one(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.scheduled_at >= before + chrono::Duration::seconds(59));
        assert!(store.get_pending_jobs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_exhausted_is_idempotent() {
        let store = InMemoryJobQueueStore::new();
        let job = failed_job(&store).await;

        assert!(!store.retry_job(job.id, 1).await.unwrap());
        assert!(!store.retry_job(job.id, 1).await.unwrap());
        let after = store.find_one(job.id).await.unwrap();
        assert_eq!(after.status, JobStatus::Failed);
        assert_eq!(after.attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_rejects_non_failed_and_unknown() {
        let store = InMemoryJobQueueStore::new();
        let job = store.create_job(new_job("a", 0)).await.unwrap();
        assert!(matches!(
            store.retry_job(job.id, 3).await,
            Err(QueueError::InvalidTransition { .. })
        ));
        assert!(matches!(
            store.retry_job(999, 3).await,
            Err(QueueError::JobNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_cancel_then_finish_is_noop() {
        let store = InMemoryJobQueueStore::new();
        let job = store.create_job(new_job("a", -1)).await.unwrap();
        store.mark_as_processing(job.id).await.unwrap();
        store.cancel_job(job.id).await.unwrap();

        assert!(!store.mark_as_finished(job.id).await.unwrap());
        assert!(!store.mark_as_failed(job.id, "late").await.unwrap());
        let job = store.find_one(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.error_message.is_none());
    }

    #[tokio::test]
    async fn test_cancel_rejects_terminal_jobs() {
        let store = InMemoryJobQueueStore::new();
        let job = failed_job(&store).await;
        assert!(matches!(
            store.cancel_job(job.id).await,
            Err(QueueError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_cleanup_only_removes_old_finished() {
        let store = InMemoryJobQueueStore::new();
        let now = Utc::now();
        let seeded = |id: i64, status: JobStatus, days_ago: i64| QueueJob {
            id,
            name: "connector.import".to_string(),
            payload: serde_json::json!({}),
            scheduled_at: now - chrono::Duration::days(days_ago),
            status,
            attempts: 1,
            error_message: None,
            processed_at: Some(now - chrono::Duration::days(days_ago)),
            entry_user_id: 1,
            created_at: now - chrono::Duration::days(days_ago),
        };
        store.seed(seeded(1, JobStatus::Finished, 31)).await;
        store.seed(seeded(2, JobStatus::Finished, 1)).await;
        store.seed(seeded(3, JobStatus::Failed, 400)).await;
        store.seed(seeded(4, JobStatus::Cancelled, 400)).await;

        assert_eq!(store.cleanup_old_jobs(30).await.unwrap(), 1);
        let ids: Vec<i64> = store.all_jobs().await.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![2, 3, 4]);

        // seeded ids do not collide with new ones
        let created = store.create_job(new_job("a", 0)).await.unwrap();
        assert_eq!(created.id, 5);
    }

    #[tokio::test]
    async fn test_find_all_filters_and_pages_newest_first() {
        let store = InMemoryJobQueueStore::new();
        for offset in [-300, -200, -100] {
            store.create_job(new_job("a", offset)).await.unwrap();
        }
        let failed = failed_job(&store).await;

        let filter = JobFilter {
            status: Some(JobStatus::Pending),
            pagination: Pagination::new(Some(1), Some(2)),
            ..Default::default()
        };
        let page = store.find_all(&filter).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[0].scheduled_at > page[1].scheduled_at);
        assert_eq!(store.count(&filter).await.unwrap(), 3);

        let failed_filter = JobFilter {
            status: Some(JobStatus::Failed),
            ..Default::default()
        };
        let found = store.find_all(&failed_filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, failed.id);
    }
}
