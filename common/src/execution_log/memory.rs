// In-memory execution log store

use super::{ExecutionLogFilter, ExecutionLogStore};
use crate::errors::StorageError;
use crate::models::{ConnectorExecutionStats, ExecutionLog, NewExecutionLog};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    logs: Vec<ExecutionLog>,
}

#[derive(Debug, Default)]
pub struct InMemoryExecutionLogStore {
    inner: Mutex<Inner>,
}

impl InMemoryExecutionLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored log, oldest first
    pub async fn all(&self) -> Vec<ExecutionLog> {
        self.inner.lock().await.logs.clone()
    }
}

fn newest_first(logs: &mut [ExecutionLog]) {
    logs.sort_by(|a, b| {
        b.execution_start_datetime
            .cmp(&a.execution_start_datetime)
            .then(b.id.cmp(&a.id))
    });
}

#[async_trait]
impl ExecutionLogStore for InMemoryExecutionLogStore {
    async fn create(&self, log: NewExecutionLog) -> Result<ExecutionLog, StorageError> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let total_errors = log.total_errors();
        let created = ExecutionLog {
            id: inner.next_id,
            connector_id: log.connector_id,
            execution_start_datetime: log.execution_start_datetime,
            execution_end_datetime: log.execution_end_datetime,
            execution_activities: log.execution_activities,
            total_errors,
            entry_user_id: log.entry_user_id,
            entry_date_time: Utc::now(),
        };
        inner.logs.push(created.clone());
        Ok(created)
    }

    async fn find_one(&self, id: i64) -> Result<ExecutionLog, StorageError> {
        self.inner
            .lock()
            .await
            .logs
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("Execution log {}", id)))
    }

    async fn find_all(
        &self,
        filter: &ExecutionLogFilter,
    ) -> Result<Vec<ExecutionLog>, StorageError> {
        let mut logs: Vec<ExecutionLog> = self
            .inner
            .lock()
            .await
            .logs
            .iter()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect();
        newest_first(&mut logs);
        Ok(logs
            .into_iter()
            .skip(filter.pagination.offset() as usize)
            .take(filter.pagination.page_size as usize)
            .collect())
    }

    async fn count(&self, filter: &ExecutionLogFilter) -> Result<u64, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner.logs.iter().filter(|l| filter.matches(l)).count() as u64)
    }

    async fn find_latest_by_connector(
        &self,
        connector_id: i64,
    ) -> Result<Option<ExecutionLog>, StorageError> {
        let mut logs: Vec<ExecutionLog> = self
            .inner
            .lock()
            .await
            .logs
            .iter()
            .filter(|l| l.connector_id == connector_id)
            .cloned()
            .collect();
        newest_first(&mut logs);
        Ok(logs.into_iter().next())
    }

    async fn delete(&self, id: i64) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        let before = inner.logs.len();
        inner.logs.retain(|l| l.id != id);
        if inner.logs.len() == before {
            return Err(StorageError::NotFound(format!("Execution log {}", id)));
        }
        Ok(())
    }

    async fn delete_by_connector(&self, connector_id: i64) -> Result<u64, StorageError> {
        let mut inner = self.inner.lock().await;
        let before = inner.logs.len();
        inner.logs.retain(|l| l.connector_id != connector_id);
        Ok((before - inner.logs.len()) as u64)
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        connector_id: Option<i64>,
    ) -> Result<u64, StorageError> {
        let mut inner = self.inner.lock().await;
        let before = inner.logs.len();
        inner.logs.retain(|l| {
            let in_scope = connector_id.map_or(true, |id| l.connector_id == id);
            !(in_scope && l.execution_start_datetime < cutoff)
        });
        Ok((before - inner.logs.len()) as u64)
    }

    async fn connector_stats(
        &self,
        connector_id: i64,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<ConnectorExecutionStats, StorageError> {
        let filter = ExecutionLogFilter {
            connector_id: Some(connector_id),
            start_date,
            end_date,
            ..Default::default()
        };
        let inner = self.inner.lock().await;
        Ok(ConnectorExecutionStats::from_logs(
            inner.logs.iter().filter(|l| filter.matches(l)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionActivity, ExportActivity, ExportFileResult, Pagination};
    use chrono::TimeZone;

    fn run(connector_id: i64, hour: u32, error: Option<&str>) -> NewExecutionLog {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap();
        NewExecutionLog {
            connector_id,
            execution_start_datetime: start,
            execution_end_datetime: start + chrono::Duration::minutes(1),
            execution_activities: vec![ExecutionActivity::Export(ExportActivity {
                file_pattern: None,
                specification_id: 1,
                processed_files: vec![ExportFileResult {
                    processed_file_name: Some("out.csv".to_string()),
                    error_message: error.map(str::to_string),
                }],
                error_message: None,
            })],
            entry_user_id: 1,
        }
    }

    #[tokio::test]
    async fn test_create_derives_total_errors() {
        let store = InMemoryExecutionLogStore::new();
        let ok = store.create(run(1, 1, None)).await.unwrap();
        let bad = store.create(run(1, 2, Some("upload failed"))).await.unwrap();
        assert_eq!(ok.total_errors, 0);
        assert_eq!(bad.total_errors, 1);
    }

    #[tokio::test]
    async fn test_find_all_filters_newest_first() {
        let store = InMemoryExecutionLogStore::new();
        store.create(run(1, 1, None)).await.unwrap();
        store.create(run(1, 3, Some("x"))).await.unwrap();
        store.create(run(2, 2, None)).await.unwrap();

        let all = store.find_all(&ExecutionLogFilter::default()).await.unwrap();
        let hours: Vec<u32> = all
            .iter()
            .map(|l| chrono::Timelike::hour(&l.execution_start_datetime))
            .collect();
        assert_eq!(hours, vec![3, 2, 1]);

        let errors_only = ExecutionLogFilter {
            has_errors: Some(true),
            ..Default::default()
        };
        assert_eq!(store.count(&errors_only).await.unwrap(), 1);

        let paged = ExecutionLogFilter {
            connector_id: Some(1),
            pagination: Pagination::new(Some(2), Some(1)),
            ..Default::default()
        };
        let page = store.find_all(&paged).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(chrono::Timelike::hour(&page[0].execution_start_datetime), 1);
    }

    #[tokio::test]
    async fn test_latest_by_connector() {
        let store = InMemoryExecutionLogStore::new();
        assert!(store.find_latest_by_connector(1).await.unwrap().is_none());
        store.create(run(1, 5, None)).await.unwrap();
        let latest = store.create(run(1, 9, None)).await.unwrap();
        store.create(run(2, 12, None)).await.unwrap();
        assert_eq!(
            store.find_latest_by_connector(1).await.unwrap().map(|l| l.id),
            Some(latest.id)
        );
    }

    #[tokio::test]
    async fn test_delete_variants() {
        let store = InMemoryExecutionLogStore::new();
        let first = store.create(run(1, 1, None)).await.unwrap();
        store.create(run(1, 2, None)).await.unwrap();
        store.create(run(2, 3, None)).await.unwrap();
        store.create(run(2, 10, None)).await.unwrap();

        store.delete(first.id).await.unwrap();
        assert!(matches!(
            store.delete(first.id).await,
            Err(StorageError::NotFound(_))
        ));

        let cutoff = Utc.with_ymd_and_hms(2024, 6, 1, 5, 0, 0).unwrap();
        assert_eq!(store.delete_older_than(cutoff, Some(2)).await.unwrap(), 1);
        assert_eq!(store.delete_by_connector(1).await.unwrap(), 1);
        assert_eq!(store.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_connector_stats_with_range() {
        let store = InMemoryExecutionLogStore::new();
        store.create(run(1, 1, None)).await.unwrap();
        store.create(run(1, 2, Some("x"))).await.unwrap();
        store.create(run(1, 8, None)).await.unwrap();

        let stats = store.connector_stats(1, None, None).await.unwrap();
        assert_eq!(stats.total_executions, 3);
        assert_eq!(stats.failed_executions, 1);
        assert_eq!(stats.successful_executions, 2);

        let end = Utc.with_ymd_and_hms(2024, 6, 1, 4, 0, 0).unwrap();
        let ranged = store.connector_stats(1, None, Some(end)).await.unwrap();
        assert_eq!(ranged.total_executions, 2);
        assert_eq!(
            ranged.last_execution,
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 2, 0, 0).unwrap())
        );
    }
}
