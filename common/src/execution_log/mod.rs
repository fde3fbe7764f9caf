// Execution log store: one record per connector run

pub mod memory;

pub use memory::InMemoryExecutionLogStore;

use crate::errors::StorageError;
use crate::models::{ConnectorExecutionStats, ExecutionLog, NewExecutionLog, Pagination};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Operator query over execution logs
#[derive(Debug, Clone, Default)]
pub struct ExecutionLogFilter {
    pub connector_id: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub has_errors: Option<bool>,
    pub pagination: Pagination,
}

impl ExecutionLogFilter {
    pub fn for_connector(connector_id: i64) -> Self {
        Self {
            connector_id: Some(connector_id),
            ..Default::default()
        }
    }

    /// Date bounds apply to the run start time
    pub fn matches(&self, log: &ExecutionLog) -> bool {
        self.connector_id.map_or(true, |id| log.connector_id == id)
            && self
                .start_date
                .map_or(true, |start| log.execution_start_datetime >= start)
            && self
                .end_date
                .map_or(true, |end| log.execution_start_datetime <= end)
            && self.has_errors.map_or(true, |e| log.has_errors() == e)
    }
}

#[async_trait]
pub trait ExecutionLogStore: Send + Sync {
    /// Persist a run; `total_errors` is derived from the activities
    async fn create(&self, log: NewExecutionLog) -> Result<ExecutionLog, StorageError>;

    async fn find_one(&self, id: i64) -> Result<ExecutionLog, StorageError>;

    /// Filtered page, newest run first
    async fn find_all(&self, filter: &ExecutionLogFilter)
        -> Result<Vec<ExecutionLog>, StorageError>;

    async fn count(&self, filter: &ExecutionLogFilter) -> Result<u64, StorageError>;

    async fn find_latest_by_connector(
        &self,
        connector_id: i64,
    ) -> Result<Option<ExecutionLog>, StorageError>;

    async fn delete(&self, id: i64) -> Result<(), StorageError>;

    async fn delete_by_connector(&self, connector_id: i64) -> Result<u64, StorageError>;

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        connector_id: Option<i64>,
    ) -> Result<u64, StorageError>;

    async fn connector_stats(
        &self,
        connector_id: i64,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<ConnectorExecutionStats, StorageError>;
}
