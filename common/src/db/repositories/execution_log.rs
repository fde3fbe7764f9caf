// Postgres execution log store

use super::queries::execution_log_queries;
use crate::db::DbPool;
use crate::errors::StorageError;
use crate::execution_log::{ExecutionLogFilter, ExecutionLogStore};
use crate::models::{ConnectorExecutionStats, ExecutionActivity, ExecutionLog, NewExecutionLog};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct PgExecutionLogStore {
    pool: DbPool,
}

impl PgExecutionLogStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_log(row: &PgRow) -> Result<ExecutionLog, StorageError> {
    let activities: serde_json::Value = row.try_get("execution_activities")?;
    let execution_activities: Vec<ExecutionActivity> = serde_json::from_value(activities)?;
    Ok(ExecutionLog {
        id: row.try_get("id")?,
        connector_id: row.try_get("connector_id")?,
        execution_start_datetime: row.try_get("execution_start_datetime")?,
        execution_end_datetime: row.try_get("execution_end_datetime")?,
        execution_activities,
        total_errors: row.try_get("total_errors")?,
        entry_user_id: row.try_get("entry_user_id")?,
        entry_date_time: row.try_get("entry_date_time")?,
    })
}

// Shared WHERE clause; binds $1..$4 in filter order
const FILTER_CLAUSE: &str = r#"
    WHERE ($1::bigint IS NULL OR connector_id = $1)
      AND ($2::timestamptz IS NULL OR execution_start_datetime >= $2)
      AND ($3::timestamptz IS NULL OR execution_start_datetime <= $3)
      AND ($4::boolean IS NULL OR (total_errors > 0) = $4)
"#;

#[async_trait]
impl ExecutionLogStore for PgExecutionLogStore {
    #[instrument(skip(self, log), fields(connector_id = log.connector_id))]
    async fn create(&self, log: NewExecutionLog) -> Result<ExecutionLog, StorageError> {
        let total_errors = log.total_errors();
        let activities = serde_json::to_value(&log.execution_activities)?;
        let query = format!(
            r#"
            INSERT INTO connector_execution_log (
                connector_id, execution_start_datetime, execution_end_datetime,
                execution_activities, total_errors, entry_user_id, entry_date_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING {}
            "#,
            execution_log_queries::SELECT_ALL_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(log.connector_id)
            .bind(log.execution_start_datetime)
            .bind(log.execution_end_datetime)
            .bind(activities)
            .bind(total_errors)
            .bind(log.entry_user_id)
            .fetch_one(self.pool.pool())
            .await?;

        let created = row_to_log(&row)?;
        info!(log_id = created.id, total_errors, "Execution log recorded");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn find_one(&self, id: i64) -> Result<ExecutionLog, StorageError> {
        let query = format!(
            "SELECT {} FROM connector_execution_log WHERE id = $1",
            execution_log_queries::SELECT_ALL_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("Execution log {}", id)))?;
        row_to_log(&row)
    }

    #[instrument(skip(self, filter))]
    async fn find_all(
        &self,
        filter: &ExecutionLogFilter,
    ) -> Result<Vec<ExecutionLog>, StorageError> {
        let query = format!(
            r#"
            SELECT {}
            FROM connector_execution_log
            {}
            ORDER BY execution_start_datetime DESC, id DESC
            LIMIT $5 OFFSET $6
            "#,
            execution_log_queries::SELECT_ALL_COLUMNS,
            FILTER_CLAUSE
        );
        let rows = sqlx::query(&query)
            .bind(filter.connector_id)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(filter.has_errors)
            .bind(i64::from(filter.pagination.page_size))
            .bind(filter.pagination.offset() as i64)
            .fetch_all(self.pool.pool())
            .await?;
        rows.iter().map(row_to_log).collect()
    }

    #[instrument(skip(self, filter))]
    async fn count(&self, filter: &ExecutionLogFilter) -> Result<u64, StorageError> {
        let query = format!(
            "SELECT COUNT(*) as count FROM connector_execution_log {}",
            FILTER_CLAUSE
        );
        let row = sqlx::query(&query)
            .bind(filter.connector_id)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(filter.has_errors)
            .fetch_one(self.pool.pool())
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self))]
    async fn find_latest_by_connector(
        &self,
        connector_id: i64,
    ) -> Result<Option<ExecutionLog>, StorageError> {
        let query = format!(
            r#"
            SELECT {}
            FROM connector_execution_log
            WHERE connector_id = $1
            ORDER BY execution_start_datetime DESC, id DESC
            LIMIT 1
            "#,
            execution_log_queries::SELECT_ALL_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(connector_id)
            .fetch_optional(self.pool.pool())
            .await?;
        row.as_ref().map(row_to_log).transpose()
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM connector_execution_log WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("Execution log {}", id)));
        }
        info!("Execution log deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_by_connector(&self, connector_id: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM connector_execution_log WHERE connector_id = $1")
            .bind(connector_id)
            .execute(self.pool.pool())
            .await?;
        info!(deleted = result.rows_affected(), "Connector execution logs deleted");
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        connector_id: Option<i64>,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query(
            r#"
            DELETE FROM connector_execution_log
            WHERE execution_start_datetime < $1
              AND ($2::bigint IS NULL OR connector_id = $2)
            "#,
        )
        .bind(cutoff)
        .bind(connector_id)
        .execute(self.pool.pool())
        .await?;
        info!(deleted = result.rows_affected(), "Old execution logs deleted");
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn connector_stats(
        &self,
        connector_id: i64,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<ConnectorExecutionStats, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total_executions,
                COALESCE(SUM(total_errors), 0)::bigint as total_errors,
                COUNT(*) FILTER (WHERE total_errors = 0) as successful_executions,
                COUNT(*) FILTER (WHERE total_errors > 0) as failed_executions,
                MAX(execution_start_datetime) as last_execution
            FROM connector_execution_log
            WHERE connector_id = $1
              AND ($2::timestamptz IS NULL OR execution_start_datetime >= $2)
              AND ($3::timestamptz IS NULL OR execution_start_datetime <= $3)
            "#,
        )
        .bind(connector_id)
        .bind(start_date)
        .bind(end_date)
        .fetch_one(self.pool.pool())
        .await?;

        let count = |column: &str| -> Result<u64, StorageError> {
            let value: i64 = row.try_get(column)?;
            Ok(value.max(0) as u64)
        };
        Ok(ConnectorExecutionStats {
            total_executions: count("total_executions")?,
            total_errors: count("total_errors")?,
            successful_executions: count("successful_executions")?,
            failed_executions: count("failed_executions")?,
            last_execution: row.try_get("last_execution")?,
        })
    }
}
