use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handlers::{api_error, CountResponse, ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::execution_log::ExecutionLogFilter;
use common::models::{ExecutionLog, Pagination};

/// Query parameters for listing execution logs
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExecutionLogsQuery {
    pub connector_id: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub has_errors: Option<bool>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl From<ListExecutionLogsQuery> for ExecutionLogFilter {
    fn from(query: ListExecutionLogsQuery) -> Self {
        ExecutionLogFilter {
            connector_id: query.connector_id,
            start_date: query.start_date,
            end_date: query.end_date,
            has_errors: query.has_errors,
            pagination: Pagination::new(query.page, query.page_size),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: u64,
}

/// List execution logs, newest run first
#[tracing::instrument(skip(state))]
pub async fn list_execution_logs(
    State(state): State<AppState>,
    Query(query): Query<ListExecutionLogsQuery>,
) -> Result<Json<SuccessResponse<Vec<ExecutionLog>>>, ErrorResponse> {
    let filter = ExecutionLogFilter::from(query);
    let logs = state
        .execution_logs
        .find_all(&filter)
        .await
        .map_err(api_error("Failed to list execution logs"))?;

    tracing::info!(count = logs.len(), "Listed execution logs");
    Ok(Json(SuccessResponse::new(logs)))
}

#[tracing::instrument(skip(state))]
pub async fn count_execution_logs(
    State(state): State<AppState>,
    Query(query): Query<ListExecutionLogsQuery>,
) -> Result<Json<SuccessResponse<CountResponse>>, ErrorResponse> {
    let filter = ExecutionLogFilter::from(query);
    let count = state
        .execution_logs
        .count(&filter)
        .await
        .map_err(api_error("Failed to count execution logs"))?;
    Ok(Json(SuccessResponse::new(CountResponse { count })))
}

#[tracing::instrument(skip(state))]
pub async fn get_execution_log(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse<ExecutionLog>>, ErrorResponse> {
    let log = state
        .execution_logs
        .find_one(id)
        .await
        .map_err(api_error("Failed to get execution log"))?;
    Ok(Json(SuccessResponse::new(log)))
}

#[tracing::instrument(skip(state))]
pub async fn delete_execution_log(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse<DeletedResponse>>, ErrorResponse> {
    state
        .execution_logs
        .delete(id)
        .await
        .map_err(api_error("Failed to delete execution log"))?;

    tracing::info!(log_id = id, "Execution log deleted");
    Ok(Json(SuccessResponse::new(DeletedResponse { deleted: 1 })))
}
