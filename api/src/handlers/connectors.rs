use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::handlers::execution_logs::DeletedResponse;
use crate::handlers::{api_error, ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::models::{ConnectorExecutionStats, QueueJob};

/// Body of a manual trigger
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub user_id: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Enqueue an immediate run of a connector
#[tracing::instrument(skip(state))]
pub async fn trigger_connector(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<TriggerRequest>,
) -> Result<Json<SuccessResponse<QueueJob>>, ErrorResponse> {
    let job = state
        .dispatcher
        .trigger_manually(id, request.user_id)
        .await
        .map_err(api_error("Failed to trigger connector"))?;

    tracing::info!(connector_id = id, job_id = job.id, "Connector triggered manually");
    Ok(Json(SuccessResponse::new(job)))
}

#[tracing::instrument(skip(state))]
pub async fn delete_connector_execution_logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse<DeletedResponse>>, ErrorResponse> {
    let deleted = state
        .execution_logs
        .delete_by_connector(id)
        .await
        .map_err(api_error("Failed to delete connector execution logs"))?;
    Ok(Json(SuccessResponse::new(DeletedResponse { deleted })))
}

#[tracing::instrument(skip(state))]
pub async fn connector_execution_stats(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<SuccessResponse<ConnectorExecutionStats>>, ErrorResponse> {
    let stats = state
        .execution_logs
        .connector_stats(id, query.start_date, query.end_date)
        .await
        .map_err(api_error("Failed to compute connector stats"))?;
    Ok(Json(SuccessResponse::new(stats)))
}
