use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::handlers::{api_error, CountResponse, ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::models::{JobStatus, Pagination, QueueJob};
use common::queue::JobFilter;

/// Query parameters for listing jobs
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ListJobsQuery {
    fn into_filter(self) -> Result<JobFilter, ErrorResponse> {
        let status = match self.status {
            Some(s) => Some(s.parse::<JobStatus>().map_err(ErrorResponse::validation)?),
            None => None,
        };
        Ok(JobFilter {
            status,
            from_date: self.from_date,
            to_date: self.to_date,
            pagination: Pagination::new(self.page, self.page_size),
        })
    }
}

/// List jobs, newest `scheduledAt` first
#[tracing::instrument(skip(state))]
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<SuccessResponse<Vec<QueueJob>>>, ErrorResponse> {
    let filter = query.into_filter()?;
    let jobs = state
        .queue
        .find_all(&filter)
        .await
        .map_err(api_error("Failed to list jobs"))?;

    tracing::info!(count = jobs.len(), "Listed jobs");
    Ok(Json(SuccessResponse::new(jobs)))
}

#[tracing::instrument(skip(state))]
pub async fn count_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<SuccessResponse<CountResponse>>, ErrorResponse> {
    let filter = query.into_filter()?;
    let count = state
        .queue
        .count(&filter)
        .await
        .map_err(api_error("Failed to count jobs"))?;
    Ok(Json(SuccessResponse::new(CountResponse { count })))
}

#[tracing::instrument(skip(state))]
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse<QueueJob>>, ErrorResponse> {
    let job = state
        .queue
        .find_one(id)
        .await
        .map_err(api_error("Failed to get job"))?;
    Ok(Json(SuccessResponse::new(job)))
}

/// Cancel a pending or processing job
#[tracing::instrument(skip(state))]
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse<QueueJob>>, ErrorResponse> {
    let job = state
        .queue
        .cancel_job(id)
        .await
        .map_err(api_error("Failed to cancel job"))?;

    tracing::info!(job_id = id, "Job cancelled by operator");
    Ok(Json(SuccessResponse::new(job)))
}

/// Requeue a failed job under its payload's retry ceiling
#[tracing::instrument(skip(state))]
pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse<QueueJob>>, ErrorResponse> {
    let job = state
        .queue
        .find_one(id)
        .await
        .map_err(api_error("Failed to load job for retry"))?;
    let max_retries = job.max_retries().unwrap_or(state.default_max_retries);

    let requeued = state
        .queue
        .retry_job(id, max_retries)
        .await
        .map_err(api_error("Failed to retry job"))?;
    if !requeued {
        return Err(ErrorResponse::validation(format!(
            "Job {} has exhausted its {} attempt(s)",
            id, max_retries
        )));
    }

    let job = state
        .queue
        .find_one(id)
        .await
        .map_err(api_error("Failed to reload retried job"))?;
    tracing::info!(job_id = id, "Job retried by operator");
    Ok(Json(SuccessResponse::new(job)))
}
