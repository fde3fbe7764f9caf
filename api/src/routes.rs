use axum::{
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Create the operator API router
#[tracing::instrument(skip(state))]
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let job_routes = Router::new()
        .route("/api/jobs", get(handlers::jobs::list_jobs))
        .route("/api/jobs/count", get(handlers::jobs::count_jobs))
        .route("/api/jobs/:id", get(handlers::jobs::get_job))
        .route("/api/jobs/:id/cancel", post(handlers::jobs::cancel_job))
        .route("/api/jobs/:id/retry", post(handlers::jobs::retry_job));

    let execution_log_routes = Router::new()
        .route(
            "/api/execution-logs",
            get(handlers::execution_logs::list_execution_logs),
        )
        .route(
            "/api/execution-logs/count",
            get(handlers::execution_logs::count_execution_logs),
        )
        .route(
            "/api/execution-logs/:id",
            get(handlers::execution_logs::get_execution_log)
                .delete(handlers::execution_logs::delete_execution_log),
        );

    let connector_routes = Router::new()
        .route(
            "/api/connectors/:id/trigger",
            post(handlers::connectors::trigger_connector),
        )
        .route(
            "/api/connectors/:id/execution-logs",
            delete(handlers::connectors::delete_connector_execution_logs),
        )
        .route(
            "/api/connectors/:id/execution-stats",
            get(handlers::connectors::connector_execution_stats),
        );

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(job_routes)
        .merge(execution_log_routes)
        .merge(connector_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(cors),
        )
        .with_state(state)
}
