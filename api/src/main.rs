use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;

mod handlers;
mod routes;
mod state;

use common::config::Settings;
use common::db::repositories::{PgConnectorRepository, PgExecutionLogStore, PgJobQueueStore};
use common::db::DbPool;
use common::scheduler::ConnectorJobDispatcher;
use common::telemetry;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    tracing::info!(
        host = %settings.server.host,
        port = %settings.server.port,
        "Starting operator API"
    );

    let db_pool = DbPool::new(&settings.database).await?;
    db_pool.run_migrations().await?;

    let queue = Arc::new(
        PgJobQueueStore::new(db_pool.clone()).with_retry_delay(std::time::Duration::from_secs(
            settings.queue.retry_delay_seconds,
        )),
    );
    let execution_logs = Arc::new(PgExecutionLogStore::new(db_pool.clone()));
    let connectors = Arc::new(PgConnectorRepository::new(db_pool.clone()));
    let dispatcher = ConnectorJobDispatcher::new(connectors, queue.clone());

    let state = AppState::new(
        queue,
        execution_logs,
        dispatcher,
        settings.queue.default_max_retries,
    )
    .with_db_pool(db_pool.clone());

    let app = routes::create_router(state);

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    tracing::info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db_pool.close().await;
    telemetry::shutdown_tracer();
    tracing::info!("API server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Initiating graceful shutdown");
}
