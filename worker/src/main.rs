// Worker binary entry point: polls the job queue and runs connector jobs

use anyhow::Result;
use common::config::Settings;
use common::connector::{
    ConnectorExportExecutor, ConnectorImportExecutor, ExecutorContext, HttpObservationGateway,
};
use common::crypto::SecretKeyDecryptor;
use common::db::repositories::{PgConnectorRepository, PgExecutionLogStore, PgJobQueueStore};
use common::db::DbPool;
use common::models::{CONNECTOR_EXPORT_JOB, CONNECTOR_IMPORT_JOB};
use common::queue::{HandlerRegistry, ProcessorConfig, QueueProcessor};
use common::telemetry;
use common::transport::DefaultTransportFactory;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

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
    telemetry::init_metrics(settings.observability.metrics_port)?;

    info!("Starting connector worker");

    let db_pool = DbPool::new(&settings.database).await?;
    db_pool.run_migrations().await?;

    let queue = Arc::new(
        PgJobQueueStore::new(db_pool.clone())
            .with_retry_delay(Duration::from_secs(settings.queue.retry_delay_seconds)),
    );
    let execution_logs = Arc::new(PgExecutionLogStore::new(db_pool.clone()));

    let context = ExecutorContext {
        connectors: Arc::new(PgConnectorRepository::new(db_pool.clone())),
        decryptor: Arc::new(SecretKeyDecryptor::new(settings.encryption.secret.clone())?),
        transports: Arc::new(DefaultTransportFactory),
        execution_logs: execution_logs.clone(),
        scratch_dir: settings.storage.scratch_dir.clone(),
        accept_invalid_certs: settings.transport.accept_invalid_certs,
    };

    let gateway = Arc::new(HttpObservationGateway::new(
        settings.collaborators.base_url.clone(),
        Duration::from_secs(settings.collaborators.timeout_seconds),
    )?);

    let registry = HandlerRegistry::new()
        .register(
            CONNECTOR_IMPORT_JOB,
            Arc::new(ConnectorImportExecutor::new(context.clone(), gateway.clone())),
        )
        .register(
            CONNECTOR_EXPORT_JOB,
            Arc::new(ConnectorExportExecutor::new(context, gateway)),
        );

    let config = ProcessorConfig::from_settings(&settings)?;
    let processor = Arc::new(
        QueueProcessor::new(config, queue, registry).with_execution_logs(execution_logs),
    );

    let runner = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move { processor.start().await })
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
    }
    info!("Received shutdown signal, draining in-flight jobs");
    processor.stop();

    match runner.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Queue processor failed"),
        Err(e) => error!(error = %e, "Queue processor task panicked"),
    }

    db_pool.close().await;
    telemetry::shutdown_tracer();
    info!("Worker stopped");
    Ok(())
}
