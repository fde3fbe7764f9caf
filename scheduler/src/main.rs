// Scheduler binary entry point

use anyhow::Result;
use common::config::Settings;
use common::db::repositories::{PgConnectorRepository, PgJobQueueStore};
use common::db::DbPool;
use common::schedule::parse_timezone;
use common::scheduler::{listen_for_events, ConnectorJobDispatcher, ConnectorScheduler};
use common::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
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

    info!(
        timezone = %settings.scheduler.timezone,
        notify_channel = %settings.scheduler.notify_channel,
        "Starting connector scheduler"
    );

    let db_pool = DbPool::new(&settings.database).await?;
    db_pool.run_migrations().await?;

    let connectors = Arc::new(PgConnectorRepository::new(db_pool.clone()));
    let queue = Arc::new(
        PgJobQueueStore::new(db_pool.clone())
            .with_retry_delay(Duration::from_secs(settings.queue.retry_delay_seconds)),
    );
    let dispatcher = ConnectorJobDispatcher::new(connectors, queue);
    let timezone = parse_timezone(&settings.scheduler.timezone)?;
    let scheduler = Arc::new(ConnectorScheduler::new(dispatcher, timezone));

    let registered = scheduler.initialize().await?;
    info!(registered, "Connector timers registered");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let listener = {
        let pool = db_pool.pool().clone();
        let channel = settings.scheduler.notify_channel.clone();
        let scheduler = Arc::clone(&scheduler);
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = listen_for_events(&pool, &channel, scheduler, shutdown_rx).await {
                error!(error = %e, "Connector event listener stopped");
            }
        })
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
    }
    info!("Received shutdown signal, stopping scheduler");

    let _ = shutdown_tx.send(());
    if let Err(e) = listener.await {
        error!(error = %e, "Event listener task failed");
    }
    scheduler.shutdown().await;
    db_pool.close().await;
    telemetry::shutdown_tracer();

    info!("Scheduler stopped");
    Ok(())
}
