// Connector lifecycle notifications delivered over Postgres LISTEN/NOTIFY

use super::engine::ConnectorScheduler;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Change to connector configuration published by the metadata platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ConnectorEvent {
    Created {
        #[serde(rename = "connectorId")]
        connector_id: i64,
    },
    Updated {
        #[serde(rename = "connectorId")]
        connector_id: i64,
    },
    /// A missing id means every connector was deleted
    Deleted {
        #[serde(rename = "connectorId", default)]
        connector_id: Option<i64>,
    },
}

impl ConnectorEvent {
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Apply notifications on `channel` to the scheduler until shutdown
///
/// Malformed payloads are logged and ignored.
pub async fn listen_for_events(
    pool: &PgPool,
    channel: &str,
    scheduler: Arc<ConnectorScheduler>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(channel).await?;
    info!(channel = %channel, "Listening for connector events");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("Connector event listener shutting down");
                break;
            }
            notification = listener.recv() => {
                let notification = notification?;
                match ConnectorEvent::parse(notification.payload()) {
                    Ok(event) => {
                        debug!(event = ?event, "Received connector event");
                        scheduler.handle_event(event).await;
                    }
                    Err(e) => {
                        warn!(payload = %notification.payload(), error = %e, "Ignoring malformed connector event");
                    }
                }
            }
        }
    }
    Ok(())
}
