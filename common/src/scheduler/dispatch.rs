// Turns connector firings and manual triggers into queued jobs

use crate::connector::ConnectorSource;
use crate::errors::DispatchError;
use crate::models::{ConnectorJobPayload, NewJob, QueueJob, TriggerSource};
use crate::queue::JobQueueStore;
use crate::telemetry::record_job_enqueued;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct ConnectorJobDispatcher {
    connectors: Arc<dyn ConnectorSource>,
    queue: Arc<dyn JobQueueStore>,
}

impl ConnectorJobDispatcher {
    pub fn new(connectors: Arc<dyn ConnectorSource>, queue: Arc<dyn JobQueueStore>) -> Self {
        Self { connectors, queue }
    }

    pub fn connectors(&self) -> &Arc<dyn ConnectorSource> {
        &self.connectors
    }

    /// Timer callback: re-read the connector and enqueue a run unless it is disabled
    #[instrument(skip(self))]
    pub async fn on_fire(&self, connector_id: i64) -> Result<Option<QueueJob>, DispatchError> {
        let connector = self.connectors.find_connector(connector_id).await?;
        if connector.disabled {
            debug!("Connector disabled since scheduling, skipping run");
            return Ok(None);
        }

        let payload = ConnectorJobPayload::for_connector(&connector, TriggerSource::Schedule);
        let job = self.enqueue(payload, connector.entry_user_id).await?;
        Ok(Some(job))
    }

    /// Enqueue an immediate run on behalf of an operator, disabled connectors included
    #[instrument(skip(self))]
    pub async fn trigger_manually(
        &self,
        connector_id: i64,
        actor: i64,
    ) -> Result<QueueJob, DispatchError> {
        let connector = self.connectors.find_connector(connector_id).await?;
        let payload = ConnectorJobPayload::for_connector(&connector, TriggerSource::Manual);
        self.enqueue(payload, actor).await
    }

    async fn enqueue(
        &self,
        payload: ConnectorJobPayload,
        actor: i64,
    ) -> Result<QueueJob, DispatchError> {
        let job_name = payload.connector_type.job_name();
        let triggered_by = match payload.triggered_by {
            TriggerSource::Schedule => "schedule",
            TriggerSource::Manual => "manual",
        };
        let connector_id = payload.connector_id;
        let payload =
            serde_json::to_value(&payload).map_err(|e| DispatchError::Payload(e.to_string()))?;

        let job = self
            .queue
            .create_job(NewJob {
                name: job_name.to_string(),
                payload,
                scheduled_at: Utc::now(),
                entry_user_id: actor,
            })
            .await?;

        record_job_enqueued(job_name, triggered_by);
        info!(
            job_id = job.id,
            job_name = %job_name,
            connector_id,
            triggered_by,
            "Connector job enqueued"
        );
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::InMemoryConnectorSource;
    use crate::errors::ConnectorError;
    use crate::models::{
        ConnectorParameters, ConnectorSpecification, ConnectorType, JobStatus, Protocol,
        CONNECTOR_EXPORT_JOB,
    };
    use crate::queue::InMemoryJobQueueStore;

    fn connector(id: i64, connector_type: ConnectorType, disabled: bool) -> ConnectorSpecification {
        ConnectorSpecification {
            id,
            name: format!("connector {}", id),
            connector_type,
            protocol: Protocol::Sftp,
            host_name: "example.org".to_string(),
            port: None,
            username: "obs".to_string(),
            password: "pw".to_string(),
            timeout: 10,
            maximum_retries: 4,
            cron_schedule: "0 2 * * *".to_string(),
            disabled,
            entry_user_id: 11,
            parameters: ConnectorParameters::default(),
        }
    }

    async fn dispatcher(
        connectors: Vec<ConnectorSpecification>,
    ) -> (ConnectorJobDispatcher, Arc<InMemoryJobQueueStore>) {
        let source = Arc::new(InMemoryConnectorSource::new());
        for c in connectors {
            source.upsert(c).await;
        }
        let queue = Arc::new(InMemoryJobQueueStore::new());
        (ConnectorJobDispatcher::new(source, queue.clone()), queue)
    }

    #[tokio::test]
    async fn test_fire_enqueues_schedule_payload() {
        let (dispatcher, queue) = dispatcher(vec![connector(7, ConnectorType::Import, false)]).await;

        let job = dispatcher.on_fire(7).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.entry_user_id, 11);
        assert_eq!(job.payload["connectorId"], 7);
        assert_eq!(job.payload["triggeredBy"], "schedule");
        assert_eq!(job.payload["maxRetries"], 4);
        assert_eq!(queue.all_jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_fire_skips_disabled_connector() {
        let (dispatcher, queue) = dispatcher(vec![connector(7, ConnectorType::Import, true)]).await;
        assert!(dispatcher.on_fire(7).await.unwrap().is_none());
        assert!(queue.all_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_export_connectors_use_export_job() {
        let (dispatcher, _) = dispatcher(vec![connector(3, ConnectorType::Export, false)]).await;
        let job = dispatcher.on_fire(3).await.unwrap().unwrap();
        assert_eq!(job.name, CONNECTOR_EXPORT_JOB);
    }

    #[tokio::test]
    async fn test_manual_trigger() {
        let (dispatcher, _) = dispatcher(vec![connector(7, ConnectorType::Import, true)]).await;

        let job = dispatcher.trigger_manually(7, 42).await.unwrap();
        assert_eq!(job.payload["triggeredBy"], "manual");
        assert_eq!(job.entry_user_id, 42);

        assert!(matches!(
            dispatcher.trigger_manually(99, 42).await,
            Err(DispatchError::Connector(ConnectorError::NotFound(99)))
        ));
    }
}
