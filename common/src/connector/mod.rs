// Connector runs: collaborator interfaces and the import/export executors

pub mod export;
pub mod files;
pub mod gateway;
pub mod import;

pub use export::ConnectorExportExecutor;
pub use gateway::HttpObservationGateway;
pub use import::ConnectorImportExecutor;

use crate::crypto::CredentialDecryptor;
use crate::errors::{ConnectorError, ExecutionError};
use crate::execution_log::ExecutionLogStore;
use crate::models::{
    ConnectorJobPayload, ConnectorSpecification, ConnectorType, ExecutionActivity, ExecutionLog,
    NewExecutionLog, ObservationPeriod, QueueJob,
};
use crate::transport::{TransportFactory, TransportSettings};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Read access to connector configuration owned by the metadata platform
#[async_trait]
pub trait ConnectorSource: Send + Sync {
    async fn find_connector(&self, id: i64) -> Result<ConnectorSpecification, ConnectorError>;

    async fn find_enabled_connectors(&self) -> Result<Vec<ConnectorSpecification>, ConnectorError>;
}

/// Hands a downloaded observation file to the platform's import pipeline
#[async_trait]
pub trait ObservationImporter: Send + Sync {
    /// Returns the name under which the platform stored the processed file
    async fn import_file(
        &self,
        specification_id: i64,
        station_id: Option<&str>,
        local_file: &Path,
        actor: i64,
    ) -> anyhow::Result<String>;
}

/// Materializes export file contents for a specification
#[async_trait]
pub trait ExportGenerator: Send + Sync {
    async fn generate_export(
        &self,
        specification_id: i64,
        period: Option<&ObservationPeriod>,
        destination: &Path,
        actor: i64,
    ) -> anyhow::Result<()>;
}

/// Connector source backed by a map, for embedding and tests
#[derive(Debug, Default)]
pub struct InMemoryConnectorSource {
    connectors: RwLock<HashMap<i64, ConnectorSpecification>>,
}

impl InMemoryConnectorSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, connector: ConnectorSpecification) {
        self.connectors.write().await.insert(connector.id, connector);
    }

    pub async fn remove(&self, id: i64) -> Option<ConnectorSpecification> {
        self.connectors.write().await.remove(&id)
    }
}

#[async_trait]
impl ConnectorSource for InMemoryConnectorSource {
    async fn find_connector(&self, id: i64) -> Result<ConnectorSpecification, ConnectorError> {
        self.connectors
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(ConnectorError::NotFound(id))
    }

    async fn find_enabled_connectors(&self) -> Result<Vec<ConnectorSpecification>, ConnectorError> {
        let mut enabled: Vec<ConnectorSpecification> = self
            .connectors
            .read()
            .await
            .values()
            .filter(|c| !c.disabled)
            .cloned()
            .collect();
        enabled.sort_by_key(|c| c.id);
        Ok(enabled)
    }
}

/// Dependencies shared by the import and export executors
#[derive(Clone)]
pub struct ExecutorContext {
    pub connectors: Arc<dyn ConnectorSource>,
    pub decryptor: Arc<dyn CredentialDecryptor>,
    pub transports: Arc<dyn TransportFactory>,
    pub execution_logs: Arc<dyn ExecutionLogStore>,
    pub scratch_dir: PathBuf,
    pub accept_invalid_certs: bool,
}

impl ExecutorContext {
    /// Parse the job payload and resolve the connector it names
    pub(crate) async fn load_connector(
        &self,
        job: &QueueJob,
        expected: ConnectorType,
    ) -> Result<ConnectorSpecification, ExecutionError> {
        let payload: ConnectorJobPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| ExecutionError::InvalidPayload(e.to_string()))?;
        let connector = self.connectors.find_connector(payload.connector_id).await?;
        if connector.connector_type != expected {
            return Err(ConnectorError::InvalidConfiguration(format!(
                "Connector {} is an {} connector, expected {}",
                connector.id, connector.connector_type, expected
            ))
            .into());
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.scratch_dir).await {
            warn!(path = %self.scratch_dir.display(), error = %e, "Failed to create scratch directory");
        }
        Ok(connector)
    }

    /// Transport settings with the decrypted password, or the message recorded on every activity
    pub(crate) fn transport_settings(
        &self,
        connector: &ConnectorSpecification,
    ) -> Result<TransportSettings, String> {
        let password = self
            .decryptor
            .decrypt(&connector.password)
            .map_err(|e| format!("Failed to decrypt credentials for connector {}: {}", connector.id, e))?;
        Ok(TransportSettings::for_connector(
            connector,
            password,
            self.accept_invalid_certs,
        ))
    }

    /// Persist the run and decide whether the job failed as a whole
    pub(crate) async fn finish_run(
        &self,
        connector: &ConnectorSpecification,
        started: DateTime<Utc>,
        activities: Vec<ExecutionActivity>,
        actor: i64,
    ) -> Result<ExecutionLog, ExecutionError> {
        let failed = activities.iter().filter(|a| a.has_failed()).count();
        let all_failed = !activities.is_empty() && failed == activities.len();

        let log = self
            .execution_logs
            .create(NewExecutionLog {
                connector_id: connector.id,
                execution_start_datetime: started,
                execution_end_datetime: Utc::now(),
                execution_activities: activities,
                entry_user_id: actor,
            })
            .await
            .map_err(|e| ExecutionError::LogPersistence(e.to_string()))?;

        info!(
            connector_id = connector.id,
            execution_log_id = log.id,
            total_errors = log.total_errors,
            failed_specifications = failed,
            "Connector run recorded"
        );

        if all_failed {
            return Err(ExecutionError::AllSpecificationsFailed {
                connector_id: connector.id,
                failed,
            });
        }
        Ok(log)
    }
}

impl std::fmt::Debug for ExecutorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorContext")
            .field("scratch_dir", &self.scratch_dir)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish_non_exhaustive()
    }
}
