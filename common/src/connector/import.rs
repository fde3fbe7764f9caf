// Import executor: pulls matching remote files and hands them to the importer

use super::files::{import_scratch_name, modified_or_now, FilePattern, PreviousImports, ScratchFile};
use super::{ExecutorContext, ObservationImporter};
use crate::errors::{ExecutionError, TransportError};
use crate::models::{
    ConnectorSpecification, ConnectorType, ExecutionActivity, ExecutionLog, ImportActivity,
    ImportFileResult, QueueJob, RemoteFileMetadata, SpecificationBinding,
};
use crate::queue::JobHandler;
use crate::telemetry::record_file_transfer;
use crate::transport::{join_remote, RemoteFile, Transport, TransportSettings};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Handler for `connector.import` jobs
pub struct ConnectorImportExecutor {
    context: ExecutorContext,
    importer: Arc<dyn ObservationImporter>,
}

impl ConnectorImportExecutor {
    pub fn new(context: ExecutorContext, importer: Arc<dyn ObservationImporter>) -> Self {
        Self { context, importer }
    }

    /// Run every specification of the connector named by the job and persist one log
    #[instrument(skip(self, job), fields(job_id = job.id))]
    pub async fn execute(&self, job: &QueueJob) -> Result<ExecutionLog, ExecutionError> {
        let connector = self
            .context
            .load_connector(job, ConnectorType::Import)
            .await?;
        let started = Utc::now();
        let actor = job.entry_user_id;
        info!(
            connector_id = connector.id,
            specifications = connector.parameters.specifications.len(),
            "Starting connector import"
        );

        let settings = self.context.transport_settings(&connector);
        let previous = match self
            .context
            .execution_logs
            .find_latest_by_connector(connector.id)
            .await
        {
            Ok(log) => PreviousImports::from_log(log.as_ref()),
            Err(e) => {
                warn!(connector_id = connector.id, error = %e, "Failed to load previous run, change detection disabled");
                PreviousImports::default()
            }
        };

        let mut activities = Vec::with_capacity(connector.parameters.specifications.len());
        for binding in &connector.parameters.specifications {
            let activity = self
                .import_specification(&connector, &settings, binding, &previous, actor)
                .await;
            activities.push(ExecutionActivity::Import(activity));
        }

        self.context
            .finish_run(&connector, started, activities, actor)
            .await
    }

    #[instrument(skip_all, fields(connector_id = connector.id, specification_id = binding.specification_id))]
    async fn import_specification(
        &self,
        connector: &ConnectorSpecification,
        settings: &Result<TransportSettings, String>,
        binding: &SpecificationBinding,
        previous: &PreviousImports,
        actor: i64,
    ) -> ImportActivity {
        let mut activity = ImportActivity {
            file_pattern: binding.file_pattern.clone().unwrap_or_default(),
            specification_id: binding.specification_id,
            station_id: binding.station_id.clone(),
            processed_files: Vec::new(),
            error_message: None,
        };

        let settings = match settings {
            Ok(settings) => settings.clone(),
            Err(message) => {
                activity.error_message = Some(message.clone());
                return activity;
            }
        };
        let pattern = match FilePattern::parse(binding.file_pattern.as_deref()) {
            Ok(pattern) => pattern,
            Err(e) => {
                activity.error_message = Some(format!(
                    "Invalid file pattern '{}': {}",
                    activity.file_pattern, e
                ));
                return activity;
            }
        };

        let mut transport = match self.context.transports.create(settings) {
            Ok(transport) => transport,
            Err(e) => {
                activity.error_message = Some(connect_error(connector, &e));
                return activity;
            }
        };
        if let Err(e) = transport.connect().await {
            error!(error = %e, "Failed to connect to remote endpoint");
            activity.error_message = Some(connect_error(connector, &e));
            return activity;
        }

        let remote_path = connector.parameters.remote_path.as_str();
        match transport
            .list(remote_path, connector.parameters.recursive)
            .await
        {
            Ok(files) => {
                let matching: Vec<RemoteFile> =
                    files.into_iter().filter(|f| pattern.is_match(&f.name)).collect();
                debug!(matching = matching.len(), "Listed remote files");
                for file in matching {
                    let result = self
                        .import_file(transport.as_mut(), connector, binding, previous, &file, actor)
                        .await;
                    activity.processed_files.push(result);
                }
            }
            Err(e) => {
                error!(error = %e, remote_path = %remote_path, "Failed to list remote files");
                activity.error_message =
                    Some(format!("Failed to list files in {}: {}", remote_path, e));
            }
        }

        if let Err(e) = transport.close().await {
            warn!(error = %e, "Failed to close transport");
        }
        activity
    }

    async fn import_file(
        &self,
        transport: &mut dyn Transport,
        connector: &ConnectorSpecification,
        binding: &SpecificationBinding,
        previous: &PreviousImports,
        file: &RemoteFile,
        actor: i64,
    ) -> ImportFileResult {
        let modified = modified_or_now(file);
        let mut result = ImportFileResult {
            remote_file_metadata: RemoteFileMetadata {
                file_name: file.name.clone(),
                modified_date: modified,
                size: file.size,
            },
            downloaded_file_name: None,
            processed_file_name: None,
            error_message: None,
            unchanged_file: None,
        };

        if previous.is_unchanged(binding.specification_id, file) {
            debug!(file = %file.name, "Skipping unchanged file");
            result.unchanged_file = Some(true);
            return result;
        }

        let scratch_name = import_scratch_name(connector.id, binding.specification_id, &file.name);
        let scratch = ScratchFile::new(&self.context.scratch_dir, &scratch_name);
        let remote = join_remote(&connector.parameters.remote_path, &file.name);

        if let Err(e) = transport.download(&remote, scratch.path()).await {
            error!(file = %file.name, error = %e, "Download failed");
            record_file_transfer("download", false);
            result.error_message = Some(format!("Failed to download file {}: {}", file.name, e));
            return result;
        }
        record_file_transfer("download", true);
        result.downloaded_file_name = Some(scratch_name);

        match self
            .importer
            .import_file(
                binding.specification_id,
                binding.station_id.as_deref(),
                scratch.path(),
                actor,
            )
            .await
        {
            Ok(processed) => {
                info!(file = %file.name, processed = %processed, "Imported file");
                result.processed_file_name = Some(processed);
            }
            Err(e) => {
                error!(file = %file.name, error = %e, "Import failed");
                result.error_message = Some(format!("Failed to process file {}: {:#}", file.name, e));
            }
        }
        result
    }
}

fn connect_error(connector: &ConnectorSpecification, e: &TransportError) -> String {
    format!(
        "Failed to connect to {}:{}: {}",
        connector.host_name,
        connector.effective_port(),
        e
    )
}

#[async_trait]
impl JobHandler for ConnectorImportExecutor {
    async fn handle(&self, job: &QueueJob) -> anyhow::Result<()> {
        self.execute(job).await?;
        Ok(())
    }
}
