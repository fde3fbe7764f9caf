// Export executor: generates a file per specification and uploads it

use super::files::{export_file_name, ScratchFile};
use super::{ExecutorContext, ExportGenerator};
use crate::errors::ExecutionError;
use crate::models::{
    ConnectorSpecification, ConnectorType, ExecutionActivity, ExecutionLog, ExportActivity,
    ExportFileResult, QueueJob, SpecificationBinding,
};
use crate::queue::JobHandler;
use crate::telemetry::record_file_transfer;
use crate::transport::{join_remote, TransportSettings};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Handler for `connector.export` jobs
pub struct ConnectorExportExecutor {
    context: ExecutorContext,
    generator: Arc<dyn ExportGenerator>,
}

impl ConnectorExportExecutor {
    pub fn new(context: ExecutorContext, generator: Arc<dyn ExportGenerator>) -> Self {
        Self { context, generator }
    }

    #[instrument(skip(self, job), fields(job_id = job.id))]
    pub async fn execute(&self, job: &QueueJob) -> Result<ExecutionLog, ExecutionError> {
        let connector = self
            .context
            .load_connector(job, ConnectorType::Export)
            .await?;
        let started = Utc::now();
        let actor = job.entry_user_id;
        info!(
            connector_id = connector.id,
            specifications = connector.parameters.specifications.len(),
            "Starting connector export"
        );

        let settings = self.context.transport_settings(&connector);
        let mut activities = Vec::with_capacity(connector.parameters.specifications.len());
        for binding in &connector.parameters.specifications {
            let activity = self
                .export_specification(&connector, &settings, binding, actor)
                .await;
            activities.push(ExecutionActivity::Export(activity));
        }

        self.context
            .finish_run(&connector, started, activities, actor)
            .await
    }

    #[instrument(skip_all, fields(connector_id = connector.id, specification_id = binding.specification_id))]
    async fn export_specification(
        &self,
        connector: &ConnectorSpecification,
        settings: &Result<TransportSettings, String>,
        binding: &SpecificationBinding,
        actor: i64,
    ) -> ExportActivity {
        let mut activity = ExportActivity {
            file_pattern: binding.file_name_template.clone(),
            specification_id: binding.specification_id,
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

        let file_name = export_file_name(
            binding.file_name_template.as_deref(),
            connector.id,
            binding.specification_id,
            Utc::now(),
        );
        let scratch = ScratchFile::new(
            &self.context.scratch_dir,
            &format!("upload_{}_{}_{}", connector.id, binding.specification_id, file_name),
        );

        if let Err(e) = self
            .generator
            .generate_export(
                binding.specification_id,
                binding.period.as_ref(),
                scratch.path(),
                actor,
            )
            .await
        {
            error!(error = %e, "Export generation failed");
            activity.error_message = Some(format!(
                "Failed to generate export file for specification {}: {:#}",
                binding.specification_id, e
            ));
            return activity;
        }

        let mut transport = match self.context.transports.create(settings) {
            Ok(transport) => transport,
            Err(e) => {
                activity.error_message = Some(format!(
                    "Failed to connect to {}:{}: {}",
                    connector.host_name,
                    connector.effective_port(),
                    e
                ));
                return activity;
            }
        };
        if let Err(e) = transport.connect().await {
            error!(error = %e, "Failed to connect to remote endpoint");
            activity.error_message = Some(format!(
                "Failed to connect to {}:{}: {}",
                connector.host_name,
                connector.effective_port(),
                e
            ));
            return activity;
        }

        let remote = join_remote(connector.parameters.effective_upload_path(), &file_name);
        let result = match transport.upload(scratch.path(), &remote).await {
            Ok(bytes) => {
                info!(remote = %remote, bytes, "Uploaded export file");
                record_file_transfer("upload", true);
                ExportFileResult {
                    processed_file_name: Some(file_name),
                    error_message: None,
                }
            }
            Err(e) => {
                error!(remote = %remote, error = %e, "Upload failed");
                record_file_transfer("upload", false);
                ExportFileResult {
                    error_message: Some(format!("Failed to upload file {}: {}", file_name, e)),
                    processed_file_name: Some(file_name),
                }
            }
        };
        activity.processed_files.push(result);

        if let Err(e) = transport.close().await {
            warn!(error = %e, "Failed to close transport");
        }
        activity
    }
}

#[async_trait]
impl JobHandler for ConnectorExportExecutor {
    async fn handle(&self, job: &QueueJob) -> anyhow::Result<()> {
        self.execute(job).await?;
        Ok(())
    }
}
