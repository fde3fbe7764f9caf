// HTTP client for the metadata platform's observation import/export endpoints

use super::{ExportGenerator, ObservationImporter};
use crate::models::ObservationPeriod;
use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportResponse {
    processed_file_name: String,
}

#[derive(Debug, Clone)]
pub struct HttpObservationGateway {
    client: Client,
    base_url: String,
}

impl HttpObservationGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build collaborator HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ObservationImporter for HttpObservationGateway {
    #[instrument(skip(self, local_file))]
    async fn import_file(
        &self,
        specification_id: i64,
        station_id: Option<&str>,
        local_file: &Path,
        actor: i64,
    ) -> anyhow::Result<String> {
        let bytes = tokio::fs::read(local_file)
            .await
            .with_context(|| format!("Failed to read {}", local_file.display()))?;
        let file_name = local_file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());

        let mut form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name))
            .text("userId", actor.to_string());
        if let Some(station_id) = station_id {
            form = form.text("stationId", station_id.to_string());
        }

        let url = format!("{}/observations/imports/{}", self.base_url, specification_id);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("import endpoint returned {}: {}", status, body);
        }
        let parsed: ImportResponse = response
            .json()
            .await
            .context("Invalid import response")?;
        debug!(processed = %parsed.processed_file_name, "Observation import accepted");
        Ok(parsed.processed_file_name)
    }
}

#[async_trait]
impl ExportGenerator for HttpObservationGateway {
    #[instrument(skip(self, destination))]
    async fn generate_export(
        &self,
        specification_id: i64,
        period: Option<&ObservationPeriod>,
        destination: &Path,
        actor: i64,
    ) -> anyhow::Result<()> {
        let url = format!("{}/observations/exports/{}", self.base_url, specification_id);
        let mut query: Vec<(&str, String)> = vec![("userId", actor.to_string())];
        if let Some(period) = period {
            query.push(("durationType", period.duration_type.to_string()));
            query.push(("duration", period.duration.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("export endpoint returned {}: {}", status, body);
        }

        let mut file = tokio::fs::File::create(destination)
            .await
            .with_context(|| format!("Failed to create {}", destination.display()))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk.context("Export stream interrupted")?).await?;
        }
        file.flush().await?;
        Ok(())
    }
}
