// Connector repository over the platform's connector table

use super::queries::connector_queries;
use crate::connector::ConnectorSource;
use crate::db::DbPool;
use crate::errors::ConnectorError;
use crate::models::{ConnectorParameters, ConnectorSpecification, ConnectorType, Protocol};
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::str::FromStr;
use tracing::{instrument, warn};

/// Read-only view of `connector_specifications`
#[derive(Debug, Clone)]
pub struct PgConnectorRepository {
    pool: DbPool,
}

impl PgConnectorRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Connection details the platform keeps inside the `parameters` column
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredParameters {
    protocol: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(flatten)]
    parameters: ConnectorParameters,
}

fn lookup(err: sqlx::Error) -> ConnectorError {
    ConnectorError::Lookup(err.to_string())
}

fn row_to_connector(row: &PgRow) -> Result<ConnectorSpecification, ConnectorError> {
    let id: i64 = row.try_get("id").map_err(lookup)?;
    let invalid = |reason: String| {
        ConnectorError::InvalidConfiguration(format!("connector {}: {}", id, reason))
    };

    let connector_type: String = row.try_get("connector_type").map_err(lookup)?;
    let raw: serde_json::Value = row.try_get("parameters").map_err(lookup)?;
    let stored: StoredParameters =
        serde_json::from_value(raw).map_err(|e| invalid(e.to_string()))?;
    let timeout: i32 = row.try_get("timeout").map_err(lookup)?;
    let maximum_retries: i32 = row.try_get("maximum_retries").map_err(lookup)?;

    Ok(ConnectorSpecification {
        id,
        name: row.try_get("name").map_err(lookup)?,
        connector_type: ConnectorType::from_str(&connector_type).map_err(invalid)?,
        protocol: Protocol::from_str(&stored.protocol)
            .map_err(ConnectorError::UnsupportedProtocol)?,
        host_name: row.try_get("host_name").map_err(lookup)?,
        port: stored.port,
        username: stored.username,
        password: stored.password,
        timeout: timeout.max(1) as u32,
        maximum_retries: maximum_retries.max(0) as u32,
        cron_schedule: row.try_get("cron_schedule").map_err(lookup)?,
        disabled: row.try_get("disabled").map_err(lookup)?,
        entry_user_id: row.try_get("entry_user_id").map_err(lookup)?,
        parameters: stored.parameters,
    })
}

#[async_trait]
impl ConnectorSource for PgConnectorRepository {
    #[instrument(skip(self))]
    async fn find_connector(&self, id: i64) -> Result<ConnectorSpecification, ConnectorError> {
        let query = format!(
            "SELECT {} FROM connector_specifications WHERE id = $1",
            connector_queries::SELECT_ALL_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(lookup)?
            .ok_or(ConnectorError::NotFound(id))?;
        row_to_connector(&row)
    }

    /// Rows that fail to parse are skipped with a warning
    #[instrument(skip(self))]
    async fn find_enabled_connectors(&self) -> Result<Vec<ConnectorSpecification>, ConnectorError> {
        let query = format!(
            r#"
            SELECT {}
            FROM connector_specifications
            WHERE disabled = false
            ORDER BY id ASC
            "#,
            connector_queries::SELECT_ALL_COLUMNS
        );
        let rows = sqlx::query(&query)
            .fetch_all(self.pool.pool())
            .await
            .map_err(lookup)?;

        let mut connectors = Vec::with_capacity(rows.len());
        for row in &rows {
            match row_to_connector(row) {
                Ok(connector) => connectors.push(connector),
                Err(e) => warn!(error = %e, "Skipping unreadable connector"),
            }
        }
        Ok(connectors)
    }
}
