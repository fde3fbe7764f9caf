// Domain models for connectors, queued jobs and execution logs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job name handled by the connector import executor
pub const CONNECTOR_IMPORT_JOB: &str = "connector.import";
/// Job name handled by the connector export executor
pub const CONNECTOR_EXPORT_JOB: &str = "connector.export";

/// Direction of a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorType {
    Import,
    Export,
}

impl ConnectorType {
    /// Queue job name used for runs of this connector type
    pub fn job_name(&self) -> &'static str {
        match self {
            ConnectorType::Import => CONNECTOR_IMPORT_JOB,
            ConnectorType::Export => CONNECTOR_EXPORT_JOB,
        }
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorType::Import => write!(f, "import"),
            ConnectorType::Export => write!(f, "export"),
        }
    }
}

impl FromStr for ConnectorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "import" => Ok(ConnectorType::Import),
            "export" => Ok(ConnectorType::Export),
            _ => Err(format!("Invalid connector type: {}", s)),
        }
    }
}

/// Remote transfer protocol of a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ftp,
    Ftps,
    Sftp,
    Http,
    Https,
}

impl Protocol {
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Ftp | Protocol::Ftps => 21,
            Protocol::Sftp => 22,
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Ftp => "ftp",
            Protocol::Ftps => "ftps",
            Protocol::Sftp => "sftp",
            Protocol::Http => "http",
            Protocol::Https => "https",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ftp" => Ok(Protocol::Ftp),
            "ftps" => Ok(Protocol::Ftps),
            "sftp" => Ok(Protocol::Sftp),
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            _ => Err(format!("Unsupported protocol: {}", s)),
        }
    }
}

/// Connector configuration owned by the metadata platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorSpecification {
    pub id: i64,
    pub name: String,
    pub connector_type: ConnectorType,
    pub protocol: Protocol,
    pub host_name: String,
    pub port: Option<u16>,
    pub username: String,
    /// Encrypted at rest, decrypted only when a transport is opened
    pub password: String,
    /// Connection timeout in seconds
    pub timeout: u32,
    pub maximum_retries: u32,
    pub cron_schedule: String,
    pub disabled: bool,
    pub entry_user_id: i64,
    pub parameters: ConnectorParameters,
}

impl ConnectorSpecification {
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }

    pub fn specification_ids(&self) -> Vec<i64> {
        self.parameters
            .specifications
            .iter()
            .map(|s| s.specification_id)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorParameters {
    /// Directory listed by imports
    #[serde(default)]
    pub remote_path: String,
    /// Directory uploads land in; falls back to `remote_path`
    #[serde(default)]
    pub upload_path: Option<String>,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub specifications: Vec<SpecificationBinding>,
}

impl ConnectorParameters {
    pub fn effective_upload_path(&self) -> &str {
        match self.upload_path.as_deref() {
            Some(path) if !path.is_empty() => path,
            _ => &self.remote_path,
        }
    }
}

/// One import/export specification referenced by a connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecificationBinding {
    pub specification_id: i64,
    #[serde(default)]
    pub file_pattern: Option<String>,
    #[serde(default)]
    pub file_name_template: Option<String>,
    #[serde(default)]
    pub station_id: Option<String>,
    #[serde(flatten)]
    pub period: Option<ObservationPeriod>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationType {
    Days,
    Hours,
}

impl fmt::Display for DurationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurationType::Days => write!(f, "days"),
            DurationType::Hours => write!(f, "hours"),
        }
    }
}

/// Observation window covered by an export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationPeriod {
    pub duration: u32,
    pub duration_type: DurationType,
}

/// Job status in the queue state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Finished,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "finished" => Ok(JobStatus::Finished),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// A queued unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueJob {
    pub id: i64,
    pub name: String,
    pub payload: serde_json::Value,
    pub scheduled_at: DateTime<Utc>,
    pub status: JobStatus,
    pub attempts: i32,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub entry_user_id: i64,
    pub created_at: DateTime<Utc>,
}

impl QueueJob {
    /// Retry ceiling carried in the payload, if any
    pub fn max_retries(&self) -> Option<u32> {
        self.payload
            .get("maxRetries")
            .and_then(|v| v.as_u64())
            .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
    }
}

/// Insert request for a new job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub payload: serde_json::Value,
    pub scheduled_at: DateTime<Utc>,
    pub entry_user_id: i64,
}

/// One-based page request shared by the job and execution log queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    pub const DEFAULT_PAGE_SIZE: u32 = 50;
    pub const MAX_PAGE_SIZE: u32 = 500;

    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(Self::DEFAULT_PAGE_SIZE)
                .clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// What caused a connector job to be enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Schedule,
    Manual,
}

/// Payload of `connector.import` / `connector.export` jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorJobPayload {
    pub connector_id: i64,
    pub connector_type: ConnectorType,
    #[serde(default = "empty_object")]
    pub extra_metadata: serde_json::Value,
    pub triggered_by: TriggerSource,
    pub max_retries: u32,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ConnectorJobPayload {
    pub fn for_connector(connector: &ConnectorSpecification, triggered_by: TriggerSource) -> Self {
        Self {
            connector_id: connector.id,
            connector_type: connector.connector_type,
            extra_metadata: serde_json::json!({
                "connectorName": connector.name,
                "specificationIds": connector.specification_ids(),
            }),
            triggered_by,
            max_retries: connector.maximum_retries,
        }
    }
}

/// Remote file attributes captured at listing time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileMetadata {
    pub file_name: String,
    pub modified_date: DateTime<Utc>,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportFileResult {
    pub remote_file_metadata: RemoteFileMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unchanged_file: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportActivity {
    pub file_pattern: String,
    pub specification_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station_id: Option<String>,
    pub processed_files: Vec<ImportFileResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFileResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportActivity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_pattern: Option<String>,
    pub specification_id: i64,
    pub processed_files: Vec<ExportFileResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Record of one specification processed within a connector run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "activityType", rename_all = "lowercase")]
pub enum ExecutionActivity {
    Import(ImportActivity),
    Export(ExportActivity),
}

fn has_message(message: &Option<String>) -> bool {
    message.as_deref().is_some_and(|m| !m.is_empty())
}

impl ExecutionActivity {
    pub fn specification_id(&self) -> i64 {
        match self {
            ExecutionActivity::Import(a) => a.specification_id,
            ExecutionActivity::Export(a) => a.specification_id,
        }
    }

    /// Number of activity and file entries carrying an error message
    pub fn error_count(&self) -> usize {
        match self {
            ExecutionActivity::Import(a) => {
                usize::from(has_message(&a.error_message))
                    + a.processed_files
                        .iter()
                        .filter(|f| has_message(&f.error_message))
                        .count()
            }
            ExecutionActivity::Export(a) => {
                usize::from(has_message(&a.error_message))
                    + a.processed_files
                        .iter()
                        .filter(|f| has_message(&f.error_message))
                        .count()
            }
        }
    }

    /// True when nothing in this activity succeeded
    ///
    /// An activity with no files and no activity-level error is a success.
    pub fn has_failed(&self) -> bool {
        let (activity_error, files, failed_files) = match self {
            ExecutionActivity::Import(a) => (
                has_message(&a.error_message),
                a.processed_files.len(),
                a.processed_files
                    .iter()
                    .filter(|f| has_message(&f.error_message))
                    .count(),
            ),
            ExecutionActivity::Export(a) => (
                has_message(&a.error_message),
                a.processed_files.len(),
                a.processed_files
                    .iter()
                    .filter(|f| has_message(&f.error_message))
                    .count(),
            ),
        };
        activity_error || (files > 0 && failed_files == files)
    }
}

/// Persisted record of one connector run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLog {
    pub id: i64,
    pub connector_id: i64,
    pub execution_start_datetime: DateTime<Utc>,
    pub execution_end_datetime: DateTime<Utc>,
    pub execution_activities: Vec<ExecutionActivity>,
    pub total_errors: i32,
    pub entry_user_id: i64,
    pub entry_date_time: DateTime<Utc>,
}

impl ExecutionLog {
    pub fn has_errors(&self) -> bool {
        self.total_errors > 0
    }
}

/// Insert request for an execution log; `total_errors` is derived
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecutionLog {
    pub connector_id: i64,
    pub execution_start_datetime: DateTime<Utc>,
    pub execution_end_datetime: DateTime<Utc>,
    pub execution_activities: Vec<ExecutionActivity>,
    pub entry_user_id: i64,
}

impl NewExecutionLog {
    pub fn total_errors(&self) -> i32 {
        let errors = self
            .execution_activities
            .iter()
            .map(ExecutionActivity::error_count)
            .sum::<usize>();
        i32::try_from(errors).unwrap_or(i32::MAX)
    }
}

/// Aggregate run statistics for one connector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorExecutionStats {
    pub total_executions: u64,
    pub total_errors: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub last_execution: Option<DateTime<Utc>>,
}

impl ConnectorExecutionStats {
    pub fn from_logs<'a>(logs: impl IntoIterator<Item = &'a ExecutionLog>) -> Self {
        logs.into_iter().fold(Self::default(), |mut stats, log| {
            stats.total_executions += 1;
            stats.total_errors += log.total_errors.max(0) as u64;
            if log.has_errors() {
                stats.failed_executions += 1;
            } else {
                stats.successful_executions += 1;
            }
            stats.last_execution = match stats.last_execution {
                Some(last) if last >= log.execution_start_datetime => Some(last),
                _ => Some(log.execution_start_datetime),
            };
            stats
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn file(error: Option<&str>) -> ImportFileResult {
        ImportFileResult {
            remote_file_metadata: RemoteFileMetadata {
                file_name: "obs.csv".to_string(),
                modified_date: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
                size: 10,
            },
            downloaded_file_name: None,
            processed_file_name: None,
            error_message: error.map(str::to_string),
            unchanged_file: None,
        }
    }

    fn import_activity(files: Vec<ImportFileResult>) -> ExecutionActivity {
        ExecutionActivity::Import(ImportActivity {
            file_pattern: "*.csv".to_string(),
            specification_id: 1,
            station_id: None,
            processed_files: files,
            error_message: None,
        })
    }

    #[test]
    fn test_max_retries_saturates_out_of_range_values() {
        let job = |payload: serde_json::Value| QueueJob {
            id: 1,
            name: "connector.import".to_string(),
            payload,
            scheduled_at: Utc::now(),
            status: JobStatus::Pending,
            attempts: 0,
            error_message: None,
            processed_at: None,
            entry_user_id: 1,
            created_at: Utc::now(),
        };
        assert_eq!(job(serde_json::json!({ "maxRetries": 2 })).max_retries(), Some(2));
        assert_eq!(
            job(serde_json::json!({ "maxRetries": 5_000_000_000u64 })).max_retries(),
            Some(u32::MAX)
        );
        assert_eq!(job(serde_json::json!({ "maxRetries": -1 })).max_retries(), None);
        assert_eq!(job(serde_json::json!({})).max_retries(), None);
    }

    #[test]
    fn test_connector_type_job_names() {
        assert_eq!(ConnectorType::Import.job_name(), "connector.import");
        assert_eq!(ConnectorType::Export.job_name(), "connector.export");
    }

    #[test]
    fn test_job_status_round_trip_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Finished,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_pagination_defaults_and_clamps() {
        let page = Pagination::new(None, None);
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, Pagination::DEFAULT_PAGE_SIZE);
        assert_eq!(page.offset(), 0);

        let page = Pagination::new(Some(0), Some(10_000));
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, Pagination::MAX_PAGE_SIZE);

        assert_eq!(Pagination::new(Some(3), Some(20)).offset(), 40);
    }

    #[test]
    fn test_payload_serializes_camel_case() {
        let payload = ConnectorJobPayload {
            connector_id: 7,
            connector_type: ConnectorType::Import,
            extra_metadata: serde_json::json!({}),
            triggered_by: TriggerSource::Schedule,
            max_retries: 3,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "connectorId": 7,
                "connectorType": "import",
                "extraMetadata": {},
                "triggeredBy": "schedule",
                "maxRetries": 3
            })
        );
    }

    #[test]
    fn test_payload_defaults_missing_extra_metadata() {
        let payload: ConnectorJobPayload = serde_json::from_value(serde_json::json!({
            "connectorId": 1,
            "connectorType": "export",
            "triggeredBy": "manual",
            "maxRetries": 2
        }))
        .unwrap();
        assert_eq!(payload.extra_metadata, serde_json::json!({}));
    }

    #[test]
    fn test_activity_error_count_and_failure() {
        let partial = import_activity(vec![file(None), file(Some("boom")), file(None)]);
        assert_eq!(partial.error_count(), 1);
        assert!(!partial.has_failed());

        let all_failed = import_activity(vec![file(Some("a")), file(Some("b"))]);
        assert_eq!(all_failed.error_count(), 2);
        assert!(all_failed.has_failed());

        let empty = import_activity(vec![]);
        assert_eq!(empty.error_count(), 0);
        assert!(!empty.has_failed());
    }

    #[test]
    fn test_empty_error_message_is_not_an_error() {
        let activity = import_activity(vec![file(Some(""))]);
        assert_eq!(activity.error_count(), 0);
    }

    #[test]
    fn test_export_activity_level_error_counts() {
        let activity = ExecutionActivity::Export(ExportActivity {
            file_pattern: None,
            specification_id: 3,
            processed_files: vec![],
            error_message: Some("generation failed".to_string()),
        });
        assert_eq!(activity.error_count(), 1);
        assert!(activity.has_failed());
    }

    #[test]
    fn test_activity_serializes_with_tag() {
        let value = serde_json::to_value(import_activity(vec![])).unwrap();
        assert_eq!(value["activityType"], "import");
        assert_eq!(value["filePattern"], "*.csv");
    }

    #[test]
    fn test_binding_reads_flattened_period() {
        let binding: SpecificationBinding = serde_json::from_value(serde_json::json!({
            "specificationId": 4,
            "fileNameTemplate": "obs_{timestamp}.csv",
            "duration": 2,
            "durationType": "days"
        }))
        .unwrap();
        assert_eq!(
            binding.period,
            Some(ObservationPeriod {
                duration: 2,
                duration_type: DurationType::Days
            })
        );
    }

    #[test]
    fn test_stats_from_logs() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let log = |id: i64, errors: i32, hours: i64| ExecutionLog {
            id,
            connector_id: 1,
            execution_start_datetime: start + chrono::Duration::hours(hours),
            execution_end_datetime: start + chrono::Duration::hours(hours),
            execution_activities: vec![],
            total_errors: errors,
            entry_user_id: 1,
            entry_date_time: start,
        };
        let logs = vec![log(1, 0, 0), log(2, 2, 5), log(3, 0, 2)];
        let stats = ConnectorExecutionStats::from_logs(&logs);
        assert_eq!(stats.total_executions, 3);
        assert_eq!(stats.total_errors, 2);
        assert_eq!(stats.successful_executions, 2);
        assert_eq!(stats.failed_executions, 1);
        assert_eq!(stats.last_execution, Some(start + chrono::Duration::hours(5)));
    }
}
