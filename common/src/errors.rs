// Error handling framework for the connector pipeline

use thiserror::Error;

/// Schedule-related errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("No next execution time available for cron expression '{0}'")]
    NoNextExecution(String),
}

/// Job queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Job {id} cannot be {action} while {status}")]
    InvalidTransition {
        id: i64,
        status: String,
        action: &'static str,
    },

    #[error("No handler registered for job '{0}'")]
    NoHandler(String),

    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("Queue storage failed: {0}")]
    Storage(String),
}

/// Connector lookup and configuration errors
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Connector not found: {0}")]
    NotFound(i64),

    #[error("Failed to load connector: {0}")]
    Lookup(String),

    #[error("Invalid connector configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),
}

/// Errors raised while turning a connector into a queued job
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Invalid job payload: {0}")]
    Payload(String),
}

/// Remote transport errors (FTP, FTPS, SFTP, HTTP)
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Remote file not found: {0}")]
    FileNotFound(String),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Remote operation failed: {0}")]
    OperationFailed(String),

    #[error("Local I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Connector run errors surfaced to the queue processor
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("Connector {connector_id} run failed for all {failed} specification(s)")]
    AllSpecificationsFailed { connector_id: i64, failed: usize },

    #[error("Failed to record execution log: {0}")]
    LogPersistence(String),
}

/// Credential decryption errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption secret must be at least 32 characters")]
    WeakSecret,

    #[error("Invalid encrypted value: {0}")]
    InvalidFormat(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Execution log storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// API response error type for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        let code = match err {
            QueueError::JobNotFound(_) => "NOT_FOUND",
            QueueError::InvalidTransition { .. } => "VALIDATION_ERROR",
            _ => "QUEUE_ERROR",
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<ConnectorError> for ApiError {
    fn from(err: ConnectorError) -> Self {
        let code = match err {
            ConnectorError::NotFound(_) => "NOT_FOUND",
            _ => "CONNECTOR_ERROR",
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Connector(e) => e.into(),
            DispatchError::Queue(e) => e.into(),
            DispatchError::Payload(msg) => ApiError::new("VALIDATION_ERROR", msg),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        let code = match err {
            StorageError::NotFound(_) => "NOT_FOUND",
            _ => "STORAGE_ERROR",
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        let code = match err {
            DatabaseError::NotFound(_) => "NOT_FOUND",
            _ => "DATABASE_ERROR",
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => DatabaseError::DuplicateKey(db_err.message().to_string()),
                        "23503" => DatabaseError::ForeignKeyViolation(db_err.message().to_string()),
                        _ => DatabaseError::QueryFailed(db_err.message().to_string()),
                    }
                } else {
                    DatabaseError::QueryFailed(db_err.message().to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<DatabaseError> for QueueError {
    fn from(err: DatabaseError) -> Self {
        QueueError::Storage(err.to_string())
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::from(DatabaseError::from(err))
    }
}

impl From<DatabaseError> for StorageError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(msg) => StorageError::NotFound(msg),
            other => StorageError::DatabaseError(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::from(DatabaseError::from(err))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::InvalidJson(err.to_string())
    }
}
