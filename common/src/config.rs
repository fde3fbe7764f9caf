// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub queue: QueueConfig,
    #[serde(default)]
    pub execution_log: ExecutionLogConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    pub encryption: EncryptionConfig,
    pub collaborators: CollaboratorConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA timezone name used to evaluate connector cron expressions
    pub timezone: String,
    /// Postgres NOTIFY channel carrying connector lifecycle events
    pub notify_channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub poll_interval_seconds: u64,
    pub batch_size: u32,
    pub concurrency: u32,
    pub retry_delay_seconds: u64,
    pub default_max_retries: u32,
    pub retention_days: u32,
    /// Six-field cron expression for the daily cleanup tick
    pub cleanup_cron: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionLogConfig {
    /// Execution logs older than this are removed by the cleanup tick when set
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub scratch_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,
}

fn default_accept_invalid_certs() -> bool {
    true
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            accept_invalid_certs: default_accept_invalid_certs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    /// Base URL of the metadata platform exposing observation import/export endpoints
    pub base_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides are not committed
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        if self.scheduler.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(format!(
                "Scheduler timezone '{}' is not a valid IANA timezone",
                self.scheduler.timezone
            ));
        }
        if self.scheduler.notify_channel.is_empty() {
            return Err("Scheduler notify_channel cannot be empty".to_string());
        }

        if self.queue.poll_interval_seconds == 0 {
            return Err("Queue poll_interval_seconds must be greater than 0".to_string());
        }
        if self.queue.batch_size == 0 {
            return Err("Queue batch_size must be greater than 0".to_string());
        }
        if self.queue.concurrency == 0 {
            return Err("Queue concurrency must be greater than 0".to_string());
        }
        if crate::schedule::parse_cron_expression(&self.queue.cleanup_cron).is_err() {
            return Err(format!(
                "Queue cleanup_cron '{}' is not a valid cron expression",
                self.queue.cleanup_cron
            ));
        }

        if self.encryption.secret.len() < 32 {
            return Err("Encryption secret must be at least 32 characters".to_string());
        }

        if self.collaborators.base_url.is_empty() {
            return Err("Collaborator base_url cannot be empty".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/climsoft".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
            },
            scheduler: SchedulerConfig {
                timezone: "UTC".to_string(),
                notify_channel: "connector_events".to_string(),
            },
            queue: QueueConfig {
                poll_interval_seconds: 60,
                batch_size: 10,
                concurrency: 1,
                retry_delay_seconds: 60,
                default_max_retries: 3,
                retention_days: 30,
                cleanup_cron: "0 0 3 * * *".to_string(),
            },
            execution_log: ExecutionLogConfig::default(),
            storage: StorageConfig {
                scratch_dir: PathBuf::from("data/scratch"),
            },
            transport: TransportConfig::default(),
            encryption: EncryptionConfig {
                secret: "change-me-in-production-32-chars-minimum".to_string(),
            },
            collaborators: CollaboratorConfig {
                base_url: "http://localhost:3000/api".to_string(),
                timeout_seconds: 120,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
                tracing_endpoint: None,
            },
        }
    }
}
