// Remote file transports used by connector runs

pub mod ftp;
pub mod http;
pub mod memory;
pub mod sftp;

pub use ftp::FtpTransport;
pub use http::HttpTransport;
pub use memory::InMemoryRemote;
pub use sftp::SftpTransport;

use crate::errors::TransportError;
use crate::models::{ConnectorSpecification, Protocol};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;

/// A file entry returned by a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Path relative to the listed directory, `/`-separated
    pub name: String,
    pub modified: Option<DateTime<Utc>>,
    pub size: u64,
}

/// Connection parameters for a single transport session
#[derive(Clone)]
pub struct TransportSettings {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl TransportSettings {
    /// Build settings for a connector with an already decrypted password
    pub fn for_connector(
        connector: &ConnectorSpecification,
        password: String,
        accept_invalid_certs: bool,
    ) -> Self {
        Self {
            protocol: connector.protocol,
            host: connector.host_name.clone(),
            port: connector.effective_port(),
            username: connector.username.clone(),
            password,
            timeout: Duration::from_secs(u64::from(connector.timeout.max(1))),
            accept_invalid_certs,
        }
    }
}

impl std::fmt::Debug for TransportSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSettings")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// One session against a remote endpoint
///
/// Callers must invoke `close` after a successful `connect`, on every path.
#[async_trait]
pub trait Transport: Send {
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// List files under `dir`; directories are descended only when `recursive`
    async fn list(&mut self, dir: &str, recursive: bool) -> Result<Vec<RemoteFile>, TransportError>;

    /// Copy a remote file to `local`, returning the bytes written
    async fn download(&mut self, remote: &str, local: &Path) -> Result<u64, TransportError>;

    /// Copy `local` to the remote path, returning the bytes sent
    async fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Picks a transport implementation for a protocol
pub trait TransportFactory: Send + Sync {
    fn create(&self, settings: TransportSettings) -> Result<Box<dyn Transport>, TransportError>;
}

#[derive(Debug, Default, Clone)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, settings: TransportSettings) -> Result<Box<dyn Transport>, TransportError> {
        let transport: Box<dyn Transport> = match settings.protocol {
            Protocol::Ftp => Box::new(FtpTransport::new(settings, false)),
            Protocol::Ftps => Box::new(FtpTransport::new(settings, true)),
            Protocol::Sftp => Box::new(SftpTransport::new(settings)),
            Protocol::Http => Box::new(HttpTransport::new(settings, false)?),
            Protocol::Https => Box::new(HttpTransport::new(settings, true)?),
        };
        Ok(transport)
    }
}

/// Join a directory and a relative name with a single `/`
pub fn join_remote(dir: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        return name.to_string();
    }
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Run a blocking client call off the async runtime
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, TransportError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TransportError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransportError::OperationFailed(format!("Transport task failed: {}", e)))?
}
