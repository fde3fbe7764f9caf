// FTP and FTPS transport (explicit AUTH TLS)

use super::{join_remote, run_blocking, RemoteFile, Transport, TransportSettings};
use crate::errors::TransportError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use suppaftp::types::FileType;
use suppaftp::{NativeTlsConnector, NativeTlsFtpStream};
use tracing::{debug, error, info, instrument};

/// FTP client; the same stream type serves plain and secured sessions
pub struct FtpTransport {
    settings: TransportSettings,
    secure: bool,
    stream: Option<NativeTlsFtpStream>,
}

impl FtpTransport {
    pub fn new(settings: TransportSettings, secure: bool) -> Self {
        Self {
            settings,
            secure,
            stream: None,
        }
    }

    /// Move the stream into a blocking task and put it back afterwards
    async fn with_stream<T, F>(&mut self, op: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&mut NativeTlsFtpStream) -> Result<T, TransportError> + Send + 'static,
    {
        let mut stream = self.stream.take().ok_or(TransportError::NotConnected)?;
        let (stream, result) = run_blocking(move || {
            let result = op(&mut stream);
            Ok((stream, result))
        })
        .await?;
        self.stream = Some(stream);
        result
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| {
            TransportError::ConnectionFailed(format!("Failed to resolve {}:{}: {}", host, port, e))
        })?
        .next()
        .ok_or_else(|| {
            TransportError::ConnectionFailed(format!("No address found for {}:{}", host, port))
        })
}

fn open_session(settings: &TransportSettings, secure: bool) -> Result<NativeTlsFtpStream, TransportError> {
    let addr = resolve(&settings.host, settings.port)?;
    let mut stream = NativeTlsFtpStream::connect_timeout(addr, settings.timeout).map_err(|e| {
        error!(error = %e, host = %settings.host, port = settings.port, "FTP connect failed");
        TransportError::ConnectionFailed(format!(
            "Failed to connect to {}:{}: {}",
            settings.host, settings.port, e
        ))
    })?;
    stream.get_ref().set_read_timeout(Some(settings.timeout))?;
    stream.get_ref().set_write_timeout(Some(settings.timeout))?;

    if secure {
        let tls = suppaftp::native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .danger_accept_invalid_hostnames(settings.accept_invalid_certs)
            .build()
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to build TLS connector: {}", e)))?;
        stream = stream
            .into_secure(NativeTlsConnector::from(tls), &settings.host)
            .map_err(|e| {
                TransportError::ConnectionFailed(format!("TLS negotiation failed: {}", e))
            })?;
    }

    stream
        .login(settings.username.as_str(), settings.password.as_str())
        .map_err(|e| {
            error!(error = %e, username = %settings.username, "FTP login failed");
            TransportError::AuthenticationFailed(format!(
                "Login failed for user {}: {}",
                settings.username, e
            ))
        })?;
    stream
        .transfer_type(FileType::Binary)
        .map_err(|e| TransportError::OperationFailed(format!("Failed to set binary mode: {}", e)))?;
    Ok(stream)
}

fn list_dir(
    stream: &mut NativeTlsFtpStream,
    dir: &str,
    prefix: &str,
    recursive: bool,
    out: &mut Vec<RemoteFile>,
) -> Result<(), TransportError> {
    let lines = stream
        .list(Some(dir))
        .map_err(|e| TransportError::OperationFailed(format!("Failed to list {}: {}", dir, e)))?;

    for line in lines {
        let entry = match suppaftp::list::File::from_str(&line) {
            Ok(entry) => entry,
            Err(_) => {
                debug!(line = %line, "Skipping unparseable listing line");
                continue;
            }
        };
        let name = entry.name();
        if name == "." || name == ".." {
            continue;
        }
        let relative = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };
        if entry.is_directory() {
            if recursive {
                list_dir(stream, &join_remote(dir, name), &relative, recursive, out)?;
            }
            continue;
        }
        out.push(RemoteFile {
            name: relative,
            modified: Some(DateTime::<Utc>::from(entry.modified())),
            size: entry.size() as u64,
        });
    }
    Ok(())
}

#[async_trait]
impl Transport for FtpTransport {
    #[instrument(skip(self), fields(host = %self.settings.host, secure = self.secure))]
    async fn connect(&mut self) -> Result<(), TransportError> {
        let settings = self.settings.clone();
        let secure = self.secure;
        let stream = run_blocking(move || open_session(&settings, secure)).await?;
        self.stream = Some(stream);
        info!("FTP session established");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&mut self, dir: &str, recursive: bool) -> Result<Vec<RemoteFile>, TransportError> {
        let dir = dir.to_string();
        self.with_stream(move |stream| {
            let mut files = Vec::new();
            list_dir(stream, &dir, "", recursive, &mut files)?;
            Ok(files)
        })
        .await
    }

    #[instrument(skip(self, local))]
    async fn download(&mut self, remote: &str, local: &Path) -> Result<u64, TransportError> {
        let remote = remote.to_string();
        let local: PathBuf = local.to_path_buf();
        self.with_stream(move |stream| {
            let mut data = stream.retr_as_stream(&remote).map_err(|e| {
                TransportError::FileNotFound(format!("{}: {}", remote, e))
            })?;
            let mut file = File::create(&local)?;
            let copied = io::copy(&mut data, &mut file);
            stream.finalize_retr_stream(data).map_err(|e| {
                TransportError::TransferFailed(format!("Failed to complete download of {}: {}", remote, e))
            })?;
            Ok(copied?)
        })
        .await
    }

    #[instrument(skip(self, local))]
    async fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, TransportError> {
        let remote = remote.to_string();
        let local: PathBuf = local.to_path_buf();
        self.with_stream(move |stream| {
            let mut file = File::open(&local)?;
            stream.put_file(&remote, &mut file).map_err(|e| {
                TransportError::TransferFailed(format!("Failed to upload {}: {}", remote, e))
            })
        })
        .await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.stream.is_none() {
            return Ok(());
        }
        let result = self
            .with_stream(|stream| {
                stream
                    .quit()
                    .map_err(|e| TransportError::OperationFailed(format!("Failed to quit: {}", e)))
            })
            .await;
        self.stream = None;
        result
    }
}
