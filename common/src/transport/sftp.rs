// SFTP transport over ssh2

use super::{run_blocking, RemoteFile, Transport, TransportSettings};
use crate::errors::TransportError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ssh2::{Session, Sftp};
use std::fs::File;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

pub struct SftpTransport {
    settings: TransportSettings,
    session: Option<Session>,
}

impl SftpTransport {
    pub fn new(settings: TransportSettings) -> Self {
        Self {
            settings,
            session: None,
        }
    }

    fn session(&self) -> Result<Session, TransportError> {
        self.session.clone().ok_or(TransportError::NotConnected)
    }
}

fn open_session(settings: &TransportSettings) -> Result<Session, TransportError> {
    let addr = (settings.host.as_str(), settings.port)
        .to_socket_addrs()
        .map_err(|e| {
            TransportError::ConnectionFailed(format!(
                "Failed to resolve {}:{}: {}",
                settings.host, settings.port, e
            ))
        })?
        .next()
        .ok_or_else(|| {
            TransportError::ConnectionFailed(format!(
                "No address found for {}:{}",
                settings.host, settings.port
            ))
        })?;

    let tcp = TcpStream::connect_timeout(&addr, settings.timeout).map_err(|e| {
        error!(error = %e, host = %settings.host, port = settings.port, "Failed to connect");
        TransportError::ConnectionFailed(format!(
            "Failed to connect to {}:{}: {}",
            settings.host, settings.port, e
        ))
    })?;
    tcp.set_read_timeout(Some(settings.timeout))?;
    tcp.set_write_timeout(Some(settings.timeout))?;

    let mut session = Session::new().map_err(|e| {
        TransportError::ConnectionFailed(format!("Failed to create SSH session: {}", e))
    })?;
    session.set_tcp_stream(tcp);
    session.set_timeout(settings.timeout.as_millis().min(u128::from(u32::MAX)) as u32);
    session.handshake().map_err(|e| {
        error!(error = %e, "SSH handshake failed");
        TransportError::ConnectionFailed(format!("SSH handshake failed: {}", e))
    })?;

    session
        .userauth_password(&settings.username, &settings.password)
        .map_err(|e| {
            error!(error = %e, username = %settings.username, "Password authentication failed");
            TransportError::AuthenticationFailed(format!(
                "Password authentication failed for user {}: {}",
                settings.username, e
            ))
        })?;
    if !session.authenticated() {
        return Err(TransportError::AuthenticationFailed(
            "Authentication failed".to_string(),
        ));
    }
    Ok(session)
}

fn open_sftp(session: &Session) -> Result<Sftp, TransportError> {
    session
        .sftp()
        .map_err(|e| TransportError::OperationFailed(format!("Failed to open SFTP channel: {}", e)))
}

fn list_dir(
    sftp: &Sftp,
    dir: &Path,
    prefix: &str,
    recursive: bool,
    out: &mut Vec<RemoteFile>,
) -> Result<(), TransportError> {
    let entries = sftp.readdir(dir).map_err(|e| {
        TransportError::OperationFailed(format!("Failed to list {}: {}", dir.display(), e))
    })?;

    for (path, stat) in entries {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if name != "." && name != ".." => name.to_string(),
            _ => continue,
        };
        let relative = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };
        if stat.is_dir() {
            if recursive {
                list_dir(sftp, &path, &relative, recursive, out)?;
            }
            continue;
        }
        out.push(RemoteFile {
            name: relative,
            modified: stat
                .mtime
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0)),
            size: stat.size.unwrap_or(0),
        });
    }
    Ok(())
}

#[async_trait]
impl Transport for SftpTransport {
    #[instrument(skip(self), fields(host = %self.settings.host, port = self.settings.port))]
    async fn connect(&mut self) -> Result<(), TransportError> {
        let settings = self.settings.clone();
        let session = run_blocking(move || open_session(&settings)).await?;
        self.session = Some(session);
        info!("SFTP session established");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&mut self, dir: &str, recursive: bool) -> Result<Vec<RemoteFile>, TransportError> {
        let session = self.session()?;
        let dir = PathBuf::from(dir);
        run_blocking(move || {
            let sftp = open_sftp(&session)?;
            let mut files = Vec::new();
            list_dir(&sftp, &dir, "", recursive, &mut files)?;
            Ok(files)
        })
        .await
    }

    #[instrument(skip(self, local))]
    async fn download(&mut self, remote: &str, local: &Path) -> Result<u64, TransportError> {
        let session = self.session()?;
        let remote = PathBuf::from(remote);
        let local = local.to_path_buf();
        run_blocking(move || {
            let sftp = open_sftp(&session)?;
            let mut source = sftp.open(&remote).map_err(|e| {
                TransportError::FileNotFound(format!("{}: {}", remote.display(), e))
            })?;
            let mut target = File::create(&local)?;
            Ok(io::copy(&mut source, &mut target)?)
        })
        .await
    }

    #[instrument(skip(self, local))]
    async fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, TransportError> {
        let session = self.session()?;
        let remote = PathBuf::from(remote);
        let local = local.to_path_buf();
        run_blocking(move || {
            let sftp = open_sftp(&session)?;
            let mut source = File::open(&local)?;
            let mut target = sftp.create(&remote).map_err(|e| {
                TransportError::TransferFailed(format!("Failed to create {}: {}", remote.display(), e))
            })?;
            Ok(io::copy(&mut source, &mut target)?)
        })
        .await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        run_blocking(move || {
            if let Err(e) = session.disconnect(None, "closing connector session", None) {
                warn!(error = %e, "SFTP disconnect failed");
            }
            Ok(())
        })
        .await
    }
}
