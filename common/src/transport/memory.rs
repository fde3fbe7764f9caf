// In-memory remote endpoint, for embedding and tests

use super::{RemoteFile, Transport, TransportFactory, TransportSettings};
use crate::errors::TransportError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct RemoteEntry {
    contents: Vec<u8>,
    modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct RemoteState {
    files: BTreeMap<String, RemoteEntry>,
    failing_downloads: HashSet<String>,
    refuse_connections: bool,
    connects: usize,
    closes: usize,
}

/// A remote file tree shared by every session the factory creates
#[derive(Debug, Clone, Default)]
pub struct InMemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        // a poisoned lock only means a test thread panicked mid-update
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn put(&self, path: &str, contents: &[u8], modified: DateTime<Utc>) {
        self.insert(path, contents, Some(modified));
    }

    /// Store a file whose listing carries no modified time, like an HTTP index
    pub fn put_undated(&self, path: &str, contents: &[u8]) {
        self.insert(path, contents, None);
    }

    fn insert(&self, path: &str, contents: &[u8], modified: Option<DateTime<Utc>>) {
        self.state().files.insert(
            path.to_string(),
            RemoteEntry {
                contents: contents.to_vec(),
                modified,
            },
        );
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(path).map(|e| e.contents.clone())
    }

    /// Make downloads of `path` fail
    pub fn fail_download(&self, path: &str) {
        self.state().failing_downloads.insert(path.to_string());
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state().refuse_connections = refuse;
    }

    /// (successful connects, closes)
    pub fn session_counts(&self) -> (usize, usize) {
        let state = self.state();
        (state.connects, state.closes)
    }
}

impl TransportFactory for InMemoryRemote {
    fn create(&self, _settings: TransportSettings) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(InMemoryTransport {
            remote: self.clone(),
            connected: false,
        }))
    }
}

struct InMemoryTransport {
    remote: InMemoryRemote,
    connected: bool,
}

impl InMemoryTransport {
    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.remote.state();
        if state.refuse_connections {
            return Err(TransportError::ConnectionFailed("connection refused".to_string()));
        }
        state.connects += 1;
        self.connected = true;
        Ok(())
    }

    async fn list(&mut self, dir: &str, recursive: bool) -> Result<Vec<RemoteFile>, TransportError> {
        self.ensure_connected()?;
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let state = self.remote.state();
        Ok(state
            .files
            .iter()
            .filter_map(|(path, entry)| {
                let name = path.strip_prefix(&prefix)?;
                if !recursive && name.contains('/') {
                    return None;
                }
                Some(RemoteFile {
                    name: name.to_string(),
                    modified: entry.modified,
                    size: entry.contents.len() as u64,
                })
            })
            .collect())
    }

    async fn download(&mut self, remote: &str, local: &Path) -> Result<u64, TransportError> {
        self.ensure_connected()?;
        let contents = {
            let state = self.remote.state();
            if state.failing_downloads.contains(remote) {
                return Err(TransportError::TransferFailed(format!("{}: read error", remote)));
            }
            state
                .files
                .get(remote)
                .map(|e| e.contents.clone())
                .ok_or_else(|| TransportError::FileNotFound(remote.to_string()))?
        };
        tokio::fs::write(local, &contents).await?;
        Ok(contents.len() as u64)
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, TransportError> {
        self.ensure_connected()?;
        let contents = tokio::fs::read(local).await?;
        let size = contents.len() as u64;
        self.remote.put(remote, &contents, Utc::now());
        Ok(size)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.connected {
            self.connected = false;
            self.remote.state().closes += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Protocol;
    use std::time::Duration;

    fn settings() -> TransportSettings {
        TransportSettings {
            protocol: Protocol::Sftp,
            host: "memory".to_string(),
            port: 22,
            username: String::new(),
            password: String::new(),
            timeout: Duration::from_secs(1),
            accept_invalid_certs: false,
        }
    }

    #[tokio::test]
    async fn test_listing_respects_recursion() {
        let remote = InMemoryRemote::new();
        let now = Utc::now();
        remote.put("/in/a.csv", b"1", now);
        remote.put("/in/2024/b.csv", b"22", now);
        remote.put("/other/c.csv", b"333", now);

        let mut transport = remote.create(settings()).unwrap();
        transport.connect().await.unwrap();
        let flat = transport.list("/in", false).await.unwrap();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].name, "a.csv");

        let deep = transport.list("/in/", true).await.unwrap();
        assert_eq!(deep.len(), 2);
        transport.close().await.unwrap();
        assert_eq!(remote.session_counts(), (1, 1));
    }
}
