// HTTP(S) transport: directory listings, streamed downloads, multipart uploads

use super::{join_remote, RemoteFile, Transport, TransportSettings};
use crate::errors::TransportError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use regex::Regex;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// Entry shape accepted from JSON directory listings
#[derive(Debug, Deserialize)]
struct JsonEntry {
    #[serde(alias = "fileName")]
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default, alias = "modifiedDate")]
    modified: Option<DateTime<Utc>>,
    #[serde(default, alias = "isDirectory", alias = "directory")]
    is_dir: bool,
}

/// (name, size, modified, is_dir)
type ListingEntry = (String, Option<u64>, Option<DateTime<Utc>>, bool);

pub struct HttpTransport {
    settings: TransportSettings,
    base_url: String,
    client: Client,
    connected: bool,
}

impl HttpTransport {
    pub fn new(settings: TransportSettings, secure: bool) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.timeout)
            .danger_accept_invalid_certs(secure && settings.accept_invalid_certs)
            .build()
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to build HTTP client: {}", e)))?;
        let scheme = if secure { "https" } else { "http" };
        let base_url = format!("{}://{}:{}", scheme, settings.host, settings.port);
        Ok(Self {
            settings,
            base_url,
            client,
            connected: false,
        })
    }

    /// Point the transport at an explicit base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.settings.username.is_empty() {
            request
        } else {
            request.basic_auth(&self.settings.username, Some(&self.settings.password))
        }
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    async fn fetch_listing(&self, dir: &str) -> Result<Vec<ListingEntry>, TransportError> {
        let url = self.url(&format!("{}/", dir.trim_end_matches('/')));
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| TransportError::OperationFailed(format!("Failed to list {}: {}", url, e)))?;
        check_status(response.status(), &url)?;
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::OperationFailed(format!("Failed to read listing {}: {}", url, e)))?;

        if let Ok(entries) = serde_json::from_str::<Vec<JsonEntry>>(&body) {
            return Ok(entries
                .into_iter()
                .map(|e| (e.name, e.size, e.modified, e.is_dir))
                .collect());
        }
        Ok(parse_html_index(&body)
            .into_iter()
            .map(|href| {
                let is_dir = href.ends_with('/');
                (href.trim_end_matches('/').to_string(), None, None, is_dir)
            })
            .collect())
    }
}

fn check_status(status: StatusCode, url: &str) -> Result<(), TransportError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::NOT_FOUND => Err(TransportError::FileNotFound(url.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
            TransportError::AuthenticationFailed(format!("{} returned {}", url, status)),
        ),
        s => Err(TransportError::OperationFailed(format!("{} returned {}", url, s))),
    }
}

fn href_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)href\s*=\s*["']([^"'#?]+)["']"#).expect("Invalid regex pattern")
    })
}

/// Extract relative links from an HTML directory index
pub(crate) fn parse_html_index(body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    href_pattern()
        .captures_iter(body)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .filter(|href| {
            !href.starts_with('/')
                && !href.starts_with("..")
                && !href.starts_with("./")
                && !href.contains("://")
                && !href.starts_with("mailto:")
        })
        .filter(|href| seen.insert(href.clone()))
        .collect()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        info!(base_url = %self.base_url, "HTTP transport ready");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&mut self, dir: &str, recursive: bool) -> Result<Vec<RemoteFile>, TransportError> {
        self.ensure_connected()?;
        let mut files = Vec::new();
        let mut pending = vec![(dir.to_string(), String::new())];

        while let Some((current, prefix)) = pending.pop() {
            for (name, size, modified, is_dir) in self.fetch_listing(&current).await? {
                let relative = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", prefix, name)
                };
                if is_dir {
                    if recursive {
                        pending.push((join_remote(&current, &name), relative));
                    }
                    continue;
                }
                files.push(RemoteFile {
                    name: relative,
                    modified,
                    size: size.unwrap_or(0),
                });
            }
        }
        debug!(count = files.len(), "HTTP listing complete");
        Ok(files)
    }

    #[instrument(skip(self, local))]
    async fn download(&mut self, remote: &str, local: &Path) -> Result<u64, TransportError> {
        self.ensure_connected()?;
        let url = self.url(remote);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| TransportError::TransferFailed(format!("Failed to fetch {}: {}", url, e)))?;
        check_status(response.status(), &url)?;

        let mut file = tokio::fs::File::create(local).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| TransportError::TransferFailed(format!("Failed to read {}: {}", url, e)))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    #[instrument(skip(self, local))]
    async fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, TransportError> {
        self.ensure_connected()?;
        let (dir, file_name) = match remote.rsplit_once('/') {
            Some((dir, name)) => (dir, name),
            None => ("", remote),
        };
        let bytes = tokio::fs::read(local).await?;
        let size = bytes.len() as u64;
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let url = self.url(&format!("{}/", dir.trim_end_matches('/')));
        let response = self
            .authorize(self.client.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::TransferFailed(format!("Failed to upload to {}: {}", url, e)))?;
        check_status(response.status(), &url)?;
        Ok(size)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Protocol;
    use std::time::Duration;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer, username: &str) -> HttpTransport {
        let settings = TransportSettings {
            protocol: Protocol::Http,
            host: "127.0.0.1".to_string(),
            port: 80,
            username: username.to_string(),
            password: "pw".to_string(),
            timeout: Duration::from_secs(5),
            accept_invalid_certs: false,
        };
        HttpTransport::new(settings, false)
            .unwrap()
            .with_base_url(server.uri())
    }

    #[test]
    fn test_parse_html_index_skips_parent_and_absolute_links() {
        let body = r#"<a href="../">Parent</a>
            <a href="obs_01.csv">obs_01.csv</a>
            <a href="?C=M;O=A">sort</a>
            <a href="sub/">sub/</a>
            <a href="https://elsewhere.org/x.csv">x</a>
            <a href="obs_01.csv">again</a>"#;
        assert_eq!(parse_html_index(body), vec!["obs_01.csv", "sub/"]);
    }

    #[tokio::test]
    async fn test_list_json_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"fileName": "a.csv", "size": 12, "modifiedDate": "2024-05-01T00:00:00Z"},
                {"name": "b.csv"}
            ])))
            .mount(&server)
            .await;

        let mut transport = transport(&server, "");
        transport.connect().await.unwrap();
        let files = transport.list("/data", false).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "a.csv");
        assert_eq!(files[0].size, 12);
        assert!(files[0].modified.is_some());
        assert_eq!(files[1].modified, None);
    }

    #[tokio::test]
    async fn test_list_html_recursive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<a href="a.csv">a</a><a href="2024/">2024</a>"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/2024/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"<a href="b.csv">b</a>"#))
            .mount(&server)
            .await;

        let mut transport = transport(&server, "");
        transport.connect().await.unwrap();

        let flat = transport.list("/data", false).await.unwrap();
        assert_eq!(flat.len(), 1);

        let mut names: Vec<String> = transport
            .list("/data", true)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["2024/b.csv", "a.csv"]);
    }

    #[tokio::test]
    async fn test_download_streams_to_disk_with_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/a.csv"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_string("station,value\n1,2\n"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("a.csv");
        let mut transport = transport(&server, "obs");
        transport.connect().await.unwrap();
        let written = transport.download("/data/a.csv", &local).await.unwrap();
        assert_eq!(written, 18);
        assert_eq!(std::fs::read_to_string(&local).unwrap(), "station,value\n1,2\n");
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut transport = transport(&server, "");
        transport.connect().await.unwrap();
        let result = transport
            .download("/data/missing.csv", &dir.path().join("m.csv"))
            .await;
        assert!(matches!(result, Err(TransportError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_upload_posts_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/outbox/"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("export.csv");
        std::fs::write(&local, "a,b\n").unwrap();

        let mut transport = transport(&server, "");
        transport.connect().await.unwrap();
        let sent = transport.upload(&local, "/outbox/export.csv").await.unwrap();
        assert_eq!(sent, 4);
    }

    #[tokio::test]
    async fn test_requires_connect() {
        let server = MockServer::start().await;
        let mut transport = transport(&server, "");
        assert!(matches!(
            transport.list("/", false).await,
            Err(TransportError::NotConnected)
        ));
    }
}
