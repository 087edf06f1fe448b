//! External collaborators: the LIS upstream adapter and the message
//! archiver. Both are trait objects so tests and alternative deployments
//! can substitute their own transports.

use crate::error::{BridgeError, BridgeResult};
use async_trait::async_trait;
use chrono::Utc;
use std::{path::PathBuf, time::Duration};
use tracing::{debug, warn};

/// ER7 media type used when posting HL7 v2 payloads over HTTP.
const ER7_CONTENT_TYPE: &str = "x-application/hl7-v2+er7";

/// Posts an HL7 message to the LIS and returns its HL7 reply.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, url: &str, er7: &str) -> BridgeResult<String>;
}

/// Default HTTP transport for the upstream adapter.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { client }
    }
}

impl Default for HttpUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn send(&self, url: &str, er7: &str) -> BridgeResult<String> {
        if url.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "no upstream URL configured for this transaction".to_string(),
            ));
        }
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, ER7_CONTENT_TYPE)
            .body(er7.to_string())
            .send()
            .await
            .map_err(|e| BridgeError::Upstream(format!("POST {url} failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BridgeError::Upstream(format!("reading reply from {url}: {e}")))?;

        if !status.is_success() {
            return Err(BridgeError::Upstream(format!(
                "upstream {url} returned {status}"
            )));
        }
        debug!(url, bytes = body.len(), "upstream reply received");
        Ok(body)
    }
}

/// Archives every message crossing the bridge, labeled by transaction and
/// origin. Archiving is best-effort: failures are logged, never propagated.
#[async_trait]
pub trait MessageArchiver: Send + Sync {
    async fn archive(&self, analyzer_id: &str, payload: &str, label: &str, direction: &str);
}

/// Archiver that drops everything. Used when `archive_msg` is off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullArchiver;

#[async_trait]
impl MessageArchiver for NullArchiver {
    async fn archive(&self, _analyzer_id: &str, _payload: &str, _label: &str, _direction: &str) {}
}

/// Archiver writing one timestamped file per message under a per-analyzer
/// directory.
#[derive(Debug, Clone)]
pub struct FileArchiver {
    root: PathBuf,
}

impl FileArchiver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl MessageArchiver for FileArchiver {
    async fn archive(&self, analyzer_id: &str, payload: &str, label: &str, direction: &str) {
        let dir = self.root.join(analyzer_id);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!(error = %e, dir = %dir.display(), "cannot create archive directory");
            return;
        }
        let name = format!(
            "{}_{label}_{direction}.txt",
            Utc::now().format("%Y%m%d%H%M%S%3f")
        );
        let path = dir.join(name);
        // CR-delimited wire payloads are stored with newlines for readability.
        let readable = payload.replace('\r', "\n");
        if let Err(e) = tokio::fs::write(&path, readable).await {
            warn!(error = %e, path = %path.display(), "cannot write archive file");
        } else {
            debug!(path = %path.display(), "archived message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn http_upstream_rejects_empty_url() {
        let upstream = HttpUpstream::new();
        let err = upstream.send("", "MSH|^~\\&|x").await.unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[tokio::test]
    async fn file_archiver_writes_readable_payload() {
        let dir = std::env::temp_dir().join(format!("lab-bridge-test-{}", std::process::id()));
        let archiver = FileArchiver::new(&dir);
        archiver
            .archive("XP-1", "H|\\^&\rP|1\rL|1|N", "LAB-29", "Analyzer")
            .await;

        let analyzer_dir = dir.join("XP-1");
        let mut entries = tokio::fs::read_dir(&analyzer_dir).await.unwrap();
        let entry = entries.next_entry().await.unwrap().expect("one file");
        let name = entry.file_name().into_string().unwrap();
        assert!(name.ends_with("_LAB-29_Analyzer.txt"), "{name}");
        let content = tokio::fs::read_to_string(entry.path()).await.unwrap();
        assert_eq!(content, "H|\\^&\nP|1\nL|1|N");
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
