//! Content fetcher — downloads source artifacts to deterministic paths.
//!
//! The on-disk name is derived from the URL alone, so repeated downloads of
//! the same URL overwrite one file and a digest check can find it again
//! without touching the network.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::PluginError;
use crate::source::md5_hex;

/// Distinguishes concurrent partial writes of the same artifact.
static PART_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct ContentFetcher {
    client: reqwest::Client,
    artifact_dir: PathBuf,
}

impl std::fmt::Debug for ContentFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentFetcher")
            .field("artifact_dir", &self.artifact_dir)
            .finish_non_exhaustive()
    }
}

impl ContentFetcher {
    pub fn new(artifact_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self, PluginError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lumen-plugin/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(artifact_dir, client))
    }

    pub fn with_client(artifact_dir: impl Into<PathBuf>, client: reqwest::Client) -> Self {
        Self {
            client,
            artifact_dir: artifact_dir.into(),
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Where the artifact for `url` lives once downloaded.
    pub fn artifact_path(&self, url: &str) -> PathBuf {
        self.artifact_dir.join(format!("{}.wasm", md5_hex(url)))
    }

    /// Download `url` into its artifact path and return that path.
    ///
    /// No retries here: the resolver owns the retry policy.
    pub async fn download(&self, url: &str) -> Result<PathBuf, PluginError> {
        let dest = self.artifact_path(url);
        tracing::debug!(url = %url, dest = %dest.display(), "downloading source artifact");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PluginError::Fetch(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PluginError::Fetch(format!("{url} returned {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| PluginError::Fetch(format!("failed to read body from {url}: {e}")))?;
        if body.is_empty() {
            return Err(PluginError::Fetch(format!("empty response body from {url}")));
        }

        tokio::fs::create_dir_all(&self.artifact_dir).await?;

        // Write next to the destination and rename so readers never see a
        // half-written artifact.
        let part = dest.with_extension(format!(
            "{}-{}.part",
            std::process::id(),
            PART_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&part, &body).await?;
        if let Err(e) = tokio::fs::rename(&part, &dest).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e.into());
        }

        tracing::info!(url = %url, bytes = body.len(), path = %dest.display(), "source artifact downloaded");
        Ok(dest)
    }

    /// MD5 of the file at `path`, or `None` if it cannot be read.
    pub async fn digest(&self, path: &Path) -> Option<String> {
        tokio::fs::read(path).await.ok().map(md5_hex)
    }
}
