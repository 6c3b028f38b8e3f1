//! Plugin host configuration.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::sandbox::ContextConfig;

/// Settings for a [`PluginHost`](crate::PluginHost).
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Where downloaded artifacts are stored.
    pub artifact_dir: PathBuf,
    /// Base URL aliases are resolved against.
    pub base_url: Option<Url>,
    /// Attempts spent on one reference before giving up (default: 30).
    pub max_resolve_attempts: u32,
    /// Fixed wait between attempts (default: 1 s).
    pub retry_backoff: Duration,
    /// Timeout for a single artifact download (default: 30 s).
    pub fetch_timeout: Duration,
    pub context: ContextConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("./data/artifacts"),
            base_url: None,
            max_resolve_attempts: 30,
            retry_backoff: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(30),
            context: ContextConfig::default(),
        }
    }
}

impl HostConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let base_url = std::env::var("LUMEN_API_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .and_then(|v| match Url::parse(v.trim()) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(value = %v, "ignoring invalid LUMEN_API_URL: {e}");
                    None
                }
            });

        Self {
            artifact_dir: std::env::var("LUMEN_DATA_DIR")
                .map(|d| PathBuf::from(d).join("artifacts"))
                .unwrap_or(defaults.artifact_dir),
            base_url,
            max_resolve_attempts: std::env::var("PLUGIN_RESOLVE_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.max_resolve_attempts),
            retry_backoff: std::env::var("PLUGIN_RESOLVE_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            fetch_timeout: std::env::var("PLUGIN_FETCH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.fetch_timeout),
            context: ContextConfig::from_env(),
        }
    }
}
