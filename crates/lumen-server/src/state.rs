//! Shared gateway state.

use std::sync::Arc;
use std::time::Duration;

use lumen_plugin::PluginHost;

use crate::playlist_cache::PlaylistCache;

pub struct AppState {
    pub plugins: Arc<PluginHost>,
    pub playlists: Arc<PlaylistCache>,
    /// Client for the direct video and playlist proxies.
    pub upstream: reqwest::Client,
}

impl AppState {
    pub fn new(
        plugins: Arc<PluginHost>,
        playlists: Arc<PlaylistCache>,
        upstream_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let upstream = reqwest::Client::builder()
            .connect_timeout(upstream_timeout)
            .read_timeout(upstream_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            plugins,
            playlists,
            upstream,
        })
    }
}
