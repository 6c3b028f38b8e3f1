//! Playlist endpoints: `GET /proxy/m3u8` and `GET /proxy/cached_m3u8`.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::headers::OCTET_STREAM;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PlaylistQuery {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CachedPlaylistQuery {
    pub id: Option<String>,
}

fn octet_stream(body: impl IntoResponse) -> Response {
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM))],
        body,
    )
        .into_response()
}

/// Fetch a playlist over https and return it verbatim.
pub async fn playlist_proxy(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PlaylistQuery>,
) -> Result<Response, (StatusCode, String)> {
    let encoded = query
        .url
        .ok_or((StatusCode::BAD_REQUEST, "missing url parameter".to_string()))?;

    // The query extractor has decoded once already; clients commonly send
    // the target encoded a second time.
    let target = urlencoding::decode(&encoded)
        .map_err(|_| (StatusCode::BAD_REQUEST, "url decoding failed".to_string()))?
        .into_owned();

    if target.contains("proxy/m3u8") || !target.starts_with("https://") {
        tracing::warn!(url = %target, "rejected playlist proxy target");
        return Err((StatusCode::BAD_REQUEST, "illegal target url".to_string()));
    }

    fetch_playlist(&state.upstream, &target).await
}

/// GET `target` and hand its body back unchanged as an octet stream.
pub async fn fetch_playlist(
    client: &reqwest::Client,
    target: &str,
) -> Result<Response, (StatusCode, String)> {
    let response = client.get(target).send().await.map_err(|e| {
        tracing::error!(url = %target, "playlist proxy request failed: {e}");
        (StatusCode::BAD_GATEWAY, format!("proxy request failed: {e}"))
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err((
            StatusCode::BAD_GATEWAY,
            format!("upstream server returned {}", status.as_u16()),
        ));
    }

    let body = response.bytes().await.map_err(|e| {
        tracing::error!(url = %target, "failed to read playlist body: {e}");
        (StatusCode::BAD_GATEWAY, format!("proxy request failed: {e}"))
    })?;

    Ok(octet_stream(body))
}

/// Serve (and consume) a cached playlist.
pub async fn cached_playlist(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CachedPlaylistQuery>,
) -> Result<Response, (StatusCode, &'static str)> {
    let id = query
        .id
        .filter(|id| !id.is_empty())
        .ok_or((StatusCode::BAD_REQUEST, "missing cache id"))?;

    let content = state
        .playlists
        .get(&id)
        .ok_or((StatusCode::NOT_FOUND, "cache expired or invalid"))?;

    Ok(octet_stream(content))
}
