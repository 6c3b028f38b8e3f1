//! `GET /video/proxy`: direct upstream fetch for the web player.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::headers::{
    content_type_value, copy_upstream_headers, video_content_type, BROWSER_USER_AGENT,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct VideoProxyQuery {
    pub url: Option<String>,
}

pub async fn video_proxy(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VideoProxyQuery>,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    let url = query
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or((StatusCode::BAD_REQUEST, "missing url parameter".to_string()))?;

    let is_http = url.starts_with("http://") || url.starts_with("https://");
    if !is_http || url::Url::parse(&url).is_err() {
        return Err((StatusCode::BAD_REQUEST, "invalid url".to_string()));
    }

    let mut request = state
        .upstream
        .get(&url)
        .header(header::USER_AGENT, BROWSER_USER_AGENT)
        .header(header::ACCEPT, "*/*")
        .header(header::ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9,en;q=0.8");
    for name in [header::RANGE, header::REFERER, header::ORIGIN] {
        if let Some(value) = headers.get(&name) {
            request = request.header(name, value.clone());
        }
    }

    let response = request.send().await.map_err(|e| upstream_error(&url, e))?;

    let status = response.status();
    if !status.is_success() && status != StatusCode::PARTIAL_CONTENT {
        tracing::warn!(url = %url, status = status.as_u16(), "video proxy upstream error");
        return Err((
            StatusCode::BAD_GATEWAY,
            format!(
                "upstream server error: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or_default()
            ),
        ));
    }

    let content_type = video_content_type(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
    );

    let mut response_headers = HeaderMap::new();
    copy_upstream_headers(response.headers(), &mut response_headers, true);
    response_headers.insert(header::CONTENT_TYPE, content_type_value(&content_type));

    let status = if status == StatusCode::PARTIAL_CONTENT {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    tracing::debug!(url = %url, status = status.as_u16(), content_type = %content_type, "streaming upstream video");
    Ok((status, response_headers, Body::from_stream(response.bytes_stream())).into_response())
}

fn upstream_error(url: &str, e: reqwest::Error) -> (StatusCode, String) {
    if e.is_timeout() {
        tracing::error!(url = %url, "video proxy request timed out: {e}");
        (StatusCode::GATEWAY_TIMEOUT, "upstream request timed out".to_string())
    } else if e.is_connect() {
        tracing::error!(url = %url, "video proxy connection failed: {e}");
        (
            StatusCode::BAD_GATEWAY,
            "unable to connect to upstream server".to_string(),
        )
    } else {
        tracing::error!(url = %url, "video proxy request failed: {e}");
        (StatusCode::BAD_GATEWAY, format!("proxy request failed: {e}"))
    }
}

/// `OPTIONS /video/proxy` outside of a CORS preflight.
pub async fn video_proxy_options(headers: HeaderMap) -> impl IntoResponse {
    let origin = headers
        .get(header::ORIGIN)
        .cloned()
        .unwrap_or(HeaderValue::from_static("*"));
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, origin),
            (
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("GET, POST, OPTIONS"),
            ),
            (
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("*"),
            ),
        ],
    )
}
