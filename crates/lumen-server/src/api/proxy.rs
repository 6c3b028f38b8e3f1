//! `GET /proxy` — hands the request to the active source's `proxy` hook.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use lumen_plugin::{ProxyOutcome, ProxyParams, RawReply};

use super::headers::{
    content_type_value, copy_upstream_headers, playlist_aware_content_type,
    FORWARDED_REQUEST_HEADERS, MPEGURL, OCTET_STREAM,
};
use crate::state::AppState;

pub async fn plugin_proxy(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProxyParams>,
    headers: HeaderMap,
) -> Response {
    let params = merge_params(query, &headers);
    match state.plugins.proxy(params).await {
        Some(ProxyOutcome::Upstream(response)) => upstream_response(response),
        Some(ProxyOutcome::Redirect(url)) => redirect_response(&url),
        Some(ProxyOutcome::Raw(raw)) => raw_response(raw),
        None => error_response(),
    }
}

/// Query parameters plus the forwarded request headers. Query values win;
/// headers only fill in missing keys.
pub fn merge_params(mut params: ProxyParams, headers: &HeaderMap) -> ProxyParams {
    for name in FORWARDED_REQUEST_HEADERS {
        let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        params
            .entry(name.as_str().to_string())
            .or_insert_with(|| value.to_string());
    }
    params
}

fn upstream_response(response: reqwest::Response) -> Response {
    let status = response.status();
    let content_type = playlist_aware_content_type(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
    );

    let mut headers = HeaderMap::new();
    copy_upstream_headers(response.headers(), &mut headers, false);
    if let Some(content_type) = content_type {
        headers.insert(header::CONTENT_TYPE, content_type_value(&content_type));
    }

    // A failing body stream ends the response early; the client sees a
    // truncated body.
    (status, headers, Body::from_stream(response.bytes_stream())).into_response()
}

fn redirect_response(url: &str) -> Response {
    match HeaderValue::from_str(url) {
        Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        Err(_) => {
            tracing::warn!(url = %url, "plugin redirect target is not a valid header value");
            error_response()
        }
    }
}

fn raw_response(raw: RawReply) -> Response {
    let status = raw
        .status
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut headers = HeaderMap::new();
    for (name, value) in raw.headers.iter().flatten() {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::debug!(header = %name, "skipping invalid plugin header"),
        }
    }

    let content_type = if raw.content_type.contains("m3u8") {
        MPEGURL
    } else {
        raw.content_type.as_str()
    };
    headers.insert(header::CONTENT_TYPE, content_type_value(content_type));

    (status, headers, raw.body).into_response()
}

/// Generic failure: 500 with the canonical reason phrase.
pub fn error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM))],
        "Internal Server Error",
    )
        .into_response()
}
