//! Header plumbing shared by the proxy endpoints.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

pub const MPEGURL: &str = "application/vnd.apple.mpegurl";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Browser User-Agent sent on direct upstream fetches.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Request headers folded into the generic proxy's parameter map.
pub const FORWARDED_REQUEST_HEADERS: &[HeaderName] = &[
    header::RANGE,
    header::REFERER,
    header::ORIGIN,
    header::USER_AGENT,
    header::COOKIE,
    header::ACCEPT,
    header::ACCEPT_LANGUAGE,
    header::AUTHORIZATION,
    header::IF_RANGE,
    header::IF_NONE_MATCH,
    header::IF_MODIFIED_SINCE,
];

const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

const UPSTREAM_CORS: &[HeaderName] = &[
    header::ACCESS_CONTROL_ALLOW_ORIGIN,
    header::ACCESS_CONTROL_ALLOW_METHODS,
    header::ACCESS_CONTROL_ALLOW_HEADERS,
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name) || name.as_str() == "keep-alive"
}

/// Copy upstream response headers worth passing on. `Content-Type` is left
/// out; callers set a normalised one.
pub fn copy_upstream_headers(src: &HeaderMap, dst: &mut HeaderMap, drop_cors: bool) {
    for (name, value) in src {
        if is_hop_by_hop(name) || name == header::CONTENT_TYPE {
            continue;
        }
        if drop_cors && UPSTREAM_CORS.contains(name) {
            continue;
        }
        dst.append(name.clone(), value.clone());
    }
}

/// Content type for the generic proxy: anything naming m3u8 becomes the
/// HLS playlist type, everything else passes through.
pub fn playlist_aware_content_type(upstream: Option<&str>) -> Option<String> {
    upstream.map(|ct| {
        if ct.contains("m3u8") {
            MPEGURL.to_string()
        } else {
            ct.to_string()
        }
    })
}

/// Content type for the video proxy.
pub fn video_content_type(upstream: Option<&str>) -> String {
    match upstream {
        Some(ct) if ct.contains("m3u8") || ct.contains("mpegurl") => MPEGURL.to_string(),
        Some(ct) => ct.to_string(),
        None => OCTET_STREAM.to_string(),
    }
}

/// Parse a content type into a header value, falling back to octet-stream.
pub fn content_type_value(content_type: &str) -> HeaderValue {
    HeaderValue::from_str(content_type).unwrap_or(HeaderValue::from_static(OCTET_STREAM))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_upstream_headers_filters() {
        let mut src = HeaderMap::new();
        src.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
        src.insert(header::CONTENT_LENGTH, HeaderValue::from_static("10"));
        src.insert(header::CONTENT_RANGE, HeaderValue::from_static("bytes 0-9/100"));
        src.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        src.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        src.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        src.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("https://a"));
        src.append("x-cache", HeaderValue::from_static("HIT"));
        src.append("x-cache", HeaderValue::from_static("MISS"));

        let mut dst = HeaderMap::new();
        copy_upstream_headers(&src, &mut dst, true);
        assert!(dst.get(header::CONTENT_TYPE).is_none());
        assert!(dst.get(header::TRANSFER_ENCODING).is_none());
        assert!(dst.get(header::CONNECTION).is_none());
        assert!(dst.get("keep-alive").is_none());
        assert!(dst.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert_eq!(dst[header::CONTENT_LENGTH], "10");
        assert_eq!(dst[header::CONTENT_RANGE], "bytes 0-9/100");
        assert_eq!(dst.get_all("x-cache").iter().count(), 2);

        let mut dst = HeaderMap::new();
        copy_upstream_headers(&src, &mut dst, false);
        assert_eq!(dst[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://a");
    }

    #[test]
    fn test_playlist_aware_content_type() {
        assert_eq!(
            playlist_aware_content_type(Some("application/x-m3u8")).as_deref(),
            Some(MPEGURL)
        );
        assert_eq!(
            playlist_aware_content_type(Some("video/mp2t")).as_deref(),
            Some("video/mp2t")
        );
        assert_eq!(playlist_aware_content_type(None), None);
    }

    #[test]
    fn test_video_content_type() {
        assert_eq!(video_content_type(Some("audio/mpegurl")), MPEGURL);
        assert_eq!(video_content_type(Some("application/m3u8")), MPEGURL);
        assert_eq!(video_content_type(Some("video/mp4")), "video/mp4");
        assert_eq!(video_content_type(Some("text/plain")), "text/plain");
        assert_eq!(video_content_type(None), OCTET_STREAM);
    }

    #[test]
    fn test_content_type_value_fallback() {
        assert_eq!(content_type_value("text/plain"), "text/plain");
        assert_eq!(content_type_value("bad\nvalue"), OCTET_STREAM);
    }
}
