pub mod headers;
pub mod playlist;
pub mod proxy;
pub mod video;

use std::sync::Arc;

use axum::{
    http::{header, HeaderName, Method},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

#[derive(Serialize)]
struct ApiStatus {
    status: &'static str,
    version: &'static str,
}

async fn healthz() -> Json<ApiStatus> {
    Json(ApiStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Any origin, no credentials, explicit header allow-list.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::RANGE,
            HeaderName::from_static("x-requested-with"),
        ])
        .allow_credentials(false)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/proxy", get(proxy::plugin_proxy))
        .route(
            "/video/proxy",
            get(video::video_proxy).options(video::video_proxy_options),
        )
        .route("/proxy/m3u8", get(playlist::playlist_proxy))
        .route("/proxy/cached_m3u8", get(playlist::cached_playlist))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}
