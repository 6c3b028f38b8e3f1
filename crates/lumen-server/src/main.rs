use std::sync::Arc;

use lumen_plugin::PluginHost;
use lumen_server::{AppState, PlaylistCache, ServerConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();

    let plugins =
        Arc::new(PluginHost::new(config.host.clone()).expect("failed to create plugin host"));
    let playlists = Arc::new(PlaylistCache::new(config.playlist_ttl));
    let sweeper = playlists.spawn_sweeper(config.playlist_ttl.min(std::time::Duration::from_secs(60)));

    let state = Arc::new(
        AppState::new(plugins.clone(), playlists.clone(), config.upstream_timeout)
            .expect("failed to build upstream HTTP client"),
    );

    // Preload the configured source without holding up startup.
    if let Some(source) = config.preload_source.clone() {
        let plugins = plugins.clone();
        tokio::spawn(async move {
            tracing::info!(source = %source, "preloading source");
            match plugins.load_source(&source).await {
                Ok(descriptor) => {
                    plugins.set_active_source(Some(&source));
                    tracing::info!(
                        source = %source,
                        artifact = %descriptor.locator.path().display(),
                        "source loaded and activated"
                    );
                }
                Err(e) => tracing::error!(source = %source, "failed to preload source: {e}"),
            }
        });
    }

    let app = lumen_server::router(state);

    let listener = lumen_server::bind_listener(&config)
        .await
        .expect("no free port to bind");
    let addr = listener.local_addr().expect("listener has no local address");
    tracing::info!(%addr, "gateway started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("shutting down");
    playlists.cleanup();
    if let Err(e) = sweeper.await {
        tracing::warn!("playlist sweeper ended abnormally: {e}");
    }
    plugins.clear().await;
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
