//! Lumen streaming gateway
//!
//! HTTP surface over the plugin host: the generic plugin proxy, the direct
//! video proxy, the playlist text proxy and the cached-playlist lookup.

use std::net::SocketAddr;

use tokio::net::TcpListener;

pub mod api;
pub mod config;
pub mod playlist_cache;
pub mod state;

pub use api::router;
pub use config::ServerConfig;
pub use playlist_cache::PlaylistCache;
pub use state::AppState;

/// Bind the first free port among the configured candidates.
pub async fn bind_listener(config: &ServerConfig) -> std::io::Result<TcpListener> {
    let mut last_error = None;
    for port in config.port_candidates() {
        let addr = SocketAddr::new(config.bind, port);
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                tracing::warn!(%addr, "port unavailable: {e}");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no port candidates")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    #[tokio::test]
    async fn test_bind_listener_falls_back_to_next_port() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken_port = taken.local_addr().unwrap().port();

        let config = ServerConfig {
            bind: IpAddr::from([127, 0, 0, 1]),
            port: taken_port,
            ..ServerConfig::default()
        };
        if taken_port >= config::MAX_PORT {
            // No room above an ephemeral port this high.
            return;
        }

        let listener = bind_listener(&config).await.unwrap();
        assert!(listener.local_addr().unwrap().port() > taken_port);
    }
}
