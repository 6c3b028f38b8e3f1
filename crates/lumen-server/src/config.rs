//! Gateway configuration.

use std::net::IpAddr;
use std::time::Duration;

use lumen_plugin::HostConfig;

/// Highest port tried when the configured one is taken.
pub const MAX_PORT: u16 = 9999;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    /// First port tried (default: 9978).
    pub port: u16,
    /// Source reference loaded and activated at startup.
    pub preload_source: Option<String>,
    /// Connect and read timeout for direct upstream fetches (default: 30 s).
    pub upstream_timeout: Duration,
    /// Lifetime of cached playlists (default: 5 min; zero is ignored).
    pub playlist_ttl: Duration,
    pub host: HostConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([0, 0, 0, 0]),
            port: 9978,
            preload_source: None,
            upstream_timeout: Duration::from_secs(30),
            playlist_ttl: Duration::from_secs(300),
            host: HostConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind: std::env::var("LUMEN_BIND")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind),
            port: std::env::var("LUMEN_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            preload_source: std::env::var("LUMEN_SPIDER")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            upstream_timeout: std::env::var("UPSTREAM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.upstream_timeout),
            playlist_ttl: std::env::var("PLAYLIST_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.playlist_ttl),
            host: HostConfig::from_env(),
        }
    }

    /// Ports to try, in order.
    pub fn port_candidates(&self) -> std::ops::RangeInclusive<u16> {
        self.port..=self.port.max(MAX_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_from_env() {
        std::env::set_var("LUMEN_BIND", "127.0.0.1");
        std::env::set_var("LUMEN_PORT", "9990");
        std::env::set_var("LUMEN_SPIDER", "https://cfg.example.com/spider.wasm");
        std::env::set_var("UPSTREAM_TIMEOUT_SECS", "5");
        std::env::set_var("PLAYLIST_CACHE_TTL_SECS", "0");
        assert_eq!(ServerConfig::from_env().playlist_ttl, Duration::from_secs(300));

        std::env::set_var("PLAYLIST_CACHE_TTL_SECS", "60");
        let config = ServerConfig::from_env();
        assert_eq!(config.bind, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(config.port, 9990);
        assert_eq!(
            config.preload_source.as_deref(),
            Some("https://cfg.example.com/spider.wasm")
        );
        assert_eq!(config.upstream_timeout, Duration::from_secs(5));
        assert_eq!(config.playlist_ttl, Duration::from_secs(60));

        std::env::remove_var("LUMEN_BIND");
        std::env::remove_var("LUMEN_PORT");
        std::env::remove_var("LUMEN_SPIDER");
        std::env::remove_var("UPSTREAM_TIMEOUT_SECS");
        std::env::remove_var("PLAYLIST_CACHE_TTL_SECS");

        let config = ServerConfig::from_env();
        assert_eq!(config.port, 9978);
        assert!(config.preload_source.is_none());
        assert_eq!(config.upstream_timeout, Duration::from_secs(30));
        assert_eq!(config.playlist_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_port_candidates() {
        let config = ServerConfig::default();
        let ports: Vec<u16> = config.port_candidates().collect();
        assert_eq!(ports.first(), Some(&9978));
        assert_eq!(ports.last(), Some(&9999));
        assert_eq!(ports.len(), 22);

        let high = ServerConfig {
            port: 12000,
            ..ServerConfig::default()
        };
        assert_eq!(high.port_candidates().collect::<Vec<_>>(), vec![12000]);
    }
}
