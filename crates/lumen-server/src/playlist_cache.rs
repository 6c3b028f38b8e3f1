//! Short-lived store for rewritten playlists.
//!
//! Entries are addressed by a random id and are single-use: reading an entry
//! removes it. Entries that are never read expire after a TTL and are swept
//! by a background task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Shortest interval the sweeper runs at.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub id: String,
    pub content: String,
    pub inserted_at: Instant,
    pub expires_at: Instant,
}

#[derive(Debug)]
pub struct PlaylistCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    shutdown: CancellationToken,
}

impl PlaylistCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store `content` and return its id.
    pub fn put(&self, content: impl Into<String>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Instant::now();
        let entry = CacheEntry {
            id: id.clone(),
            content: content.into(),
            inserted_at: now,
            expires_at: now + self.ttl,
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), entry);
        tracing::debug!(id = %id, "playlist cached");
        id
    }

    /// Take the content stored under `id`. A second call returns `None`.
    pub fn get(&self, id: &str) -> Option<String> {
        let entry = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)?;
        if entry.expires_at <= Instant::now() {
            tracing::debug!(id = %id, "cached playlist expired");
            return None;
        }
        Some(entry.content)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Sweep every `interval` until [`cleanup`](Self::cleanup) is called.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        // `tokio::time::interval` panics on zero.
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        let cache = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, "expired playlists swept");
                        }
                    }
                }
            }
            tracing::debug!("playlist sweeper stopped");
        })
    }

    /// Stop the sweeper and drop every entry.
    pub fn cleanup(&self) {
        self.shutdown.cancel();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let dropped = entries.len();
        entries.clear();
        tracing::info!(dropped, "playlist cache cleaned up");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_is_consuming() {
        let cache = PlaylistCache::new(Duration::from_secs(300));
        let id = cache.put("X");
        assert_eq!(cache.get(&id).as_deref(), Some("X"));
        assert_eq!(cache.get(&id), None);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let cache = PlaylistCache::new(Duration::from_secs(300));
        let a = cache.put("#EXTM3U");
        let b = cache.put("#EXTM3U");
        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let cache = PlaylistCache::new(Duration::from_secs(300));
        assert_eq!(cache.get("nope"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_not_returned() {
        let cache = PlaylistCache::new(Duration::from_secs(300));
        let id = cache.put("X");
        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.get(&id), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let cache = PlaylistCache::new(Duration::from_secs(10));
        cache.put("old");
        tokio::time::advance(Duration::from_secs(6)).await;
        let fresh = cache.put("fresh");
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.get(&fresh).as_deref(), Some("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_in_background() {
        let cache = Arc::new(PlaylistCache::new(Duration::from_secs(10)));
        let handle = cache.spawn_sweeper(Duration::from_secs(5));
        cache.put("X");

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(cache.is_empty());

        cache.cleanup();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_sweep_interval_is_clamped() {
        let cache = Arc::new(PlaylistCache::new(Duration::from_secs(1)));
        let handle = cache.spawn_sweeper(Duration::ZERO);
        cache.put("X");

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(cache.is_empty());

        cache.cleanup();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_clears_and_stops_sweeper() {
        let cache = Arc::new(PlaylistCache::new(Duration::from_secs(300)));
        let handle = cache.spawn_sweeper(Duration::from_secs(60));
        let id = cache.put("X");

        cache.cleanup();
        assert!(cache.is_empty());
        assert_eq!(cache.get(&id), None);
        handle.await.unwrap();

        // Idempotent.
        cache.cleanup();
    }
}
