//! Plugin resolver — turns a source reference into a loaded context.
//!
//! Resolution is an iterative walk: each step either finishes (local file,
//! downloaded or hash-matched artifact), advances to a new candidate (alias
//! joined with the base URL), or stalls. Stalls and transient failures are
//! spent against a fixed attempt budget with a fixed backoff between them;
//! advancing resets the budget.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use url::Url;

use crate::context::{ExecutionContextRegistry, KeyedLocks};
use crate::error::PluginError;
use crate::fetcher::ContentFetcher;
use crate::source::{
    is_local, is_remote, local_path, resolve_alias, Locator, SourceDescriptor, SourceReference,
};

enum Step {
    Done(SourceDescriptor),
    Advance(String),
    Stalled,
}

pub struct PluginResolver {
    fetcher: ContentFetcher,
    contexts: Arc<ExecutionContextRegistry>,
    base_url: RwLock<Option<Url>>,
    max_attempts: u32,
    backoff: Duration,
    locks: KeyedLocks,
}

impl PluginResolver {
    pub fn new(
        fetcher: ContentFetcher,
        contexts: Arc<ExecutionContextRegistry>,
        base_url: Option<Url>,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            fetcher,
            contexts,
            base_url: RwLock::new(base_url),
            max_attempts: max_attempts.max(1),
            backoff,
            locks: KeyedLocks::default(),
        }
    }

    pub fn fetcher(&self) -> &ContentFetcher {
        &self.fetcher
    }

    pub fn base_url(&self) -> Option<Url> {
        self.base_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the base URL aliases are joined with.
    pub fn set_base_url(&self, base_url: Option<Url>) {
        tracing::info!(base_url = ?base_url.as_ref().map(Url::as_str), "resolver base URL updated");
        *self.base_url.write().unwrap_or_else(PoisonError::into_inner) = base_url;
    }

    /// Resolve `raw` and load the result into the context registry under
    /// `key`, unless a resolved context is already registered there.
    ///
    /// Concurrent calls for the same key are serialised: the first one loads,
    /// the others get its descriptor.
    pub async fn resolve(&self, key: &str, raw: &str) -> Result<SourceDescriptor, PluginError> {
        let _guard = self.locks.lock(key).await;

        if let Some(descriptor) = self
            .contexts
            .get(key)
            .await
            .and_then(|context| context.descriptor().cloned())
        {
            tracing::debug!(context_key = %key, "source already resolved");
            return Ok(descriptor);
        }
        self.resolve_locked(key, raw).await
    }

    /// Resolve `raw` again and replace whatever context `key` holds.
    pub async fn reload(&self, key: &str, raw: &str) -> Result<SourceDescriptor, PluginError> {
        let _guard = self.locks.lock(key).await;
        self.resolve_locked(key, raw).await
    }

    async fn resolve_locked(&self, key: &str, raw: &str) -> Result<SourceDescriptor, PluginError> {
        let reference = SourceReference::parse(raw.trim());
        let mut candidate = reference.locator.trim().to_string();
        let mut attempts: u32 = 0;

        loop {
            match self.step(key, raw, &candidate, reference.md5).await {
                Ok(Step::Done(descriptor)) => return Ok(descriptor),
                Ok(Step::Advance(next)) => {
                    tracing::debug!(from = %candidate, to = %next, "source reference advanced");
                    candidate = next;
                    attempts = 0;
                    continue;
                }
                Ok(Step::Stalled) => {
                    attempts += 1;
                    tracing::debug!(candidate = %candidate, attempts, "source reference made no progress");
                    if attempts >= self.max_attempts {
                        tracing::error!(original = %raw, last_attempted = %candidate, attempts, "source resolution failed");
                        return Err(PluginError::Resolution {
                            original: raw.to_string(),
                            last_attempted: candidate,
                            attempts,
                        });
                    }
                }
                Err(e) if e.is_retryable() => {
                    attempts += 1;
                    tracing::warn!(candidate = %candidate, attempts, "source resolution attempt failed: {e}");
                    if attempts >= self.max_attempts {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.backoff).await;
        }
    }

    async fn step(
        &self,
        key: &str,
        raw: &str,
        candidate: &str,
        md5: Option<&str>,
    ) -> Result<Step, PluginError> {
        if is_local(candidate) {
            let path = local_path(candidate);
            let content_hash = self.fetcher.digest(&path).await;
            return self
                .install(
                    key,
                    SourceDescriptor {
                        raw_reference: raw.to_string(),
                        locator: Locator::Local(path),
                        content_hash,
                    },
                )
                .await;
        }

        if is_remote(candidate) {
            if let Some(expected) = md5 {
                let cached = self.fetcher.artifact_path(candidate);
                if let Some(actual) = self.fetcher.digest(&cached).await {
                    if actual.eq_ignore_ascii_case(expected) {
                        tracing::info!(url = %candidate, md5 = %actual, "cached artifact matches digest; skipping download");
                        return self
                            .install(
                                key,
                                SourceDescriptor {
                                    raw_reference: raw.to_string(),
                                    locator: Locator::CachedByHash {
                                        url: candidate.to_string(),
                                        path: cached,
                                    },
                                    content_hash: Some(actual),
                                },
                            )
                            .await;
                    }
                }
            }

            let path = self.fetcher.download(candidate).await?;
            let content_hash = self.fetcher.digest(&path).await;
            return self
                .install(
                    key,
                    SourceDescriptor {
                        raw_reference: raw.to_string(),
                        locator: Locator::Remote {
                            url: candidate.to_string(),
                            path,
                        },
                        content_hash,
                    },
                )
                .await;
        }

        let base = self.base_url();
        let next = resolve_alias(base.as_ref(), candidate);
        if next == candidate {
            Ok(Step::Stalled)
        } else {
            Ok(Step::Advance(next))
        }
    }

    async fn install(&self, key: &str, descriptor: SourceDescriptor) -> Result<Step, PluginError> {
        self.contexts.install(key, &descriptor).await?;
        Ok(Step::Done(descriptor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{md5_hex, LocatorKind};
    use crate::testing::StubLoader;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver(
        dir: &std::path::Path,
        loader: StubLoader,
        base_url: Option<Url>,
    ) -> (PluginResolver, Arc<ExecutionContextRegistry>) {
        let contexts = Arc::new(ExecutionContextRegistry::new(Arc::new(loader)));
        let fetcher = ContentFetcher::new(dir, Duration::from_secs(5)).unwrap();
        let resolver = PluginResolver::new(
            fetcher,
            Arc::clone(&contexts),
            base_url,
            30,
            Duration::from_secs(1),
        );
        (resolver, contexts)
    }

    #[tokio::test]
    async fn test_resolve_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("local.wasm");
        std::fs::write(&artifact, b"local-bytes").unwrap();
        let (resolver, contexts) = resolver(dir.path(), StubLoader::new(), None);

        let raw = format!("file://{}", artifact.display());
        let descriptor = resolver.resolve("k", &raw).await.unwrap();

        assert_eq!(descriptor.locator, Locator::Local(artifact.clone()));
        assert_eq!(descriptor.content_hash, Some(md5_hex("local-bytes")));
        assert_eq!(descriptor.raw_reference, raw);
        assert_eq!(contexts.get("k").await.unwrap().artifact(), artifact.as_path());
    }

    #[tokio::test]
    async fn test_resolve_remote_downloads_and_loads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spider.wasm"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"remote".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (resolver, contexts) = resolver(dir.path(), StubLoader::new(), None);
        let url = format!("{}/spider.wasm", server.uri());

        let descriptor = resolver.resolve("k", &url).await.unwrap();
        assert_eq!(descriptor.locator.kind(), LocatorKind::Remote);
        assert_eq!(descriptor.locator.url(), Some(url.as_str()));
        assert_eq!(descriptor.content_hash, Some(md5_hex("remote")));
        assert!(contexts.contains("k").await);
    }

    #[tokio::test]
    async fn test_md5_match_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (resolver, contexts) = resolver(dir.path(), StubLoader::new(), None);
        let url = format!("{}/spider.wasm", server.uri());
        let cached = resolver.fetcher().artifact_path(&url);
        std::fs::write(&cached, b"cached").unwrap();

        let digest = md5_hex("cached").to_uppercase();
        let raw = format!("{url};md5;{digest}");
        let descriptor = resolver.resolve("k", &raw).await.unwrap();

        assert_eq!(
            descriptor.locator,
            Locator::CachedByHash {
                url: url.clone(),
                path: cached
            }
        );
        assert_eq!(descriptor.content_hash, Some(md5_hex("cached")));
        assert!(contexts.contains("k").await);
    }

    #[tokio::test]
    async fn test_md5_mismatch_downloads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (resolver, _) = resolver(dir.path(), StubLoader::new(), None);
        let url = format!("{}/spider.wasm", server.uri());
        std::fs::write(resolver.fetcher().artifact_path(&url), b"stale").unwrap();

        let raw = format!("{url};md5;{}", md5_hex("fresh"));
        let descriptor = resolver.resolve("k", &raw).await.unwrap();
        assert_eq!(descriptor.locator.kind(), LocatorKind::Remote);
        assert_eq!(descriptor.content_hash, Some(md5_hex("fresh")));
    }

    #[tokio::test]
    async fn test_alias_resolved_against_base_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tv/spider.wasm"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"aliased".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let base = Url::parse(&format!("{}/tv/config.json", server.uri())).unwrap();
        let (resolver, _) = resolver(dir.path(), StubLoader::new(), Some(base));

        let descriptor = resolver.resolve("k", "./spider.wasm").await.unwrap();
        assert_eq!(
            descriptor.locator.url(),
            Some(format!("{}/tv/spider.wasm", server.uri()).as_str())
        );
        assert_eq!(descriptor.raw_reference, "./spider.wasm");
    }

    #[tokio::test]
    async fn test_set_base_url_unblocks_aliases() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("spider.wasm"), b"x").unwrap();
        let (resolver, _) = resolver(dir.path(), StubLoader::new(), None);
        assert!(resolver.base_url().is_none());

        let base = Url::from_directory_path(dir.path()).unwrap();
        resolver.set_base_url(Some(base));
        let descriptor = resolver.resolve("k", "spider.wasm").await.unwrap();
        assert_eq!(descriptor.locator, Locator::Local(dir.path().join("spider.wasm")));
    }

    #[tokio::test]
    async fn test_second_resolve_reuses_context() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("local.wasm");
        std::fs::write(&artifact, b"x").unwrap();
        let loader = StubLoader::new();
        let counters = loader.counters();
        let (resolver, contexts) = resolver(dir.path(), loader, None);
        let raw = format!("file://{}", artifact.display());

        let first = resolver.resolve("k", &raw).await.unwrap();
        let context = contexts.get("k").await.unwrap();
        let second = resolver.resolve("k", &raw).await.unwrap();

        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&context, &contexts.get("k").await.unwrap()));
        assert_eq!(counters.opens(), 1);
        assert_eq!(counters.module_inits(), 1);
    }

    #[tokio::test]
    async fn test_reload_replaces_context() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("local.wasm");
        std::fs::write(&artifact, b"x").unwrap();
        let loader = StubLoader::new();
        let counters = loader.counters();
        let (resolver, contexts) = resolver(dir.path(), loader, None);
        let raw = format!("file://{}", artifact.display());

        resolver.resolve("k", &raw).await.unwrap();
        let before = contexts.get("k").await.unwrap();
        resolver.reload("k", &raw).await.unwrap();

        assert!(!Arc::ptr_eq(&before, &contexts.get("k").await.unwrap()));
        assert_eq!(counters.opens(), 2);
    }

    #[tokio::test]
    async fn test_path_loaded_context_is_resolved_again() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("local.wasm");
        std::fs::write(&artifact, b"x").unwrap();
        let (resolver, contexts) = resolver(dir.path(), StubLoader::new(), None);
        contexts.load("k", &artifact).await.unwrap();

        let raw = format!("file://{}", artifact.display());
        let descriptor = resolver.resolve("k", &raw).await.unwrap();
        assert_eq!(
            contexts.get("k").await.unwrap().descriptor(),
            Some(&descriptor)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_remote_resolve_downloads_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spider.wasm"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"remote".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let loader = StubLoader::new();
        let counters = loader.counters();
        let (resolver, _) = resolver(dir.path(), loader, None);
        let resolver = Arc::new(resolver);
        let url = format!("{}/spider.wasm", server.uri());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = Arc::clone(&resolver);
            let url = url.clone();
            handles.push(tokio::spawn(async move { resolver.resolve("k", &url).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(counters.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_converging_alias_fails_after_budget() {
        let dir = tempfile::tempdir().unwrap();
        let (resolver, contexts) = resolver(dir.path(), StubLoader::new(), None);

        let started = tokio::time::Instant::now();
        let err = resolver.resolve("k", "spider.wasm").await.unwrap_err();

        match err {
            PluginError::Resolution {
                original,
                last_attempted,
                attempts,
            } => {
                assert_eq!(original, "spider.wasm");
                assert_eq!(last_attempted, "spider.wasm");
                assert_eq!(attempts, 30);
            }
            other => panic!("expected resolution error, got {other:?}"),
        }
        // 29 waits between 30 attempts.
        assert!(started.elapsed() >= Duration::from_secs(29));
        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(contexts.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_errors_spend_the_same_budget() {
        let dir = tempfile::tempdir().unwrap();
        let (resolver, contexts) = resolver(dir.path(), StubLoader::new(), None);

        let started = tokio::time::Instant::now();
        let err = resolver
            .resolve("k", "file:///nonexistent/spider.wasm")
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Io(_)), "got {err:?}");
        assert!(started.elapsed() >= Duration::from_secs(29));
        assert!(contexts.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_load_error_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("flaky.wasm");
        std::fs::write(&artifact, b"x").unwrap();
        let loader = StubLoader::new().failing_opens(2);
        let counters = loader.counters();
        let (resolver, contexts) = resolver(dir.path(), loader, None);

        let started = tokio::time::Instant::now();
        resolver
            .resolve("k", &format!("file://{}", artifact.display()))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(counters.opens(), 1);
        assert!(contexts.contains("k").await);
    }
}
