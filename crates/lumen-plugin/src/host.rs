//! The plugin host: one handle over the fetcher, resolver, registries and
//! dispatch bridge.

use std::sync::Arc;

use url::Url;

use crate::config::HostConfig;
use crate::context::ExecutionContextRegistry;
use crate::dispatch::{ActiveSource, ProxyDispatchBridge};
use crate::error::PluginError;
use crate::fetcher::ContentFetcher;
use crate::outcome::{ProxyOutcome, ProxyParams};
use crate::registry::SpiderRegistry;
use crate::resolver::PluginResolver;
use crate::sandbox::{ModuleLoader, WasmLoader};
use crate::source::{md5_hex, SourceDescriptor};
use crate::spider::Spider;

pub struct PluginHost {
    resolver: Arc<PluginResolver>,
    contexts: Arc<ExecutionContextRegistry>,
    spiders: SpiderRegistry,
    active: Arc<ActiveSource>,
    bridge: ProxyDispatchBridge,
}

impl PluginHost {
    /// Host that loads artifacts as WASM modules.
    pub fn new(config: HostConfig) -> Result<Self, PluginError> {
        let loader = Arc::new(WasmLoader::new(config.context.clone()));
        Self::with_loader(config, loader)
    }

    pub fn with_loader(
        config: HostConfig,
        loader: Arc<dyn ModuleLoader>,
    ) -> Result<Self, PluginError> {
        let fetcher = ContentFetcher::new(&config.artifact_dir, config.fetch_timeout)?;
        let contexts = Arc::new(ExecutionContextRegistry::new(loader));
        let resolver = Arc::new(PluginResolver::new(
            fetcher,
            Arc::clone(&contexts),
            config.base_url.clone(),
            config.max_resolve_attempts,
            config.retry_backoff,
        ));
        let spiders = SpiderRegistry::new(Arc::clone(&resolver), Arc::clone(&contexts));
        let active = Arc::new(ActiveSource::default());

        // Plugin-directed fetches carry no overall timeout.
        let client = reqwest::Client::builder()
            .user_agent(concat!("lumen-plugin/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let bridge = ProxyDispatchBridge::new(Arc::clone(&contexts), Arc::clone(&active), client);

        tracing::debug!(
            artifact_dir = %config.artifact_dir.display(),
            base_url = ?config.base_url.as_ref().map(Url::as_str),
            "plugin host created"
        );

        Ok(Self {
            resolver,
            contexts,
            spiders,
            active,
            bridge,
        })
    }

    /// Resolve `raw` and load it as an execution context.
    pub async fn load_source(&self, raw: &str) -> Result<SourceDescriptor, PluginError> {
        self.resolver.resolve(&md5_hex(raw), raw).await
    }

    /// Resolve `raw` again and replace its loaded context.
    pub async fn reload_source(&self, raw: &str) -> Result<SourceDescriptor, PluginError> {
        self.resolver.reload(&md5_hex(raw), raw).await
    }

    /// Spider for `site_key`; a null spider if it cannot be created.
    pub async fn spider(
        &self,
        site_key: &str,
        adapter_id: &str,
        source_ref: &str,
        ext: &str,
    ) -> Arc<dyn Spider> {
        self.spiders.get(site_key, adapter_id, source_ref, ext).await
    }

    /// Switch the active source. Returns the new generation.
    pub fn set_active_source(&self, raw: Option<&str>) -> u64 {
        let generation = self.active.set(raw.map(str::to_string));
        tracing::info!(source = ?raw, generation, "active source changed");
        generation
    }

    pub fn active_source(&self) -> Option<String> {
        self.active.get()
    }

    pub fn active_generation(&self) -> u64 {
        self.active.generation()
    }

    /// Dispatch to the active source's `proxy` hook.
    pub async fn proxy(&self, params: ProxyParams) -> Option<ProxyOutcome> {
        self.bridge.invoke(params).await
    }

    /// Dispatch to a specific source's `proxy` hook.
    pub async fn proxy_for(&self, source: &str, params: ProxyParams) -> Option<ProxyOutcome> {
        self.bridge.invoke_for(source, params).await
    }

    pub fn set_base_url(&self, base_url: Option<Url>) {
        self.resolver.set_base_url(base_url);
    }

    pub fn contexts(&self) -> &ExecutionContextRegistry {
        &self.contexts
    }

    pub fn spiders(&self) -> &SpiderRegistry {
        &self.spiders
    }

    /// Tear down every spider and context and unset the active source.
    /// Safe to call with nothing loaded, and more than once.
    pub async fn clear(&self) {
        let spiders = self.spiders.drain().await;
        let destroyed = spiders.len();
        for spider in spiders {
            let class = spider.class().to_string();
            if let Err(e) = tokio::task::spawn_blocking(move || spider.destroy()).await {
                tracing::warn!(class = %class, "spider destroy task failed: {e}");
            }
        }

        let contexts = self.contexts.clear().await;
        if self.active.get().is_some() {
            self.active.set(None);
        }

        tracing::info!(spiders = destroyed, contexts, "plugin host cleared");
    }
}
