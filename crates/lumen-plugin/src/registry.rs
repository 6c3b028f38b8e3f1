//! Spider registry — instantiates and caches per-site adapters.
//!
//! A spider is keyed by `md5(source reference) + site key`, so the same site
//! served from two different artifacts gets two instances. A cached spider
//! is handed back as-is; `init` only ever runs once per instance.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::context::{ExecutionContextRegistry, KeyedLocks, LoadedContext};
use crate::error::PluginError;
use crate::resolver::PluginResolver;
use crate::source::md5_hex;
use crate::spider::{NullSpider, Spider};

/// Prefix adapter ids carry in site configurations.
const CLASS_PREFIX: &str = "csp_";

/// Spider class derived from an adapter id (`csp_Douban` → `Douban`).
pub fn class_name(adapter_id: &str) -> &str {
    adapter_id.strip_prefix(CLASS_PREFIX).unwrap_or(adapter_id)
}

/// Registry key of the spider for `site_key` hosted by `source_ref`.
pub fn spider_key(source_ref: &str, site_key: &str) -> String {
    format!("{}{}", md5_hex(source_ref), site_key)
}

pub struct SpiderRegistry {
    resolver: Arc<PluginResolver>,
    contexts: Arc<ExecutionContextRegistry>,
    spiders: RwLock<HashMap<String, Arc<dyn Spider>>>,
    locks: KeyedLocks,
}

impl SpiderRegistry {
    pub fn new(resolver: Arc<PluginResolver>, contexts: Arc<ExecutionContextRegistry>) -> Self {
        Self {
            resolver,
            contexts,
            spiders: RwLock::new(HashMap::new()),
            locks: KeyedLocks::default(),
        }
    }

    /// Get the spider for `site_key`, creating it on first use.
    ///
    /// Never fails: any resolution, load or init error is logged and an
    /// inert [`NullSpider`] is returned. Null spiders are not cached, so a
    /// later call retries.
    pub async fn get(
        &self,
        site_key: &str,
        adapter_id: &str,
        source_ref: &str,
        ext: &str,
    ) -> Arc<dyn Spider> {
        match self.get_or_create(site_key, adapter_id, source_ref, ext).await {
            Ok(spider) => spider,
            Err(e) => {
                tracing::error!(
                    site_key = %site_key,
                    adapter_id = %adapter_id,
                    source = %source_ref,
                    "failed to create spider: {e}"
                );
                Arc::new(NullSpider)
            }
        }
    }

    async fn get_or_create(
        &self,
        site_key: &str,
        adapter_id: &str,
        source_ref: &str,
        ext: &str,
    ) -> Result<Arc<dyn Spider>, PluginError> {
        let key = spider_key(source_ref, site_key);
        if let Some(spider) = self.spiders.read().await.get(&key) {
            return Ok(Arc::clone(spider));
        }

        let _guard = self.locks.lock(&key).await;

        if let Some(spider) = self.spiders.read().await.get(&key) {
            return Ok(Arc::clone(spider));
        }

        let context = self.context_for(source_ref).await?;
        let module = context.module();
        let class = class_name(adapter_id).to_string();
        let ext = ext.to_string();

        let spider = tokio::task::spawn_blocking(move || {
            let spider: Arc<dyn Spider> = Arc::from(module.instantiate(&class)?);
            if let Err(e) = spider.init(&ext) {
                spider.destroy();
                return Err(e);
            }
            Ok::<_, PluginError>(spider)
        })
        .await
        .map_err(|e| PluginError::Sandbox(format!("spider init task failed: {e}")))??;

        self.spiders
            .write()
            .await
            .insert(key.clone(), Arc::clone(&spider));

        tracing::info!(
            site_key = %site_key,
            class = %spider.class(),
            spider_key = %key,
            "spider created"
        );
        Ok(spider)
    }

    /// The context for `source_ref`, resolving it first if needed.
    async fn context_for(&self, source_ref: &str) -> Result<Arc<LoadedContext>, PluginError> {
        if source_ref.trim().is_empty() {
            return Err(PluginError::InvalidUrl("empty source reference".into()));
        }
        let context_key = md5_hex(source_ref);
        if let Some(context) = self.contexts.get(&context_key).await {
            return Ok(context);
        }
        self.resolver.resolve(&context_key, source_ref).await?;
        self.contexts.get(&context_key).await.ok_or_else(|| {
            PluginError::Load(format!("no context registered for '{source_ref}' after resolution"))
        })
    }

    pub async fn len(&self) -> usize {
        self.spiders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.spiders.read().await.is_empty()
    }

    /// Remove every cached spider and hand them back for teardown.
    pub async fn drain(&self) -> Vec<Arc<dyn Spider>> {
        self.spiders.write().await.drain().map(|(_, s)| s).collect()
    }
}
