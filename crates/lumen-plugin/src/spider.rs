//! Per-site adapter instances hosted by a loaded artifact.

use std::sync::Mutex;

use crate::error::PluginError;
use crate::outcome::{ProxyParams, ProxyReply};
use crate::sandbox::{call_export, EXPORT_SPIDER_DESTROY, EXPORT_SPIDER_INIT, EXPORT_SPIDER_PROXY};

/// Capability set every spider exposes to the host.
///
/// Optional plugin exports map to no-op defaults on the host side, so a
/// spider that only implements `init` is still a valid spider.
pub trait Spider: Send + Sync {
    /// Class name the spider was instantiated from.
    fn class(&self) -> &str;

    fn init(&self, ext: &str) -> Result<(), PluginError>;

    fn destroy(&self);

    fn proxy(&self, params: &ProxyParams) -> Result<Option<ProxyReply>, PluginError>;

    /// True for the inert fallback handed out when loading fails.
    fn is_null(&self) -> bool {
        false
    }
}

/// Inert spider returned instead of an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSpider;

impl Spider for NullSpider {
    fn class(&self) -> &str {
        ""
    }

    fn init(&self, _ext: &str) -> Result<(), PluginError> {
        Ok(())
    }

    fn destroy(&self) {}

    fn proxy(&self, _params: &ProxyParams) -> Result<Option<ProxyReply>, PluginError> {
        Ok(None)
    }

    fn is_null(&self) -> bool {
        true
    }
}

/// A spider backed by its own Extism instance.
pub struct WasmSpider {
    class: String,
    plugin: Mutex<extism::Plugin>,
    has_init: bool,
    has_destroy: bool,
    has_proxy: bool,
}

impl std::fmt::Debug for WasmSpider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmSpider")
            .field("class", &self.class)
            .field("has_init", &self.has_init)
            .field("has_destroy", &self.has_destroy)
            .field("has_proxy", &self.has_proxy)
            .finish_non_exhaustive()
    }
}

impl WasmSpider {
    pub fn new(class: impl Into<String>, plugin: extism::Plugin) -> Self {
        let has_init = plugin.function_exists(EXPORT_SPIDER_INIT);
        let has_destroy = plugin.function_exists(EXPORT_SPIDER_DESTROY);
        let has_proxy = plugin.function_exists(EXPORT_SPIDER_PROXY);
        Self {
            class: class.into(),
            plugin: Mutex::new(plugin),
            has_init,
            has_destroy,
            has_proxy,
        }
    }
}

impl Spider for WasmSpider {
    fn class(&self) -> &str {
        &self.class
    }

    fn init(&self, ext: &str) -> Result<(), PluginError> {
        if !self.has_init {
            return Ok(());
        }
        call_export(&self.plugin, &self.class, EXPORT_SPIDER_INIT, ext.as_bytes())
            .map(|_| ())
            .map_err(|e| PluginError::Load(format!("{} init failed: {e}", self.class)))
    }

    fn destroy(&self) {
        if !self.has_destroy {
            return;
        }
        if let Err(e) = call_export(&self.plugin, &self.class, EXPORT_SPIDER_DESTROY, &[]) {
            tracing::warn!(spider = %self.class, "spider destroy failed: {e}");
        }
    }

    fn proxy(&self, params: &ProxyParams) -> Result<Option<ProxyReply>, PluginError> {
        if !self.has_proxy {
            return Ok(None);
        }
        let input = serde_json::to_vec(params)?;
        let output = call_export(&self.plugin, &self.class, EXPORT_SPIDER_PROXY, &input)
            .map_err(|e| PluginError::Dispatch(e.to_string()))?;
        ProxyReply::from_output(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_spider_is_inert() {
        let spider = NullSpider;
        assert!(spider.is_null());
        assert!(spider.init("{}").is_ok());
        assert!(spider.proxy(&ProxyParams::new()).unwrap().is_none());
        spider.destroy();
        assert_eq!(spider.class(), "");
    }

    #[test]
    fn test_null_spider_as_trait_object() {
        let spider: std::sync::Arc<dyn Spider> = std::sync::Arc::new(NullSpider);
        assert!(spider.is_null());
    }
}
