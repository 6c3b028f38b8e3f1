//! In-process stand-ins for WASM modules, for host and gateway tests.
//!
//! A [`StubLoader`] opens any existing file as a [`StubModule`]; every
//! observable call is counted in a shared [`StubCounters`].

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::PluginError;
use crate::outcome::{ProxyParams, ProxyReply};
use crate::sandbox::{Capabilities, ModuleLoader, PluginModule};
use crate::spider::Spider;

/// Call counters shared by a loader and everything it creates.
#[derive(Debug, Default)]
pub struct StubCounters {
    opens: AtomicUsize,
    module_inits: AtomicUsize,
    proxy_calls: AtomicUsize,
    spiders_created: AtomicUsize,
    spider_inits: AtomicUsize,
    spider_destroys: AtomicUsize,
    pending_open_failures: AtomicUsize,
    last_params: Mutex<Option<ProxyParams>>,
}

impl StubCounters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn module_inits(&self) -> usize {
        self.module_inits.load(Ordering::SeqCst)
    }

    pub fn proxy_calls(&self) -> usize {
        self.proxy_calls.load(Ordering::SeqCst)
    }

    pub fn spiders_created(&self) -> usize {
        self.spiders_created.load(Ordering::SeqCst)
    }

    pub fn spider_inits(&self) -> usize {
        self.spider_inits.load(Ordering::SeqCst)
    }

    pub fn spider_destroys(&self) -> usize {
        self.spider_destroys.load(Ordering::SeqCst)
    }

    /// Parameters of the most recent proxy call.
    pub fn last_params(&self) -> Option<ProxyParams> {
        self.last_params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Clone)]
struct StubBehavior {
    init: bool,
    proxy: bool,
    fail_module_init: bool,
    fail_proxy: bool,
    fail_spider_init: bool,
    /// Empty means every class is known.
    classes: HashSet<String>,
    reply: Option<ProxyReply>,
}

impl Default for StubBehavior {
    fn default() -> Self {
        Self {
            init: true,
            proxy: true,
            fail_module_init: false,
            fail_proxy: false,
            fail_spider_init: false,
            classes: HashSet::new(),
            reply: None,
        }
    }
}

/// Loader producing [`StubModule`]s.
#[derive(Debug, Clone, Default)]
pub struct StubLoader {
    behavior: StubBehavior,
    counters: Arc<StubCounters>,
}

impl StubLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_init(mut self) -> Self {
        self.behavior.init = false;
        self
    }

    pub fn without_proxy(mut self) -> Self {
        self.behavior.proxy = false;
        self
    }

    pub fn failing_module_init(mut self) -> Self {
        self.behavior.fail_module_init = true;
        self
    }

    pub fn failing_proxy(mut self) -> Self {
        self.behavior.fail_proxy = true;
        self
    }

    pub fn failing_spider_init(mut self) -> Self {
        self.behavior.fail_spider_init = true;
        self
    }

    /// Fail the next `n` opens with a load error.
    pub fn failing_opens(self, n: usize) -> Self {
        self.counters.pending_open_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Restrict instantiation to the given class names.
    pub fn with_classes(mut self, classes: &[&str]) -> Self {
        self.behavior.classes = classes.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Reply returned by every proxy call.
    pub fn with_reply(mut self, reply: ProxyReply) -> Self {
        self.behavior.reply = Some(reply);
        self
    }

    pub fn counters(&self) -> Arc<StubCounters> {
        Arc::clone(&self.counters)
    }
}

impl ModuleLoader for StubLoader {
    fn open(&self, path: &Path) -> Result<Arc<dyn PluginModule>, PluginError> {
        std::fs::metadata(path)?;
        let failed = self
            .counters
            .pending_open_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(PluginError::Load(format!("stub open failure: {}", path.display())));
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StubModule {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            behavior: self.behavior.clone(),
            counters: Arc::clone(&self.counters),
        }))
    }
}

#[derive(Debug)]
pub struct StubModule {
    name: String,
    behavior: StubBehavior,
    counters: Arc<StubCounters>,
}

impl StubModule {
    fn reply(&self, params: &ProxyParams) -> Result<Option<ProxyReply>, PluginError> {
        self.counters.proxy_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .counters
            .last_params
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(params.clone());
        if self.behavior.fail_proxy {
            return Err(PluginError::Dispatch("stub proxy failure".into()));
        }
        Ok(self.behavior.reply.clone())
    }
}

impl PluginModule for StubModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            init: self.behavior.init,
            proxy: self.behavior.proxy,
        }
    }

    fn init(&self) -> Result<(), PluginError> {
        self.counters.module_inits.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_module_init {
            return Err(PluginError::Sandbox("stub init failure".into()));
        }
        Ok(())
    }

    fn proxy(&self, params: &ProxyParams) -> Result<Option<ProxyReply>, PluginError> {
        if !self.behavior.proxy {
            return Ok(None);
        }
        self.reply(params)
    }

    fn instantiate(&self, class: &str) -> Result<Box<dyn Spider>, PluginError> {
        if !self.behavior.classes.is_empty() && !self.behavior.classes.contains(class) {
            return Err(PluginError::Load(format!("unknown spider class '{class}'")));
        }
        self.counters.spiders_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubSpider {
            class: class.to_string(),
            module: StubModule {
                name: self.name.clone(),
                behavior: self.behavior.clone(),
                counters: Arc::clone(&self.counters),
            },
        }))
    }
}

#[derive(Debug)]
pub struct StubSpider {
    class: String,
    module: StubModule,
}

impl Spider for StubSpider {
    fn class(&self) -> &str {
        &self.class
    }

    fn init(&self, _ext: &str) -> Result<(), PluginError> {
        self.module.counters.spider_inits.fetch_add(1, Ordering::SeqCst);
        if self.module.behavior.fail_spider_init {
            return Err(PluginError::Load(format!("{} init failed", self.class)));
        }
        Ok(())
    }

    fn destroy(&self) {
        self.module.counters.spider_destroys.fetch_add(1, Ordering::SeqCst);
    }

    fn proxy(&self, params: &ProxyParams) -> Result<Option<ProxyReply>, PluginError> {
        self.module.reply(params)
    }
}
