//! WebAssembly plugin modules loaded with Extism (wasmtime).
//!
//! A source artifact is a WASM module. Loading it yields a [`PluginModule`]:
//! one Extism instance for module-level capabilities (`init`, `proxy`) plus
//! the artifact bytes, from which every spider gets a fresh, isolated
//! instance.
//!
//! Export contract:
//!
//! | export           | level  | required        |
//! |------------------|--------|-----------------|
//! | `init`           | module | no              |
//! | `proxy`          | module | no              |
//! | `spider_new`     | spider | to host spiders |
//! | `spider_init`    | spider | no              |
//! | `spider_proxy`   | spider | no              |
//! | `spider_destroy` | spider | no              |

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::PluginError;
use crate::outcome::{ProxyParams, ProxyReply};
use crate::spider::{Spider, WasmSpider};

pub const EXPORT_INIT: &str = "init";
pub const EXPORT_PROXY: &str = "proxy";
pub const EXPORT_SPIDER_NEW: &str = "spider_new";
pub const EXPORT_SPIDER_INIT: &str = "spider_init";
pub const EXPORT_SPIDER_PROXY: &str = "spider_proxy";
pub const EXPORT_SPIDER_DESTROY: &str = "spider_destroy";

/// Config key carrying the class name into a spider instance.
pub const CONFIG_SPIDER_CLASS: &str = "spider_class";

/// WASM magic bytes: `\0asm`
const WASM_MAGIC: &[u8; 4] = b"\0asm";

// ─── Configuration ──────────────────────────────────────────────────────

/// Options applied to every Extism instance the host builds.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Expose WASI to plugins (default: true).
    pub wasi_enabled: bool,
    /// Hosts plugins may reach through Extism's HTTP host function
    /// (default: `*`).
    pub allowed_hosts: Vec<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            wasi_enabled: true,
            allowed_hosts: vec!["*".to_string()],
        }
    }
}

impl ContextConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            wasi_enabled: std::env::var("PLUGIN_WASI_ENABLED")
                .map(|v| !v.eq_ignore_ascii_case("false"))
                .unwrap_or(defaults.wasi_enabled),
            allowed_hosts: std::env::var("PLUGIN_ALLOWED_HOSTS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|h| h.trim().to_string())
                        .filter(|h| !h.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|hosts| !hosts.is_empty())
                .unwrap_or(defaults.allowed_hosts),
        }
    }
}

// ─── Plugin interface ───────────────────────────────────────────────────

/// Optional module-level capabilities discovered at load time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub init: bool,
    pub proxy: bool,
}

/// An artifact bound to the plugin interface.
pub trait PluginModule: Send + Sync {
    /// Human-readable name, usually the artifact file name.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Run the module-level `init` hook.
    fn init(&self) -> Result<(), PluginError>;

    /// Run the module-level `proxy` hook. `Ok(None)` when absent or empty.
    fn proxy(&self, params: &ProxyParams) -> Result<Option<ProxyReply>, PluginError>;

    /// Create a new, uninitialised spider of `class`.
    fn instantiate(&self, class: &str) -> Result<Box<dyn Spider>, PluginError>;
}

/// Turns an artifact on disk into a [`PluginModule`].
pub trait ModuleLoader: Send + Sync {
    fn open(&self, path: &Path) -> Result<Arc<dyn PluginModule>, PluginError>;
}

// ─── Extism binding ─────────────────────────────────────────────────────

/// Loads artifacts as Extism plugins.
#[derive(Debug, Clone, Default)]
pub struct WasmLoader {
    config: ContextConfig,
}

impl WasmLoader {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }
}

impl ModuleLoader for WasmLoader {
    fn open(&self, path: &Path) -> Result<Arc<dyn PluginModule>, PluginError> {
        Ok(Arc::new(WasmModule::load(path, self.config.clone())?))
    }
}

/// A loaded WASM artifact.
pub struct WasmModule {
    name: String,
    wasm: Arc<[u8]>,
    config: ContextConfig,
    instance: Mutex<extism::Plugin>,
    capabilities: Capabilities,
}

impl std::fmt::Debug for WasmModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmModule")
            .field("name", &self.name)
            .field("size", &self.wasm.len())
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl WasmModule {
    /// Read and compile an artifact.
    pub fn load(path: &Path, config: ContextConfig) -> Result<Self, PluginError> {
        let wasm_bytes = std::fs::read(path)?;
        if wasm_bytes.len() < 4 || &wasm_bytes[..4] != WASM_MAGIC {
            return Err(PluginError::Load(format!(
                "{} is not a WASM binary (magic bytes mismatch)",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let wasm: Arc<[u8]> = Arc::from(wasm_bytes);

        let instance = build_plugin(&wasm, &config, None)?;
        let capabilities = Capabilities {
            init: instance.function_exists(EXPORT_INIT),
            proxy: instance.function_exists(EXPORT_PROXY),
        };

        tracing::debug!(
            module = %name,
            init = capabilities.init,
            proxy = capabilities.proxy,
            "WASM module compiled"
        );

        Ok(Self {
            name,
            wasm,
            config,
            instance: Mutex::new(instance),
            capabilities,
        })
    }
}

impl PluginModule for WasmModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn init(&self) -> Result<(), PluginError> {
        if !self.capabilities.init {
            return Ok(());
        }
        call_export(&self.instance, &self.name, EXPORT_INIT, &[]).map(|_| ())
    }

    fn proxy(&self, params: &ProxyParams) -> Result<Option<ProxyReply>, PluginError> {
        if !self.capabilities.proxy {
            return Ok(None);
        }
        let input = serde_json::to_vec(params)?;
        let output = call_export(&self.instance, &self.name, EXPORT_PROXY, &input)
            .map_err(|e| PluginError::Dispatch(e.to_string()))?;
        ProxyReply::from_output(&output)
    }

    fn instantiate(&self, class: &str) -> Result<Box<dyn Spider>, PluginError> {
        let mut plugin = build_plugin(&self.wasm, &self.config, Some(class))?;
        if !plugin.function_exists(EXPORT_SPIDER_NEW) {
            return Err(PluginError::Load(format!(
                "{} does not export {EXPORT_SPIDER_NEW}",
                self.name
            )));
        }
        plugin
            .call::<&[u8], Vec<u8>>(EXPORT_SPIDER_NEW, class.as_bytes())
            .map_err(|e| {
                PluginError::Load(format!("{} cannot construct '{class}': {e}", self.name))
            })?;
        Ok(Box::new(WasmSpider::new(class, plugin)))
    }
}

fn build_plugin(
    wasm: &[u8],
    config: &ContextConfig,
    class: Option<&str>,
) -> Result<extism::Plugin, PluginError> {
    let mut manifest = extism::Manifest::new([extism::Wasm::data(wasm.to_vec())]);
    for host in &config.allowed_hosts {
        manifest = manifest.with_allowed_host(host.as_str());
    }
    if let Some(class) = class {
        manifest = manifest.with_config_key(CONFIG_SPIDER_CLASS, class);
    }

    extism::PluginBuilder::new(manifest)
        .with_wasi(config.wasi_enabled)
        .build()
        .map_err(|e| PluginError::Load(e.to_string()))
}

/// Call an export with raw bytes in and out.
pub(crate) fn call_export(
    plugin: &Mutex<extism::Plugin>,
    owner: &str,
    export: &str,
    input: &[u8],
) -> Result<Vec<u8>, PluginError> {
    let mut plugin = plugin
        .lock()
        .map_err(|_| PluginError::Sandbox(format!("{owner}: instance lock poisoned")))?;
    plugin
        .call::<&[u8], Vec<u8>>(export, input)
        .map_err(|e| PluginError::Sandbox(format!("{owner}::{export}: {e}")))
}

// ─── Tests ──────────────────────────────────────────────────────────────
