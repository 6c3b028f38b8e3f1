//! Lumen plugin host
//!
//! Resolves source references (local files, remote URLs, aliases against a
//! configured API URL, hash-matched cached downloads) to WASM artifacts,
//! loads each artifact into its own Extism context, instantiates and caches
//! per-site spiders, and bridges gateway requests into a source's `proxy`
//! hook.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod fetcher;
pub mod host;
pub mod outcome;
pub mod registry;
pub mod resolver;
pub mod sandbox;
pub mod source;
pub mod spider;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::HostConfig;
pub use context::{ExecutionContextRegistry, LoadedContext};
pub use dispatch::{ActiveSource, ProxyDispatchBridge};
pub use error::PluginError;
pub use fetcher::ContentFetcher;
pub use host::PluginHost;
pub use outcome::{BodyEncoding, ProxyOutcome, ProxyParams, ProxyReply, RawReply};
pub use registry::SpiderRegistry;
pub use resolver::PluginResolver;
pub use sandbox::{Capabilities, ContextConfig, ModuleLoader, PluginModule, WasmLoader};
pub use source::{Locator, LocatorKind, SourceDescriptor, SourceReference};
pub use spider::{NullSpider, Spider};
