//! One loaded module per resolved source.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use tokio::sync::{OwnedMutexGuard, RwLock};

use crate::error::PluginError;
use crate::sandbox::{Capabilities, ModuleLoader, PluginModule};
use crate::source::SourceDescriptor;

/// A source artifact bound to its own isolated module.
pub struct LoadedContext {
    key: String,
    artifact: PathBuf,
    descriptor: Option<SourceDescriptor>,
    module: Arc<dyn PluginModule>,
}

impl std::fmt::Debug for LoadedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedContext")
            .field("key", &self.key)
            .field("artifact", &self.artifact)
            .field("module", &self.module.name())
            .finish()
    }
}

impl LoadedContext {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    /// How the artifact was resolved; `None` for contexts loaded directly
    /// from a path.
    pub fn descriptor(&self) -> Option<&SourceDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn module(&self) -> Arc<dyn PluginModule> {
        Arc::clone(&self.module)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.module.capabilities()
    }
}

// ─── Registry ───────────────────────────────────────────────────────────

/// Loaded contexts indexed by context key (MD5 of the source reference).
pub struct ExecutionContextRegistry {
    loader: Arc<dyn ModuleLoader>,
    contexts: RwLock<HashMap<String, Arc<LoadedContext>>>,
}

impl ExecutionContextRegistry {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            loader,
            contexts: RwLock::new(HashMap::new()),
        }
    }

    /// Load `artifact` under `key`, replacing any previous context.
    ///
    /// The module-level `init` hook runs once here when the module has one;
    /// its failure is logged and does not fail the load.
    pub async fn load(&self, key: &str, artifact: &Path) -> Result<Arc<LoadedContext>, PluginError> {
        self.open(key, artifact, None).await
    }

    /// Load the artifact a resolution produced, remembering the descriptor.
    pub async fn install(
        &self,
        key: &str,
        descriptor: &SourceDescriptor,
    ) -> Result<Arc<LoadedContext>, PluginError> {
        self.open(key, descriptor.locator.path(), Some(descriptor.clone()))
            .await
    }

    async fn open(
        &self,
        key: &str,
        artifact: &Path,
        descriptor: Option<SourceDescriptor>,
    ) -> Result<Arc<LoadedContext>, PluginError> {
        let loader = Arc::clone(&self.loader);
        let path = artifact.to_path_buf();
        let module = tokio::task::spawn_blocking(move || {
            let module = loader.open(&path)?;
            if module.capabilities().init {
                if let Err(e) = module.init() {
                    tracing::warn!(module = %module.name(), "module init failed: {e}");
                }
            }
            Ok::<_, PluginError>(module)
        })
        .await
        .map_err(|e| PluginError::Sandbox(format!("module loader task failed: {e}")))??;

        let context = Arc::new(LoadedContext {
            key: key.to_string(),
            artifact: artifact.to_path_buf(),
            descriptor,
            module,
        });

        let replaced = self
            .contexts
            .write()
            .await
            .insert(key.to_string(), Arc::clone(&context))
            .is_some();

        let caps = context.capabilities();
        tracing::info!(
            context_key = %key,
            artifact = %artifact.display(),
            init = caps.init,
            proxy = caps.proxy,
            replaced,
            "execution context loaded"
        );
        Ok(context)
    }

    pub async fn get(&self, key: &str) -> Option<Arc<LoadedContext>> {
        self.contexts.read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.contexts.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.contexts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contexts.read().await.is_empty()
    }

    /// Drop every context. Returns how many were loaded.
    pub async fn clear(&self) -> usize {
        let mut contexts = self.contexts.write().await;
        let count = contexts.len();
        contexts.clear();
        count
    }
}

// ─── Per-key locks ──────────────────────────────────────────────────────

/// Async mutexes handed out by key, so work on one key serialises without
/// blocking other keys. An entry lives only while someone holds or waits
/// on it; a waiter cancelled mid-wait can leave its entry behind until the
/// key is next released.
#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub(crate) async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        let guard = mutex.lock_owned().await;
        KeyGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Held lock on one key. Dropping the last guard for a key removes its entry.
pub(crate) struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self
            .locks
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        // Waiters clone the Arc under the map lock, so a count of one means
        // only the map still refers to this mutex.
        if locks
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(&self.key);
        }
    }
}
