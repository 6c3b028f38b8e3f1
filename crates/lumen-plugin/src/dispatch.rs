//! Routes gateway parameters into a source's `proxy` hook.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use base64::Engine;

use crate::context::ExecutionContextRegistry;
use crate::error::PluginError;
use crate::outcome::{ProxyOutcome, ProxyParams, ProxyReply, RawReply};
use crate::source::md5_hex;

/// `do` values reserved for script engines this host does not embed.
const SCRIPT_ENGINES: &[&str] = &["js", "py"];

// ─── Active source ──────────────────────────────────────────────────────

/// The process-wide "current" source reference.
///
/// Every swap bumps a generation counter, so a dispatch can tell whether
/// the source changed underneath it.
#[derive(Debug, Default)]
pub struct ActiveSource {
    slot: RwLock<Option<String>>,
    generation: AtomicU64,
}

impl ActiveSource {
    /// Replace the active source. Returns the new generation.
    pub fn set(&self, source: Option<String>) -> u64 {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = source;
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current source together with the generation it belongs to.
    pub fn snapshot(&self) -> (Option<String>, u64) {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        (slot.clone(), self.generation.load(Ordering::SeqCst))
    }

    pub fn get(&self) -> Option<String> {
        self.snapshot().0
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

// ─── Bridge ─────────────────────────────────────────────────────────────

pub struct ProxyDispatchBridge {
    contexts: Arc<ExecutionContextRegistry>,
    active: Arc<ActiveSource>,
    client: reqwest::Client,
}

impl ProxyDispatchBridge {
    pub fn new(
        contexts: Arc<ExecutionContextRegistry>,
        active: Arc<ActiveSource>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            contexts,
            active,
            client,
        }
    }

    /// Dispatch to the active source. `None` when there is nothing to
    /// dispatch to or the call failed.
    pub async fn invoke(&self, params: ProxyParams) -> Option<ProxyOutcome> {
        if let Some(engine) = params.get("do").filter(|d| SCRIPT_ENGINES.contains(&d.as_str())) {
            tracing::debug!(engine = %engine, "no script engine available for proxy request");
            return None;
        }

        let (source, generation) = self.active.snapshot();
        let Some(source) = source else {
            tracing::debug!("proxy request with no active source");
            return None;
        };

        let outcome = self.invoke_for(&source, params).await;

        let current = self.active.generation();
        if current != generation {
            tracing::warn!(
                source = %source,
                started_generation = generation,
                current_generation = current,
                "active source changed while a proxy call was in flight"
            );
        }
        outcome
    }

    /// Dispatch to an explicit source, bypassing the active slot.
    pub async fn invoke_for(&self, source: &str, params: ProxyParams) -> Option<ProxyOutcome> {
        match self.try_invoke(source, params).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(source = %source, "proxy dispatch failed: {e}");
                None
            }
        }
    }

    async fn try_invoke(
        &self,
        source: &str,
        params: ProxyParams,
    ) -> Result<Option<ProxyOutcome>, PluginError> {
        let Some(context) = self.contexts.get(&md5_hex(source)).await else {
            tracing::debug!(source = %source, "proxy request for a source that is not loaded");
            return Ok(None);
        };
        if !context.capabilities().proxy {
            return Ok(None);
        }

        inspect_params(&params);

        let module = context.module();
        let reply = tokio::task::spawn_blocking(move || module.proxy(&params))
            .await
            .map_err(|e| PluginError::Dispatch(format!("proxy task failed: {e}")))??;

        match reply {
            Some(reply) => self.realize(reply).await.map(Some),
            None => Ok(None),
        }
    }

    /// Turn a plugin reply into something the gateway can serve.
    async fn realize(&self, reply: ProxyReply) -> Result<ProxyOutcome, PluginError> {
        match reply {
            ProxyReply::Fetch { url, headers } => {
                let mut request = self.client.get(&url);
                for (name, value) in &headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                let response = request.send().await?;
                tracing::debug!(url = %url, status = %response.status(), "plugin fetch completed");
                Ok(ProxyOutcome::Upstream(response))
            }
            ProxyReply::Redirect { url } => Ok(ProxyOutcome::Redirect(url)),
            ProxyReply::Raw {
                status,
                content_type,
                body,
                encoding,
                headers,
            } => Ok(ProxyOutcome::Raw(RawReply::from_parts(
                status,
                content_type,
                body,
                encoding,
                headers,
            )?)),
        }
    }
}

/// Note values that are not base64. Informational only: every value is
/// passed to the plugin unchanged.
fn inspect_params(params: &ProxyParams) {
    let engine = base64::engine::general_purpose::STANDARD;
    for (name, value) in params {
        if engine.decode(value).is_err() {
            tracing::trace!(param = %name, "proxy parameter is not base64");
        }
    }
}
