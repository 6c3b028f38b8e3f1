//! Proxy results: the plugin wire format and the host-side outcome.

use std::collections::BTreeMap;

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// Parameters handed to a `proxy` capability.
pub type ProxyParams = BTreeMap<String, String>;

/// How a raw reply's `body` string is encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    #[default]
    Text,
    Base64,
}

/// JSON reply produced by a plugin's `proxy` export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProxyReply {
    /// Ask the host to fetch `url` and stream the upstream response back.
    Fetch {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    Redirect {
        url: String,
    },
    Raw {
        /// Left untyped: plugins have been seen sending strings or nothing.
        #[serde(default)]
        status: Option<serde_json::Value>,
        #[serde(default)]
        content_type: Option<String>,
        #[serde(default)]
        body: String,
        #[serde(default)]
        encoding: BodyEncoding,
        #[serde(default)]
        headers: Option<BTreeMap<String, String>>,
    },
}

impl ProxyReply {
    /// Parse a plugin's output. Empty output means "nothing to proxy".
    pub fn from_output(output: &[u8]) -> Result<Option<Self>, PluginError> {
        if output.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(output)?))
    }
}

/// A fully materialised raw reply.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReply {
    /// `None` when the plugin sent no usable status.
    pub status: Option<u16>,
    pub content_type: String,
    pub body: Bytes,
    pub headers: Option<BTreeMap<String, String>>,
}

impl RawReply {
    pub fn from_parts(
        status: Option<serde_json::Value>,
        content_type: Option<String>,
        body: String,
        encoding: BodyEncoding,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Self, PluginError> {
        let status = status.as_ref().and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });
        let body = match encoding {
            BodyEncoding::Text => Bytes::from(body),
            BodyEncoding::Base64 => Bytes::from(
                base64::engine::general_purpose::STANDARD
                    .decode(body.trim())
                    .map_err(|e| PluginError::Dispatch(format!("invalid base64 body: {e}")))?,
            ),
        };
        Ok(Self {
            status,
            content_type: content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
            body,
            headers,
        })
    }
}

/// What the gateway turns into an HTTP response.
#[derive(Debug)]
pub enum ProxyOutcome {
    /// Upstream response whose status, headers and body are forwarded.
    Upstream(reqwest::Response),
    Redirect(String),
    Raw(RawReply),
}
