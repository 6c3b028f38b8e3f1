//! Source references and resolved locators.
//!
//! A source reference names the artifact a site's spiders live in:
//! `<locator>[;md5;<digest>]`. The locator is a `file:` path, an
//! `http(s)://` URL, or an alias resolved against the configured API URL.

use std::path::{Path, PathBuf};

use url::Url;

/// Separator between the locator and its optional content digest.
pub const MD5_DELIMITER: &str = ";md5;";

/// Lower-case hex MD5 of `data`.
pub fn md5_hex(data: impl AsRef<[u8]>) -> String {
    format!("{:x}", md5::compute(data))
}

/// A raw reference split into locator and optional digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceReference<'a> {
    pub locator: &'a str,
    pub md5: Option<&'a str>,
}

impl<'a> SourceReference<'a> {
    pub fn parse(raw: &'a str) -> Self {
        match raw.split_once(MD5_DELIMITER) {
            Some((locator, digest)) => {
                let digest = digest.trim();
                Self {
                    locator,
                    md5: (!digest.is_empty()).then_some(digest),
                }
            }
            None => Self {
                locator: raw,
                md5: None,
            },
        }
    }
}

pub fn is_local(locator: &str) -> bool {
    locator.starts_with("file")
}

pub fn is_remote(locator: &str) -> bool {
    locator.starts_with("http")
}

/// Turn a `file:` locator into a filesystem path.
pub fn local_path(locator: &str) -> PathBuf {
    let stripped = locator
        .strip_prefix("file://")
        .or_else(|| locator.strip_prefix("file:"))
        .unwrap_or(locator);
    PathBuf::from(stripped)
}

/// Resolve an alias against the API base URL.
///
/// Absolute locators are returned untouched. Without a base, or when the
/// join fails, the input comes back unchanged and the caller treats it as
/// "no progress".
pub fn resolve_alias(base: Option<&Url>, locator: &str) -> String {
    if is_local(locator) || is_remote(locator) {
        return locator.to_string();
    }
    let Some(base) = base else {
        return locator.to_string();
    };
    match base.join(locator) {
        Ok(joined) => {
            tracing::debug!(base = %base, alias = %locator, resolved = %joined, "alias resolved");
            joined.to_string()
        }
        Err(e) => {
            tracing::warn!(base = %base, alias = %locator, "failed to resolve alias: {e}");
            locator.to_string()
        }
    }
}

/// How a reference was turned into an artifact on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorKind {
    Local,
    Remote,
    CachedByHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Local(PathBuf),
    Remote { url: String, path: PathBuf },
    CachedByHash { url: String, path: PathBuf },
}

impl Locator {
    pub fn kind(&self) -> LocatorKind {
        match self {
            Locator::Local(_) => LocatorKind::Local,
            Locator::Remote { .. } => LocatorKind::Remote,
            Locator::CachedByHash { .. } => LocatorKind::CachedByHash,
        }
    }

    /// Local artifact path.
    pub fn path(&self) -> &Path {
        match self {
            Locator::Local(path) => path,
            Locator::Remote { path, .. } | Locator::CachedByHash { path, .. } => path,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Locator::Local(_) => None,
            Locator::Remote { url, .. } | Locator::CachedByHash { url, .. } => Some(url),
        }
    }
}

/// Outcome of one resolution call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub raw_reference: String,
    pub locator: Locator,
    pub content_hash: Option<String>,
}
