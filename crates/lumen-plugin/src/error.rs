//! Plugin host error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error(
        "unable to resolve source reference '{original}' (last attempted '{last_attempted}', \
         {attempts} attempts)"
    )]
    Resolution {
        original: String,
        last_attempted: String,
        attempts: u32,
    },

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("load error: {0}")]
    Load(String),

    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PluginError {
    /// Whether the resolver may retry the step that produced this error.
    ///
    /// Only the terminal resolution failure is final; fetch, load and I/O
    /// failures are spent against the attempt budget.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PluginError::Resolution { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_display_resolution() {
        let err = PluginError::Resolution {
            original: "spider.wasm".into(),
            last_attempted: "spider.wasm".into(),
            attempts: 30,
        };
        assert_eq!(
            err.to_string(),
            "unable to resolve source reference 'spider.wasm' (last attempted 'spider.wasm', 30 attempts)"
        );
    }

    #[test]
    fn test_display_fetch() {
        let err = PluginError::Fetch("empty response body".into());
        assert_eq!(err.to_string(), "fetch error: empty response body");
    }

    #[test]
    fn test_display_load() {
        let err = PluginError::Load("unknown spider class 'Douban'".into());
        assert_eq!(err.to_string(), "load error: unknown spider class 'Douban'");
    }

    #[test]
    fn test_display_dispatch() {
        let err = PluginError::Dispatch("proxy export trapped".into());
        assert_eq!(err.to_string(), "dispatch error: proxy export trapped");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err: PluginError = io_err.into();
        assert!(matches!(err, PluginError::Io(_)));
        assert!(err.to_string().contains("file missing"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("bad json{{{").unwrap_err();
        let err: PluginError = json_err.into();
        assert!(matches!(err, PluginError::Serialization(_)));
    }

    #[test]
    fn test_resolution_is_final() {
        let err = PluginError::Resolution {
            original: "a".into(),
            last_attempted: "a".into(),
            attempts: 1,
        };
        assert!(!err.is_retryable());
        assert!(PluginError::Fetch("x".into()).is_retryable());
        assert!(PluginError::Load("x".into()).is_retryable());
    }

    #[test]
    fn test_error_source_io() {
        use std::error::Error;
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe broken");
        let err: PluginError = io_err.into();
        assert!(err.source().is_some());
    }
}
