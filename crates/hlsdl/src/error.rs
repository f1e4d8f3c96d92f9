use std::path::{Path, PathBuf};

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("network error for {url}: {reason}")]
    Network {
        url: String,
        reason: String,
        retryable: bool,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch key from {uri}: {reason}")]
    KeyFetch { uri: String, reason: String },

    #[error("unsupported encryption method `{method}`")]
    UnsupportedEncryption { method: String },

    #[error("decryption error: {reason}")]
    Decryption { reason: String },

    #[error("playlist error: {reason}")]
    Playlist { reason: String },

    #[error("duplicate segment sequence id {sequence}")]
    DuplicateSequence { sequence: u64 },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("remux failed: {reason}")]
    Remux { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn network(url: impl Into<String>, reason: impl Into<String>, retryable: bool) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.into(),
            retryable,
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn storage(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn playlist(reason: impl Into<String>) -> Self {
        Self::Playlist {
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Transient transport faults are the only errors a worker retries.
    /// Every HTTP status failure is terminal, including 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { retryable, .. } => *retryable,
            Self::Cancelled
            | Self::InvalidUrl { .. }
            | Self::HttpStatus { .. }
            | Self::Storage { .. }
            | Self::KeyFetch { .. }
            | Self::UnsupportedEncryption { .. }
            | Self::Decryption { .. }
            | Self::Playlist { .. }
            | Self::DuplicateSequence { .. }
            | Self::Configuration { .. }
            | Self::Remux { .. }
            | Self::Internal { .. } => false,
        }
    }

    /// Errors that abort the whole job. Cancellation is a consequence of a
    /// fatal error elsewhere, and remux failures are diagnostics only.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Remux { .. })
    }
}

/// Classify a reqwest transport error for a given URL.
///
/// Connect, timeout, request and body errors are transient; redirect loops and
/// builder errors are not.
pub(crate) fn from_reqwest(url: &str, e: reqwest::Error) -> DownloadError {
    let retryable = e.is_connect() || e.is_timeout() || e.is_request() || e.is_body();
    DownloadError::Network {
        url: url.to_string(),
        reason: e.to_string(),
        retryable,
    }
}
