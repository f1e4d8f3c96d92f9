use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::DownloadError;
use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// File name of the assembled transport stream inside the output directory.
pub const RAW_OUTPUT_NAME: &str = "video.ts";

/// File name of the remuxed container inside the output directory.
pub const REMUX_OUTPUT_NAME: &str = "all.mp4";

// --- Top-Level Configuration ---
#[derive(Debug, Clone)]
pub struct HlsDlConfig {
    /// Directory receiving transient segment files and the final artifact
    pub output_dir: PathBuf,
    /// Number of concurrent segment workers
    pub workers: usize,
    /// Show a progress bar while downloading
    pub progress: bool,
    pub fetcher: FetcherConfig,
    pub retry: RetryPolicy,
    pub remux: RemuxConfig,
}

impl Default for HlsDlConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./download"),
            workers: 4,
            progress: true,
            fetcher: FetcherConfig::default(),
            retry: RetryPolicy::default(),
            remux: RemuxConfig::default(),
        }
    }
}

impl HlsDlConfig {
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.workers == 0 {
            return Err(DownloadError::configuration(
                "worker count must be at least 1",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(DownloadError::configuration(
                "retry policy must allow at least one attempt",
            ));
        }
        if self.fetcher.request_timeout.is_zero() {
            return Err(DownloadError::configuration(
                "request timeout must be non-zero",
            ));
        }
        if self.remux.enabled && self.remux.timeout.is_zero() {
            return Err(DownloadError::configuration("remux timeout must be non-zero"));
        }
        Ok(())
    }

    pub fn raw_output_path(&self) -> PathBuf {
        self.output_dir.join(RAW_OUTPUT_NAME)
    }

    pub fn remux_output_path(&self) -> PathBuf {
        self.output_dir.join(REMUX_OUTPUT_NAME)
    }
}

// --- Fetcher Configuration ---
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Deadline for a single request, body included
    pub request_timeout: Duration,
    /// Time allowed to establish a connection
    pub connect_timeout: Duration,
    pub user_agent: String,
    /// Extra headers, merged over the defaults
    pub headers: HeaderMap,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HeaderMap::new(),
        }
    }
}

impl FetcherConfig {
    /// Default headers with the configured headers taking precedence.
    pub fn effective_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        for (name, value) in self.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }
}

// --- Remux Configuration ---
#[derive(Debug, Clone)]
pub struct RemuxConfig {
    pub enabled: bool,
    pub ffmpeg_path: String,
    /// Deadline for the whole ffmpeg run
    pub timeout: Duration,
}

impl Default for RemuxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            timeout: Duration::from_secs(600),
        }
    }
}
