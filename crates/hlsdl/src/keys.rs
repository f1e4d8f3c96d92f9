// Key Cache: job-scoped store of AES-128 key material, fetched lazily and at
// most once per key URI.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use moka::future::Cache;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::DownloadError;
use crate::fetcher::ResourceFetcher;
use crate::retry::{RetryAction, RetryPolicy, retry_with_policy};

/// Key material for one key URI.
pub type KeyMaterial = [u8; 16];

const MAX_CACHED_KEYS: u64 = 1024;

pub struct KeyCache {
    fetcher: Arc<dyn ResourceFetcher>,
    retry: RetryPolicy,
    token: CancellationToken,
    keys: Cache<String, KeyMaterial>,
    fetches: AtomicUsize,
}

impl KeyCache {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        retry: RetryPolicy,
        token: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            retry,
            token,
            keys: Cache::new(MAX_CACHED_KEYS),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Resolve the key for `uri`, fetching it on first use.
    ///
    /// Concurrent callers asking for the same URI share a single fetch.
    pub async fn get(&self, uri: &Url) -> Result<KeyMaterial, DownloadError> {
        self.keys
            .try_get_with(uri.to_string(), self.fetch_key(uri))
            .await
            .map_err(|e| match e.as_ref() {
                DownloadError::Cancelled => DownloadError::Cancelled,
                other => DownloadError::KeyFetch {
                    uri: uri.to_string(),
                    reason: other.to_string(),
                },
            })
    }

    /// Number of key fetches started by this cache, retries excluded.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    async fn fetch_key(&self, uri: &Url) -> Result<KeyMaterial, DownloadError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        debug!(uri = %uri, "Fetching decryption key");

        let bytes = retry_with_policy(&self.retry, &self.token, move |_| async move {
            RetryAction::from(self.fetcher.fetch(uri, "key").await)
        })
        .await?;

        // AES-128 keys are 16 bytes
        KeyMaterial::try_from(bytes.as_ref()).map_err(|_| DownloadError::Decryption {
            reason: format!(
                "key from {uri} has incorrect length: {} bytes (expected 16)",
                bytes.len()
            ),
        })
    }
}
