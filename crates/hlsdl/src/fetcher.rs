// Resource Fetcher: raw byte retrieval for playlists, segments and keys.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::trace;
use url::Url;

use crate::DownloadError;
use crate::config::FetcherConfig;
use crate::error::from_reqwest;

/// Single-attempt fetch of a remote resource.
///
/// Implementations perform exactly one request per call. Retrying is the
/// caller's concern; errors must be classified so that
/// [`DownloadError::is_retryable`] distinguishes transient transport faults
/// from terminal ones.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, url: &Url, operation: &'static str) -> Result<Bytes, DownloadError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(config.effective_headers())
            .build()
            .map_err(|e| {
                DownloadError::configuration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, operation: &'static str) -> Result<Bytes, DownloadError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| from_reqwest(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(status, url.as_str(), operation));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| from_reqwest(url.as_str(), e))?;
        trace!(url = %url, operation, size = bytes.len(), "Fetched resource");
        Ok(bytes)
    }
}
