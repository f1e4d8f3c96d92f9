// HLS Downloader: drives one job from playlist URL to final artifact.
// resolve -> download -> assemble (decrypting) -> optional remux.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

use crate::DownloadError;
use crate::assembler::Assembler;
use crate::config::HlsDlConfig;
use crate::decryption::Decryptor;
use crate::downloader::Downloader;
use crate::fetcher::{HttpFetcher, ResourceFetcher};
use crate::keys::KeyCache;
use crate::playlist::{M3u8Resolver, SegmentResolver};
use crate::progress::{ProgressBarObserver, ProgressObserver};
use crate::remux::Remuxer;
use crate::segment::SegmentSet;

/// Final artifact of a completed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutput {
    /// `all.mp4` when remuxing succeeded, otherwise the raw `video.ts`.
    pub path: PathBuf,
    pub segments: usize,
    /// Plaintext bytes written to the raw stream.
    pub bytes_written: u64,
    pub remuxed: bool,
}

pub struct HlsDownloader {
    config: HlsDlConfig,
    fetcher: Arc<dyn ResourceFetcher>,
    resolver: Arc<dyn SegmentResolver>,
    progress: Option<Arc<dyn ProgressObserver>>,
}

impl HlsDownloader {
    /// Build a downloader with an HTTP fetcher and the m3u8 resolver.
    pub fn new(config: HlsDlConfig) -> Result<Self, DownloadError> {
        config.validate()?;
        let fetcher: Arc<dyn ResourceFetcher> = Arc::new(HttpFetcher::new(&config.fetcher)?);
        let resolver = Arc::new(M3u8Resolver::new(
            Arc::clone(&fetcher),
            config.retry.clone(),
        ));
        Ok(Self::with_parts(config, fetcher, resolver))
    }

    pub fn with_parts(
        config: HlsDlConfig,
        fetcher: Arc<dyn ResourceFetcher>,
        resolver: Arc<dyn SegmentResolver>,
    ) -> Self {
        let progress: Option<Arc<dyn ProgressObserver>> = if config.progress {
            Some(Arc::new(ProgressBarObserver::new()))
        } else {
            None
        };
        Self {
            config,
            fetcher,
            resolver,
            progress,
        }
    }

    /// Replace the progress observer chosen from the configuration.
    pub fn with_progress(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.progress = Some(observer);
        self
    }

    pub fn config(&self) -> &HlsDlConfig {
        &self.config
    }

    pub async fn download(
        &self,
        url: &str,
        token: &CancellationToken,
    ) -> Result<DownloadOutput, DownloadError> {
        let url = Url::parse(url).map_err(|e| DownloadError::invalid_url(url, e.to_string()))?;
        info!(url = %url, "Resolving playlist");
        let segments = self.resolver.resolve(&url, token).await?;
        self.download_segments(segments, token).await
    }

    /// Run a job over an already resolved segment set.
    pub async fn download_segments(
        &self,
        mut segments: SegmentSet,
        token: &CancellationToken,
    ) -> Result<DownloadOutput, DownloadError> {
        self.config.validate()?;
        if segments.is_empty() {
            return Err(DownloadError::playlist("no segments to download"));
        }

        let output_dir = &self.config.output_dir;
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| DownloadError::storage(output_dir, e))?;

        let job_token = token.child_token();
        let mut downloader = Downloader::new(
            Arc::clone(&self.fetcher),
            output_dir.clone(),
            self.config.workers,
            self.config.retry.clone(),
        );
        if let Some(progress) = &self.progress {
            downloader = downloader.with_progress(Arc::clone(progress));
        }

        if let Err(e) = downloader.download(&mut segments, &job_token).await {
            error!(error = %e, "Download job failed");
            return Err(e);
        }

        let keys = KeyCache::new(
            Arc::clone(&self.fetcher),
            self.config.retry.clone(),
            job_token.clone(),
        );
        let assembler = Assembler::new(Arc::new(Decryptor::new(Arc::new(keys))));
        let raw_path = self.config.raw_output_path();
        let report = assembler.assemble(segments, &raw_path).await.inspect_err(|e| {
            error!(error = %e, "Assembly failed");
        })?;

        let mut output = DownloadOutput {
            path: raw_path,
            segments: report.segments,
            bytes_written: report.bytes_written,
            remuxed: false,
        };

        if self.config.remux.enabled {
            let mp4_path = self.config.remux_output_path();
            match Remuxer::new(&self.config.remux)
                .remux(&output.path, &mp4_path)
                .await
            {
                Ok(()) => {
                    if let Err(e) = tokio::fs::remove_file(&output.path).await {
                        warn!(path = %output.path.display(), error = %e, "Failed to remove raw stream after remux");
                    }
                    output.path = mp4_path;
                    output.remuxed = true;
                }
                Err(e) => {
                    warn!(error = %e, "Remux failed, keeping raw transport stream");
                }
            }
        }

        info!(
            path = %output.path.display(),
            segments = output.segments,
            bytes = output.bytes_written,
            remuxed = output.remuxed,
            "Download complete"
        );
        Ok(output)
    }
}
