// HLS Playlist resolution: turns a playlist URL into the job's SegmentSet.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use m3u8_rs::{KeyMethod, MasterPlaylist, MediaPlaylist, Playlist, parse_playlist_res};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::DownloadError;
use crate::fetcher::ResourceFetcher;
use crate::retry::{RetryAction, RetryPolicy, retry_with_policy};
use crate::segment::{EncryptionInfo, EncryptionMethod, Segment, SegmentSet};

#[async_trait]
pub trait SegmentResolver: Send + Sync {
    async fn resolve(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<SegmentSet, DownloadError>;
}

/// Resolves master and media playlists with `m3u8-rs`.
pub struct M3u8Resolver {
    fetcher: Arc<dyn ResourceFetcher>,
    retry: RetryPolicy,
}

impl M3u8Resolver {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, retry: RetryPolicy) -> Self {
        Self { fetcher, retry }
    }

    async fn load(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<(Playlist, Bytes), DownloadError> {
        let body = retry_with_policy(&self.retry, token, move |_| async move {
            RetryAction::from(self.fetcher.fetch(url, "playlist").await)
        })
        .await?;

        let playlist = parse_playlist_res(&body)
            .map_err(|e| DownloadError::playlist(format!("failed to parse {url}: {e:?}")))?;
        Ok((playlist, body))
    }
}

#[async_trait]
impl SegmentResolver for M3u8Resolver {
    async fn resolve(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<SegmentSet, DownloadError> {
        let (media, body, media_url) = match self.load(url, token).await? {
            (Playlist::MediaPlaylist(media), body) => (media, body, url.clone()),
            (Playlist::MasterPlaylist(master), _) => {
                let variant_url = select_variant(&master, url)?;
                info!(url = %variant_url, "Loading selected variant");
                match self.load(&variant_url, token).await? {
                    (Playlist::MediaPlaylist(media), body) => (media, body, variant_url),
                    (Playlist::MasterPlaylist(_), _) => {
                        return Err(DownloadError::playlist(format!(
                            "variant {variant_url} is a master playlist"
                        )));
                    }
                }
            }
        };

        let cleared = cleared_key_markers(&body);
        let segments = segments_from_media(&media, &cleared, &media_url)?;
        info!(
            url = %media_url,
            segments = segments.len(),
            first_sequence = media.media_sequence,
            "Media playlist resolved"
        );
        Ok(segments)
    }
}

fn resolve_uri(base: &Url, uri: &str) -> Result<Url, DownloadError> {
    base.join(uri)
        .map_err(|e| DownloadError::invalid_url(uri, e.to_string()))
}

/// Pick the highest-bandwidth variant that is not I-frame only.
fn select_variant(master: &MasterPlaylist, base: &Url) -> Result<Url, DownloadError> {
    let mut variants: Vec<_> = master.variants.iter().filter(|v| !v.is_i_frame).collect();
    if variants.is_empty() {
        return Err(DownloadError::playlist("master playlist has no variants"));
    }
    variants.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));

    for variant in &variants {
        let resolution = variant
            .resolution
            .map(|r| format!("{}x{}", r.width, r.height))
            .unwrap_or_default();
        info!(
            bandwidth = variant.bandwidth,
            resolution = %resolution,
            codecs = variant.codecs.as_deref().unwrap_or(""),
            frame_rate = variant.frame_rate.unwrap_or_default(),
            "Variant"
        );
    }

    // Sorted descending; stable sort keeps the first listed on ties.
    resolve_uri(base, &variants[0].uri)
}

/// For each segment URI line, whether the last `EXT-X-KEY` tag before it
/// (and after the previous segment) was `METHOD=NONE`.
///
/// m3u8-rs drops `METHOD=NONE` keys, so the raw text is the only place the
/// reset is visible.
fn cleared_key_markers(body: &[u8]) -> Vec<bool> {
    let text = String::from_utf8_lossy(body);
    let mut markers = Vec::new();
    let mut cleared = false;
    for line in text.lines().map(str::trim) {
        if let Some(attrs) = line.strip_prefix("#EXT-X-KEY:") {
            cleared = attrs.split(',').any(|attr| {
                attr.split_once('=')
                    .is_some_and(|(name, value)| name.trim() == "METHOD" && value.trim() == "NONE")
            });
        } else if !line.is_empty() && !line.starts_with('#') {
            markers.push(cleared);
            cleared = false;
        }
    }
    markers
}

fn segments_from_media(
    media: &MediaPlaylist,
    cleared: &[bool],
    base: &Url,
) -> Result<SegmentSet, DownloadError> {
    if media.segments.is_empty() {
        return Err(DownloadError::playlist(format!("{base} has no segments")));
    }
    if !media.end_list {
        warn!(url = %base, "Playlist has no EXT-X-ENDLIST, downloading current snapshot only");
    }

    let mut current_key: Option<EncryptionInfo> = None;
    let mut segments = Vec::with_capacity(media.segments.len());
    for (index, entry) in media.segments.iter().enumerate() {
        if cleared.get(index).copied().unwrap_or(false) {
            current_key = None;
        } else if let Some(key) = &entry.key {
            current_key = encryption_from_key(key, base)?;
        }

        let sequence = u64::try_from(index)
            .ok()
            .and_then(|offset| media.media_sequence.checked_add(offset))
            .ok_or_else(|| {
                DownloadError::playlist(format!(
                    "media sequence overflows after {} at segment {index}",
                    media.media_sequence
                ))
            })?;
        let uri = resolve_uri(base, &entry.uri)?;
        debug!(sequence, uri = %uri, encrypted = current_key.is_some(), "Segment listed");
        segments.push(Segment::new(sequence, uri, current_key.clone()));
    }

    SegmentSet::new(segments)
}

fn encryption_from_key(
    key: &m3u8_rs::Key,
    base: &Url,
) -> Result<Option<EncryptionInfo>, DownloadError> {
    let method = match &key.method {
        KeyMethod::None => return Ok(None),
        KeyMethod::AES128 => EncryptionMethod::Aes128,
        KeyMethod::SampleAES => EncryptionMethod::SampleAes,
        KeyMethod::Other(other) => EncryptionMethod::Other(other.clone()),
    };
    let key_uri = key
        .uri
        .as_deref()
        .map(|uri| resolve_uri(base, uri))
        .transpose()?;
    let iv = key
        .iv
        .as_deref()
        .map(EncryptionInfo::parse_iv)
        .transpose()?;

    Ok(Some(EncryptionInfo {
        method,
        key_uri,
        iv,
    }))
}
