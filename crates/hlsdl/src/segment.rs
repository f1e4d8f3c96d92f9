//! Segment descriptors and the per-job segment collection.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use url::Url;

use crate::DownloadError;

/// Encryption method announced by an `EXT-X-KEY` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionMethod {
    /// Whole-segment AES-128 in CBC mode with PKCS#7 padding.
    Aes128,
    SampleAes,
    Other(String),
}

impl fmt::Display for EncryptionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aes128 => f.write_str("AES-128"),
            Self::SampleAes => f.write_str("SAMPLE-AES"),
            Self::Other(method) => f.write_str(method),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionInfo {
    pub method: EncryptionMethod,
    pub key_uri: Option<Url>,
    /// Explicit IV. When absent the segment's sequence id is used.
    pub iv: Option<[u8; 16]>,
}

impl EncryptionInfo {
    pub fn aes128(key_uri: Url, iv: Option<[u8; 16]>) -> Self {
        Self {
            method: EncryptionMethod::Aes128,
            key_uri: Some(key_uri),
            iv,
        }
    }

    /// Parse an `IV=0x...` attribute value into 16 bytes.
    pub fn parse_iv(value: &str) -> Result<[u8; 16], DownloadError> {
        let hex_str = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .unwrap_or(value);
        let mut iv = [0u8; 16];
        hex::decode_to_slice(hex_str, &mut iv)
            .map_err(|e| DownloadError::playlist(format!("invalid IV '{value}': {e}")))?;
        Ok(iv)
    }
}

/// One media segment of the presentation.
///
/// Sequence id, URI and encryption are fixed at construction. The local
/// storage path is attached once, by the download collector, and taken once by
/// the assembler.
#[derive(Debug, Clone)]
pub struct Segment {
    sequence: u64,
    uri: Url,
    encryption: Option<EncryptionInfo>,
    storage: Option<PathBuf>,
}

impl Segment {
    pub fn new(sequence: u64, uri: Url, encryption: Option<EncryptionInfo>) -> Self {
        Self {
            sequence,
            uri,
            encryption,
            storage: None,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn encryption(&self) -> Option<&EncryptionInfo> {
        self.encryption.as_ref()
    }

    pub fn storage(&self) -> Option<&Path> {
        self.storage.as_deref()
    }

    pub(crate) fn attach_storage(&mut self, path: PathBuf) {
        debug_assert!(self.storage.is_none(), "segment storage written twice");
        self.storage = Some(path);
    }

    pub(crate) fn take_storage(&mut self) -> Option<PathBuf> {
        self.storage.take()
    }
}

/// Segments in playlist order with unique sequence ids.
#[derive(Debug, Clone, Default)]
pub struct SegmentSet {
    segments: Vec<Segment>,
}

impl SegmentSet {
    pub fn new(segments: Vec<Segment>) -> Result<Self, DownloadError> {
        let mut seen = HashSet::with_capacity(segments.len());
        for segment in &segments {
            if !seen.insert(segment.sequence) {
                return Err(DownloadError::DuplicateSequence {
                    sequence: segment.sequence,
                });
            }
        }
        Ok(Self { segments })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Segment> {
        self.segments.iter_mut()
    }

    /// Segments ordered by ascending sequence id. The sort is stable.
    pub fn into_sorted(self) -> Vec<Segment> {
        let mut segments = self.segments;
        segments.sort_by_key(Segment::sequence);
        segments
    }
}

/// Terminal state of one segment, reported once by the worker that handled it.
#[derive(Debug)]
pub struct DownloadResult {
    pub sequence: u64,
    pub outcome: Result<PathBuf, DownloadError>,
}

impl DownloadResult {
    pub fn success(sequence: u64, path: PathBuf) -> Self {
        Self {
            sequence,
            outcome: Ok(path),
        }
    }

    pub fn failure(sequence: u64, err: DownloadError) -> Self {
        Self {
            sequence,
            outcome: Err(err),
        }
    }
}
