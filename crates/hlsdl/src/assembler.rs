// Segment Assembler: writes downloaded segments to a single output stream in
// ascending sequence order, decrypting each one and releasing its transient
// file as soon as it has been appended.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use crate::DownloadError;
use crate::decryption::Decryptor;
use crate::segment::SegmentSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyReport {
    pub segments: usize,
    pub bytes_written: u64,
}

pub struct Assembler {
    decryptor: Arc<Decryptor>,
}

impl Assembler {
    pub fn new(decryptor: Arc<Decryptor>) -> Self {
        Self { decryptor }
    }

    /// Concatenate every segment of a fully downloaded set into `output`.
    ///
    /// Any error aborts assembly and leaves `output` partially written; the
    /// caller must treat it as unusable.
    pub async fn assemble(
        &self,
        segments: SegmentSet,
        output: &Path,
    ) -> Result<AssemblyReport, DownloadError> {
        let file = File::create(output)
            .await
            .map_err(|e| DownloadError::storage(output, e))?;
        let mut writer = BufWriter::new(file);

        let ordered = segments.into_sorted();
        let count = ordered.len();
        info!(segments = count, output = %output.display(), "Joining segments");

        let mut bytes_written = 0u64;
        for mut segment in ordered {
            let path = segment.take_storage().ok_or_else(|| {
                DownloadError::internal(format!(
                    "segment {} has no downloaded data",
                    segment.sequence()
                ))
            })?;

            let raw = tokio::fs::read(&path)
                .await
                .map_err(|e| DownloadError::storage(&path, e))?;
            let plain = self.decryptor.decrypt(&segment, Bytes::from(raw)).await?;

            // Appended bytes must be on disk before the only other copy goes.
            writer
                .write_all(&plain)
                .await
                .map_err(|e| DownloadError::storage(output, e))?;
            writer
                .flush()
                .await
                .map_err(|e| DownloadError::storage(output, e))?;
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| DownloadError::storage(&path, e))?;

            bytes_written += plain.len() as u64;
            debug!(sequence = segment.sequence(), size = plain.len(), "Segment appended");
        }

        Ok(AssemblyReport {
            segments: count,
            bytes_written,
        })
    }
}
