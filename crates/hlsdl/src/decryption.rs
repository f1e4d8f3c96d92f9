// HLS Decryption: turns segment ciphertext into plaintext using keys resolved
// through the job's KeyCache.

use std::sync::Arc;

use aes::Aes128;
use bytes::Bytes;
use cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use tracing::trace;

use crate::DownloadError;
use crate::keys::KeyCache;
use crate::segment::{EncryptionMethod, Segment};

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// IV used when the key tag carries none: the sequence number as a
/// big-endian 128-bit integer.
pub fn sequence_iv(sequence: u64) -> [u8; 16] {
    u128::from(sequence).to_be_bytes()
}

/// AES-128-CBC decryption with PKCS#7 padding removal.
pub fn decrypt_aes128_cbc(
    data: &[u8],
    key: &[u8; 16],
    iv: &[u8; 16],
) -> Result<Vec<u8>, DownloadError> {
    let cipher = Aes128CbcDec::new_from_slices(key, iv).map_err(|e| DownloadError::Decryption {
        reason: format!("failed to initialize AES decryptor: {e}"),
    })?;

    let mut buffer = data.to_vec();
    let plain_len = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|e| DownloadError::Decryption {
            reason: format!("decryption failed: {e}"),
        })?
        .len();
    buffer.truncate(plain_len);
    Ok(buffer)
}

pub struct Decryptor {
    keys: Arc<KeyCache>,
}

impl Decryptor {
    pub fn new(keys: Arc<KeyCache>) -> Self {
        Self { keys }
    }

    pub fn key_cache(&self) -> &KeyCache {
        &self.keys
    }

    /// Decrypt one segment's bytes. Unencrypted segments pass through untouched.
    pub async fn decrypt(&self, segment: &Segment, data: Bytes) -> Result<Bytes, DownloadError> {
        let Some(info) = segment.encryption() else {
            return Ok(data);
        };

        match &info.method {
            EncryptionMethod::Aes128 => {}
            other => {
                return Err(DownloadError::UnsupportedEncryption {
                    method: other.to_string(),
                });
            }
        }

        let key_uri = info.key_uri.as_ref().ok_or_else(|| DownloadError::Decryption {
            reason: format!("segment {} has no key URI", segment.sequence()),
        })?;
        let key = self.keys.get(key_uri).await?;
        let iv = info.iv.unwrap_or_else(|| sequence_iv(segment.sequence()));

        let plain = decrypt_aes128_cbc(&data, &key, &iv)?;
        trace!(
            sequence = segment.sequence(),
            encrypted = data.len(),
            decrypted = plain.len(),
            "Segment decrypted"
        );
        Ok(Bytes::from(plain))
    }
}
