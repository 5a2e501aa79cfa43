//! The 68-byte per-file header.
//!
//! Layout: `nonce (12) || AES-GCM(master content key, 0xFF * 8 || content key (32)) || tag (16)`.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};
use zeroize::Zeroizing;

use crate::crypto::keys::CipherKeys;

use super::size::{HEADER_NONCE_SIZE, HEADER_SIZE};

const RESERVED: [u8; 8] = [0xFF; 8];
const PAYLOAD_SIZE: usize = RESERVED.len() + 32;

/// Errors from sealing or opening a file header.
#[derive(Error, Debug)]
pub enum HeaderError {
    /// **[INTEGRITY VIOLATION]** The header tag did not verify: wrong password,
    /// foreign file, or tampering.
    #[error("Failed to decrypt file header: invalid authentication tag - possible tampering or wrong key")]
    DecryptionFailed,

    #[error("Invalid file header: {reason}")]
    Invalid { reason: String },

    #[error("Failed to encrypt file header: {reason}")]
    EncryptionFailed { reason: String },
}

/// Per-file key material carried in the header.
pub struct FileHeader {
    pub nonce: [u8; HEADER_NONCE_SIZE],
    pub content_key: Zeroizing<[u8; 32]>,
}

impl std::fmt::Debug for FileHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHeader")
            .field("nonce", &hex::encode(self.nonce))
            .finish_non_exhaustive()
    }
}

impl FileHeader {
    /// Fresh random nonce and content key for a new file.
    pub fn generate() -> Self {
        let mut nonce = [0u8; HEADER_NONCE_SIZE];
        let mut content_key = Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(&mut nonce);
        rand::rng().fill_bytes(&mut *content_key);
        Self { nonce, content_key }
    }

    /// Seal the header under the master content key.
    pub fn encrypt(&self, keys: &CipherKeys) -> Result<[u8; HEADER_SIZE], HeaderError> {
        let mut payload = Zeroizing::new(Vec::with_capacity(PAYLOAD_SIZE));
        payload.extend_from_slice(&RESERVED);
        payload.extend_from_slice(&*self.content_key);

        let ciphertext = keys.with_content_key(|master| {
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(master));
            cipher
                .encrypt(Nonce::from_slice(&self.nonce), payload.as_slice())
                .map_err(|e| HeaderError::EncryptionFailed { reason: e.to_string() })
        })?;

        let mut header = [0u8; HEADER_SIZE];
        header[..HEADER_NONCE_SIZE].copy_from_slice(&self.nonce);
        header[HEADER_NONCE_SIZE..].copy_from_slice(&ciphertext);
        Ok(header)
    }

    /// Open a header read from the start of an encrypted file.
    #[instrument(level = "debug", skip(encrypted_header, keys), fields(header_size = encrypted_header.len()))]
    pub fn decrypt(encrypted_header: &[u8], keys: &CipherKeys) -> Result<Self, HeaderError> {
        trace!("Decrypting file header");

        if encrypted_header.len() != HEADER_SIZE {
            warn!(actual_size = encrypted_header.len(), "Invalid header size");
            return Err(HeaderError::Invalid {
                reason: format!("expected {HEADER_SIZE} bytes, got {} bytes", encrypted_header.len()),
            });
        }

        let mut nonce = [0u8; HEADER_NONCE_SIZE];
        nonce.copy_from_slice(&encrypted_header[..HEADER_NONCE_SIZE]);

        let decrypted = keys.with_content_key(|master| {
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(master));
            cipher
                .decrypt(Nonce::from_slice(&nonce), &encrypted_header[HEADER_NONCE_SIZE..])
                .map_err(|_| {
                    warn!("Header decryption failed - authentication tag mismatch");
                    HeaderError::DecryptionFailed
                })
        })?;
        let decrypted = Zeroizing::new(decrypted);

        if decrypted.len() != PAYLOAD_SIZE {
            return Err(HeaderError::Invalid {
                reason: format!("decrypted payload is {} bytes, expected {PAYLOAD_SIZE}", decrypted.len()),
            });
        }

        // Reserved bytes are not validated.
        if decrypted[..RESERVED.len()] != RESERVED {
            debug!(reserved_bytes = %hex::encode(&decrypted[..RESERVED.len()]), "Header has non-standard reserved bytes");
        }

        let mut content_key = Zeroizing::new([0u8; 32]);
        content_key.copy_from_slice(&decrypted[RESERVED.len()..]);

        Ok(Self { nonce, content_key })
    }
}
