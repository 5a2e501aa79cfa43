//! The cipher capability consumed by the overlay, and its default provider.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::crypto::CryptoError;
use crate::crypto::keys::CipherKeys;
use crate::fs::encoding::NameEncoding;
use crate::fs::name::{NameCipher, NameEncryptionMode, NameError};
use crate::fs::size::{self, RangeRequest, SizeError};
use crate::fs::streaming::{self, ByteStream, PhysicalOpener, StreamingError};

/// Everything the overlay needs from a cipher.
///
/// Name methods work on single segments with no extension handling; the
/// overlay splits extensions and paths itself.
#[async_trait]
pub trait Cipher: Send + Sync + fmt::Debug {
    fn encrypt_file_name(&self, name: &str) -> Result<String, NameError>;
    fn decrypt_file_name(&self, name: &str) -> Result<String, NameError>;
    fn encrypt_dir_name(&self, name: &str) -> Result<String, NameError>;
    fn decrypt_dir_name(&self, name: &str) -> Result<String, NameError>;

    fn encrypted_size(&self, plaintext_size: u64) -> u64;
    fn decrypted_size(&self, encrypted_size: u64) -> Result<u64, SizeError>;

    /// Wrap a plaintext stream into ciphertext.
    fn encrypt_stream(&self, input: ByteStream) -> ByteStream;

    /// Decrypt a logical range, pulling ciphertext through `opener`.
    async fn decrypt_range(
        &self,
        opener: Arc<dyn PhysicalOpener>,
        request: RangeRequest,
    ) -> Result<ByteStream, StreamingError>;
}

/// Name-related options of a cipher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CipherSettings {
    pub mode: NameEncryptionMode,
    pub encoding: NameEncoding,
    /// Encrypt directory segments too. Off by default: only file names change.
    pub directory_name_encryption: bool,
}

/// AES-SIV names and chunked AES-GCM content.
///
/// Immutable once built and cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct AeadCipher {
    keys: Arc<CipherKeys>,
    names: NameCipher,
    directory_name_encryption: bool,
}

impl AeadCipher {
    pub fn new(keys: CipherKeys, settings: CipherSettings) -> Self {
        let keys = Arc::new(keys);
        Self {
            names: NameCipher::new(Arc::clone(&keys), settings.mode, settings.encoding),
            keys,
            directory_name_encryption: settings.directory_name_encryption,
        }
    }

    /// Derive keys from a password and salt, then build the cipher.
    pub fn from_password(password: &str, salt: &str, settings: CipherSettings) -> Result<Self, CryptoError> {
        Ok(Self::new(CipherKeys::derive(password, salt)?, settings))
    }

    pub fn settings(&self) -> CipherSettings {
        CipherSettings {
            mode: self.names.mode(),
            encoding: self.names.encoding(),
            directory_name_encryption: self.directory_name_encryption,
        }
    }
}

#[async_trait]
impl Cipher for AeadCipher {
    fn encrypt_file_name(&self, name: &str) -> Result<String, NameError> {
        self.names.encrypt_segment(name)
    }

    fn decrypt_file_name(&self, name: &str) -> Result<String, NameError> {
        self.names.decrypt_segment(name)
    }

    fn encrypt_dir_name(&self, name: &str) -> Result<String, NameError> {
        if !self.directory_name_encryption {
            return Ok(name.to_string());
        }
        self.names.encrypt_segment(name)
    }

    fn decrypt_dir_name(&self, name: &str) -> Result<String, NameError> {
        if !self.directory_name_encryption {
            return Ok(name.to_string());
        }
        self.names.decrypt_segment(name)
    }

    fn encrypted_size(&self, plaintext_size: u64) -> u64 {
        size::encrypted_size(plaintext_size)
    }

    fn decrypted_size(&self, encrypted_size: u64) -> Result<u64, SizeError> {
        size::decrypted_size(encrypted_size)
    }

    fn encrypt_stream(&self, input: ByteStream) -> ByteStream {
        trace!("Wrapping stream for encryption");
        streaming::encrypting_stream(Arc::clone(&self.keys), input)
    }

    async fn decrypt_range(
        &self,
        opener: Arc<dyn PhysicalOpener>,
        request: RangeRequest,
    ) -> Result<ByteStream, StreamingError> {
        streaming::decrypt_range(Arc::clone(&self.keys), opener, request).await
    }
}
