#![allow(dead_code)]

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use overcrypt_core::backend::{LinkMode, MemoryBackend};
use overcrypt_core::cipher::{AeadCipher, CipherSettings};
use overcrypt_core::crypto::keys::{CipherKeys, DERIVED_KEY_LEN};
use overcrypt_core::fs::{ByteStream, NameEncoding, NameEncryptionMode, PhysicalOpener, PhysicalRange};
use overcrypt_core::overlay::{Backend, EncryptedPath, Overlay, OverlaySettings, PlainUpload};

pub const TEST_PASSWORD: &str = "test-password-12345";

/// Route log events to the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic key material; real keys come from scrypt.
pub fn test_keys() -> CipherKeys {
    let mut material = [0u8; DERIVED_KEY_LEN];
    for (i, b) in material.iter_mut().enumerate() {
        *b = (i as u8).wrapping_mul(7).wrapping_add(3);
    }
    CipherKeys::from_bytes(&material)
}

pub fn test_cipher(mode: NameEncryptionMode, encoding: NameEncoding, directory_name_encryption: bool) -> AeadCipher {
    AeadCipher::new(
        test_keys(),
        CipherSettings {
            mode,
            encoding,
            directory_name_encryption,
        },
    )
}

pub fn standard_cipher() -> Arc<AeadCipher> {
    Arc::new(test_cipher(NameEncryptionMode::Standard, NameEncoding::Base64, true))
}

/// Content of exactly `size` bytes with a recognizable pattern.
pub fn create_sized_content(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Deliver `data` in pieces of `piece` bytes.
pub fn byte_stream(data: &[u8], piece: usize) -> ByteStream {
    let pieces: Vec<io::Result<Bytes>> = data
        .chunks(piece.max(1))
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(pieces).boxed()
}

pub async fn collect(stream: ByteStream) -> io::Result<Vec<u8>> {
    stream
        .try_fold(Vec::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await
}

pub fn plain_upload(name: &str, data: &[u8]) -> PlainUpload {
    PlainUpload {
        name: name.to_string(),
        size: data.len() as u64,
        modified: None,
        content: byte_stream(data, 1000),
    }
}

/// Overlay over a fresh memory backend rooted at `/remote`.
pub async fn memory_overlay(mode: LinkMode, settings: OverlaySettings) -> (MemoryBackend, Overlay) {
    let backend = MemoryBackend::new(mode);
    backend.make_dir(&EncryptedPath::new("/remote")).await.unwrap();
    let overlay = Overlay::new(
        Arc::new(backend.clone()),
        standard_cipher(),
        EncryptedPath::new("/remote"),
        settings,
    )
    .with_url_opener(backend.url_opener());
    (backend, overlay)
}

/// Serves physical ranges from an in-memory ciphertext and records them.
pub struct VecOpener {
    pub data: Bytes,
    pub opened: std::sync::Mutex<Vec<PhysicalRange>>,
}

impl VecOpener {
    pub fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: Bytes::from(data),
            opened: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn opened(&self) -> Vec<PhysicalRange> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl PhysicalOpener for VecOpener {
    async fn open(&self, range: PhysicalRange) -> io::Result<ByteStream> {
        self.opened.lock().unwrap().push(range);
        let start = (range.offset as usize).min(self.data.len());
        let end = range
            .length
            .map_or(self.data.len(), |len| start.saturating_add(len as usize).min(self.data.len()));
        Ok(byte_stream(&self.data[start..end], 3000))
    }
}
