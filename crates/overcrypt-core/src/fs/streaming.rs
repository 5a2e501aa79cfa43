//! Streaming content encryption and random-access range decryption.
//!
//! Provides [`encrypting_stream`] for writes and [`decrypt_range`] for reads.
//! Neither buffers more than one chunk at a time.
//!
//! Each chunk is independently encrypted with AES-GCM, using the chunk number
//! and header nonce as additional authenticated data (AAD).

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use aead::Payload;
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};
use zeroize::Zeroizing;

use crate::crypto::keys::CipherKeys;

use super::header::{FileHeader, HeaderError};
use super::size::{
    CHUNK_ENCRYPTED_SIZE, CHUNK_NONCE_SIZE, CHUNK_OVERHEAD, CHUNK_PLAINTEXT_SIZE, CoveringRange,
    HEADER_NONCE_SIZE, HEADER_SIZE, PhysicalRange, RangeRequest,
};

/// A fallible stream of byte chunks, the unit of content exchange with backends.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Opens a span of the physical (encrypted) object.
///
/// Every call returns an independent stream; the decrypting reader opens the
/// header and the covering range separately.
#[async_trait]
pub trait PhysicalOpener: Send + Sync {
    async fn open(&self, range: PhysicalRange) -> io::Result<ByteStream>;
}

/// Context for streaming operations.
#[derive(Debug, Clone, Default)]
pub struct StreamingContext {
    /// Encrypted path, when known
    pub path: Option<PathBuf>,
    /// Current chunk being processed
    pub chunk_number: Option<u64>,
    /// Operation being performed
    pub operation: Option<&'static str>,
}

impl StreamingContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_chunk(mut self, chunk_number: u64) -> Self {
        self.chunk_number = Some(chunk_number);
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        self.operation = Some(operation);
        self
    }
}

impl std::fmt::Display for StreamingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();

        if let Some(op) = self.operation {
            parts.push(op.to_string());
        }
        if let Some(ref path) = self.path {
            parts.push(format!("at {:?}", path.display()));
        }
        if let Some(chunk) = self.chunk_number {
            parts.push(format!("chunk {chunk}"));
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Errors that can occur during streaming operations.
///
/// Inside a [`ByteStream`] these travel wrapped in an [`io::Error`]; use
/// [`StreamingError::from_io`] to recover them.
#[derive(Error, Debug)]
pub enum StreamingError {
    /// IO error during streaming operation
    #[error("IO error during {context}: {source}")]
    Io {
        #[source]
        source: io::Error,
        context: StreamingContext,
    },

    /// Object is too small to contain a header
    #[error("File too small for {context}: expected at least {expected} bytes, got {actual}")]
    FileTooSmall {
        expected: usize,
        actual: usize,
        context: StreamingContext,
    },

    /// Incomplete chunk encountered during read
    #[error("Incomplete chunk for {context}: expected at least {expected} bytes, got {actual}")]
    IncompleteChunk {
        chunk_number: u64,
        expected: usize,
        actual: usize,
        context: StreamingContext,
    },

    /// Chunk decryption failed (authentication tag mismatch)
    #[error("Chunk decryption failed for {context}: authentication tag mismatch")]
    ChunkDecryptionFailed {
        chunk_number: u64,
        context: StreamingContext,
    },

    /// Chunk encryption failed
    #[error("Chunk encryption failed for {context}: {reason}")]
    ChunkEncryptionFailed {
        chunk_number: u64,
        reason: String,
        context: StreamingContext,
    },

    #[error("Header error: {0}")]
    Header(#[from] HeaderError),
}

impl StreamingError {
    /// Create an IO error with context
    pub fn io_with_context(source: io::Error, context: StreamingContext) -> Self {
        StreamingError::Io { source, context }
    }

    /// Recover a streaming error carried inside an [`io::Error`].
    pub fn from_io(err: &io::Error) -> Option<&StreamingError> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<StreamingError>())
    }
}

impl From<StreamingError> for io::Error {
    fn from(err: StreamingError) -> Self {
        let kind = match &err {
            StreamingError::Io { source, .. } => source.kind(),
            StreamingError::FileTooSmall { .. } | StreamingError::IncompleteChunk { .. } => {
                io::ErrorKind::UnexpectedEof
            }
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}

fn chunk_aad(chunk_num: u64, header_nonce: &[u8; HEADER_NONCE_SIZE]) -> [u8; 8 + HEADER_NONCE_SIZE] {
    let mut aad = [0u8; 8 + HEADER_NONCE_SIZE];
    aad[..8].copy_from_slice(&chunk_num.to_be_bytes());
    aad[8..].copy_from_slice(header_nonce);
    aad
}

// ============================================================================
// Encryption
// ============================================================================

/// Wrap a plaintext stream into the encrypted file format.
///
/// The output is the header followed by one encrypted chunk per 32 KiB of
/// input (at least one). For an input of `L` bytes it is exactly
/// [`encrypted_size(L)`](super::size::encrypted_size) bytes long.
pub fn encrypting_stream(keys: Arc<CipherKeys>, input: ByteStream) -> ByteStream {
    let state = EncryptState {
        input,
        keys,
        header: FileHeader::generate(),
        buffer: Zeroizing::new(Vec::with_capacity(CHUNK_PLAINTEXT_SIZE)),
        chunks_written: 0,
        header_written: false,
        input_done: false,
        finished: false,
    };

    stream::try_unfold(state, |mut state| async move {
        Ok::<_, io::Error>(state.next_piece().await?.map(|piece| (piece, state)))
    })
    .boxed()
}

struct EncryptState {
    input: ByteStream,
    keys: Arc<CipherKeys>,
    header: FileHeader,
    buffer: Zeroizing<Vec<u8>>,
    chunks_written: u64,
    header_written: bool,
    input_done: bool,
    finished: bool,
}

impl EncryptState {
    async fn next_piece(&mut self) -> io::Result<Option<Bytes>> {
        if !self.header_written {
            self.header_written = true;
            let header = self.header.encrypt(&self.keys).map_err(StreamingError::from)?;
            trace!("Header emitted");
            return Ok(Some(Bytes::copy_from_slice(&header)));
        }
        if self.finished {
            return Ok(None);
        }

        while !self.input_done && self.buffer.len() < CHUNK_PLAINTEXT_SIZE {
            match self.input.next().await {
                Some(Ok(data)) => self.buffer.extend_from_slice(&data),
                Some(Err(e)) => return Err(e),
                None => self.input_done = true,
            }
        }

        if self.buffer.len() >= CHUNK_PLAINTEXT_SIZE {
            let rest = self.buffer.split_off(CHUNK_PLAINTEXT_SIZE);
            let chunk = Zeroizing::new(std::mem::replace(&mut *self.buffer, rest));
            return self.encrypt_chunk(&chunk).map(Some);
        }

        // Input exhausted with less than a full chunk buffered.
        self.finished = true;
        if self.buffer.is_empty() && self.chunks_written > 0 {
            debug!(chunks = self.chunks_written, "Encryption complete");
            return Ok(None);
        }
        let chunk = Zeroizing::new(std::mem::take(&mut *self.buffer));
        let piece = self.encrypt_chunk(&chunk)?;
        debug!(chunks = self.chunks_written, "Encryption complete");
        Ok(Some(piece))
    }

    fn encrypt_chunk(&mut self, plaintext: &[u8]) -> io::Result<Bytes> {
        let chunk_num = self.chunks_written;
        let mut nonce = [0u8; CHUNK_NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);

        let aad = chunk_aad(chunk_num, &self.header.nonce);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*self.header.content_key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: &aad })
            .map_err(|e| StreamingError::ChunkEncryptionFailed {
                chunk_number: chunk_num,
                reason: e.to_string(),
                context: StreamingContext::new()
                    .with_chunk(chunk_num)
                    .with_operation("encrypt_chunk"),
            })?;

        let mut out = Vec::with_capacity(CHUNK_NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);

        self.chunks_written += 1;
        trace!(chunk = chunk_num, plaintext_len = plaintext.len(), "Chunk encrypted");
        Ok(Bytes::from(out))
    }
}

// ============================================================================
// Range decryption
// ============================================================================

/// Decrypt the logical span `request` of an encrypted object.
///
/// Reads the header through `opener`, then opens only the chunk-aligned
/// physical span covering the request and yields exactly the requested
/// plaintext bytes (fewer if the file ends first). Errors in the middle of the
/// span surface as stream items; bytes already yielded stay yielded.
#[instrument(level = "debug", skip(keys, opener), fields(offset = request.offset, length = ?request.length))]
pub async fn decrypt_range(
    keys: Arc<CipherKeys>,
    opener: Arc<dyn PhysicalOpener>,
    request: RangeRequest,
) -> Result<ByteStream, StreamingError> {
    if request.is_empty() {
        trace!("Empty range requested");
        return Ok(stream::empty().boxed());
    }

    let header = read_header(&keys, opener.as_ref()).await?;
    let covering = CoveringRange::for_request(request);
    debug!(
        physical_offset = covering.physical.offset,
        physical_length = ?covering.physical.length,
        first_chunk = covering.first_chunk,
        "Opening covering range"
    );

    let input = opener.open(covering.physical).await.map_err(|e| {
        StreamingError::io_with_context(e, StreamingContext::new().with_operation("open_range"))
    })?;

    let state = DecryptState {
        input,
        header,
        buffer: Vec::with_capacity(CHUNK_ENCRYPTED_SIZE),
        chunk_number: covering.first_chunk,
        skip: covering.skip,
        remaining: request.length,
        input_done: false,
    };

    Ok(stream::try_unfold(state, |mut state| async move {
        Ok::<_, io::Error>(state.next_piece().await?.map(|piece| (piece, state)))
    })
    .boxed())
}

async fn read_header(keys: &CipherKeys, opener: &dyn PhysicalOpener) -> Result<FileHeader, StreamingError> {
    let context = StreamingContext::new().with_operation("read_header");
    let mut input = opener
        .open(PhysicalRange::header())
        .await
        .map_err(|e| StreamingError::io_with_context(e, context.clone()))?;

    let mut bytes = Vec::with_capacity(HEADER_SIZE);
    while bytes.len() < HEADER_SIZE {
        match input.next().await {
            Some(Ok(data)) => bytes.extend_from_slice(&data),
            Some(Err(e)) => return Err(StreamingError::io_with_context(e, context)),
            None => break,
        }
    }

    if bytes.len() < HEADER_SIZE {
        return Err(StreamingError::FileTooSmall {
            expected: HEADER_SIZE,
            actual: bytes.len(),
            context,
        });
    }
    bytes.truncate(HEADER_SIZE);

    Ok(FileHeader::decrypt(&bytes, keys)?)
}

struct DecryptState {
    input: ByteStream,
    header: FileHeader,
    buffer: Vec<u8>,
    chunk_number: u64,
    skip: usize,
    remaining: Option<u64>,
    input_done: bool,
}

impl DecryptState {
    async fn next_piece(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            if self.remaining == Some(0) {
                return Ok(None);
            }

            while !self.input_done && self.buffer.len() < CHUNK_ENCRYPTED_SIZE {
                match self.input.next().await {
                    Some(Ok(data)) => self.buffer.extend_from_slice(&data),
                    Some(Err(e)) => return Err(e),
                    None => self.input_done = true,
                }
            }

            if self.buffer.is_empty() {
                trace!(chunk = self.chunk_number, "End of ciphertext");
                return Ok(None);
            }

            let take = self.buffer.len().min(CHUNK_ENCRYPTED_SIZE);
            let encrypted: Vec<u8> = self.buffer.drain(..take).collect();
            let plaintext = self.decrypt_chunk(&encrypted)?;

            let start = self.skip.min(plaintext.len());
            self.skip = 0;
            let mut end = plaintext.len();
            if let Some(remaining) = self.remaining {
                end = end.min(start.saturating_add(usize::try_from(remaining).unwrap_or(usize::MAX)));
            }

            if start == end {
                continue;
            }
            if let Some(ref mut remaining) = self.remaining {
                *remaining -= (end - start) as u64;
            }
            return Ok(Some(Bytes::copy_from_slice(&plaintext[start..end])));
        }
    }

    fn decrypt_chunk(&mut self, encrypted: &[u8]) -> Result<Zeroizing<Vec<u8>>, StreamingError> {
        let chunk_num = self.chunk_number;
        let context = StreamingContext::new()
            .with_chunk(chunk_num)
            .with_operation("decrypt_chunk");

        if encrypted.len() < CHUNK_OVERHEAD {
            return Err(StreamingError::IncompleteChunk {
                chunk_number: chunk_num,
                expected: CHUNK_OVERHEAD,
                actual: encrypted.len(),
                context,
            });
        }

        let aad = chunk_aad(chunk_num, &self.header.nonce);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*self.header.content_key));
        let payload = Payload {
            msg: &encrypted[CHUNK_NONCE_SIZE..],
            aad: &aad,
        };

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&encrypted[..CHUNK_NONCE_SIZE]), payload)
            .map_err(|_| {
                warn!(chunk = chunk_num, "Chunk decryption failed - authentication tag mismatch");
                StreamingError::ChunkDecryptionFailed {
                    chunk_number: chunk_num,
                    context,
                }
            })?;

        self.chunk_number += 1;
        Ok(Zeroizing::new(plaintext))
    }
}
