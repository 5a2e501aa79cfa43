//! Plaintext/ciphertext size mapping and range arithmetic.
//!
//! Encrypted files consist of:
//! - **Header (68 bytes)**: 12-byte nonce + 40-byte encrypted payload + 16-byte tag
//! - **Content chunks (up to 32,796 bytes each)**: 12-byte nonce + ≤32KB ciphertext + 16-byte tag
//!
//! An empty file still carries one empty chunk, so the smallest valid
//! ciphertext is 96 bytes.

use thiserror::Error;

/// Size of the file header in bytes (nonce + encrypted payload + tag).
pub const HEADER_SIZE: usize = 68;

/// Size of the header nonce in bytes.
pub const HEADER_NONCE_SIZE: usize = 12;

/// Size of the chunk nonce in bytes.
pub const CHUNK_NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Maximum plaintext size per chunk (32 KB).
pub const CHUNK_PLAINTEXT_SIZE: usize = 32768;

/// Overhead per chunk (nonce + tag).
pub const CHUNK_OVERHEAD: usize = CHUNK_NONCE_SIZE + TAG_SIZE;

/// Maximum encrypted chunk size (nonce + ciphertext + tag).
pub const CHUNK_ENCRYPTED_SIZE: usize = CHUNK_PLAINTEXT_SIZE + CHUNK_OVERHEAD;

/// Smallest valid ciphertext: header plus one empty chunk.
pub const MIN_ENCRYPTED_SIZE: u64 = (HEADER_SIZE + CHUNK_OVERHEAD) as u64;

/// Errors from mapping a physical size back to a logical one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SizeError {
    /// Too short to hold a header and one chunk.
    #[error("Encrypted size {actual} is below the minimum of {minimum} bytes")]
    TooSmall { actual: u64, minimum: u64 },

    /// The trailing chunk is shorter than a nonce plus tag, or is an empty
    /// chunk following full ones.
    #[error("Encrypted size {actual} ends in an invalid trailing chunk of {trailing} bytes")]
    InvalidTrailingChunk { actual: u64, trailing: u64 },
}

/// Calculate which chunk contains the given plaintext byte offset.
#[inline]
pub fn plaintext_to_chunk_number(offset: u64) -> u64 {
    offset / CHUNK_PLAINTEXT_SIZE as u64
}

/// Calculate the byte offset within a chunk for a given plaintext offset.
#[inline]
pub fn plaintext_to_chunk_offset(offset: u64) -> usize {
    (offset % CHUNK_PLAINTEXT_SIZE as u64) as usize
}

/// Calculate the encrypted file offset for the start of a chunk.
///
/// Saturates at `u64::MAX`, which lies past the end of any real object.
#[inline]
pub fn chunk_to_encrypted_offset(chunk_num: u64) -> u64 {
    (HEADER_SIZE as u64).saturating_add(chunk_num.saturating_mul(CHUNK_ENCRYPTED_SIZE as u64))
}

/// Ciphertext length for a plaintext of `plaintext_size` bytes.
///
/// Saturates at `u64::MAX` for plaintexts too large to encrypt.
pub fn encrypted_size(plaintext_size: u64) -> u64 {
    if plaintext_size == 0 {
        return MIN_ENCRYPTED_SIZE;
    }

    let full_chunks = plaintext_size / CHUNK_PLAINTEXT_SIZE as u64;
    let remainder = plaintext_size % CHUNK_PLAINTEXT_SIZE as u64;

    let mut size = chunk_to_encrypted_offset(full_chunks);
    if remainder > 0 {
        size = size.saturating_add(remainder + CHUNK_OVERHEAD as u64);
    }
    size
}

/// Plaintext length for a ciphertext of `encrypted_size` bytes.
///
/// Exact inverse of [`encrypted_size`] on every size it can produce.
pub fn decrypted_size(encrypted_size: u64) -> Result<u64, SizeError> {
    if encrypted_size < MIN_ENCRYPTED_SIZE {
        return Err(SizeError::TooSmall {
            actual: encrypted_size,
            minimum: MIN_ENCRYPTED_SIZE,
        });
    }

    let content_size = encrypted_size - HEADER_SIZE as u64;
    let full_chunks = content_size / CHUNK_ENCRYPTED_SIZE as u64;
    let remainder = content_size % CHUNK_ENCRYPTED_SIZE as u64;

    let mut plaintext_size = full_chunks * CHUNK_PLAINTEXT_SIZE as u64;
    if remainder > 0 {
        let overhead = CHUNK_OVERHEAD as u64;
        // An empty trailing chunk only exists for empty files.
        if remainder < overhead || (remainder == overhead && full_chunks > 0) {
            return Err(SizeError::InvalidTrailingChunk {
                actual: encrypted_size,
                trailing: remainder,
            });
        }
        plaintext_size += remainder - overhead;
    }

    Ok(plaintext_size)
}

/// A logical (plaintext) byte span. `length == None` reads to end of file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub offset: u64,
    pub length: Option<u64>,
}

impl RangeRequest {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length: Some(length) }
    }

    pub fn to_end(offset: u64) -> Self {
        Self { offset, length: None }
    }

    /// The whole file.
    pub fn full() -> Self {
        Self::to_end(0)
    }

    pub fn is_empty(&self) -> bool {
        self.length == Some(0)
    }
}

/// A physical (ciphertext) byte span. `length == None` reads to end of object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl PhysicalRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    /// The file header.
    pub fn header() -> Self {
        Self::new(0, Some(HEADER_SIZE as u64))
    }

    /// Turn a span reaching the end of an object of `total_size` bytes into an
    /// open-ended one.
    pub fn clamp_to_end(self, total_size: u64) -> Self {
        match self.length {
            Some(len) if self.offset.saturating_add(len) >= total_size => Self::new(self.offset, None),
            _ => self,
        }
    }

    /// Inclusive end offset, for HTTP `Range` headers.
    pub fn last_byte(&self) -> Option<u64> {
        self.length.map(|len| self.offset.saturating_add(len.saturating_sub(1)))
    }
}

/// The chunk-aligned physical span covering a [`RangeRequest`], plus where the
/// requested bytes begin inside the first decrypted chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoveringRange {
    pub physical: PhysicalRange,
    pub first_chunk: u64,
    pub skip: usize,
}

impl CoveringRange {
    pub fn for_request(request: RangeRequest) -> Self {
        let first_chunk = plaintext_to_chunk_number(request.offset);
        let length = request.length.map(|len| {
            let last = request.offset.saturating_add(len.max(1) - 1);
            let chunks = plaintext_to_chunk_number(last) - first_chunk + 1;
            chunks.saturating_mul(CHUNK_ENCRYPTED_SIZE as u64)
        });

        Self {
            physical: PhysicalRange::new(chunk_to_encrypted_offset(first_chunk), length),
            first_chunk,
            skip: plaintext_to_chunk_offset(request.offset),
        }
    }
}
