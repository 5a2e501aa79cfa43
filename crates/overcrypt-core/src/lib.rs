//! Encrypted storage overlay.
//!
//! Presents a plaintext filesystem on top of any [`Backend`] that stores
//! encrypted names and content. Names are translated segment by segment,
//! sizes are mapped arithmetically, and content is decrypted range by range
//! without downloading whole files.

pub mod backend;
pub mod cipher;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod overlay;

pub use cipher::{AeadCipher, Cipher, CipherSettings};
pub use fs::{ByteStream, NameEncoding, NameEncryptionMode, PhysicalRange, RangeRequest};
pub use overlay::{
    Backend, ListedEntry, Overlay, OverlayConfig, OverlayError, OverlayLink, OverlaySettings,
    PlainUpload, RangeReadCloser, VirtualPath,
};
