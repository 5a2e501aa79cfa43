//! On-backend formats: names, sizes, headers and content streams

pub mod encoding;
pub mod header;
pub mod name;
pub mod size;
pub mod streaming;

pub use encoding::NameEncoding;
pub use name::{NameCipher, NameEncryptionMode, split_extension};
pub use size::{
    CoveringRange, PhysicalRange, RangeRequest, SizeError, decrypted_size, encrypted_size,
};
pub use streaming::{ByteStream, PhysicalOpener, StreamingError};
