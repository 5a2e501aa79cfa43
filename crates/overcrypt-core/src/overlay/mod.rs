//! The plaintext overlay: paths, configuration, the backend contract and the
//! operations tying them together.

pub mod backend;
pub mod config;
pub mod link;
pub mod operations;
pub mod path;
pub mod thumbnail;
pub mod translate;

pub use backend::{Backend, BackendEntry, BackendError, BackendLink, RangeRead, SeekableRead, Upload};
pub use config::{ConfigError, OverlayConfig};
pub use link::{HttpRangeOpener, LinkReader, OverlayLink, RangeReadCloser, UrlOpener};
pub use operations::{
    ListedEntry, Overlay, OverlayContext, OverlayError, OverlaySettings, PlainUpload, ROOT_NAME,
    UPLOAD_MIMETYPE,
};
pub use path::{EncryptedPath, PathGuess, VirtualPath, guess_path};
pub use thumbnail::{HmacSigner, ThumbnailSigner};
pub use translate::NameTranslator;
