//! The storage backend contract.
//!
//! The overlay only ever talks to a [`Backend`] in encrypted names and
//! encrypted bytes. Content access comes back as a [`BackendLink`] exposing
//! up to three access modes; the overlay picks the best one available.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncSeek};
use url::Url;

use super::path::EncryptedPath;
use crate::fs::size::PhysicalRange;
use crate::fs::streaming::ByteStream;

/// Errors reported by a backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Not found: '{path}'")]
    NotFound { path: String },

    #[error("Already exists: '{path}'")]
    AlreadyExists { path: String },

    #[error("Operation not supported: {operation}")]
    NotSupported { operation: String },

    #[error("IO error for '{path}': {source}")]
    Io {
        #[source]
        source: io::Error,
        path: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Resource already closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Wrap an IO error, turning `NotFound` and `AlreadyExists` kinds into
    /// their dedicated variants.
    pub fn io(source: io::Error, path: impl fmt::Display) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => BackendError::NotFound { path: path.to_string() },
            io::ErrorKind::AlreadyExists => BackendError::AlreadyExists { path: path.to_string() },
            _ => BackendError::Io {
                source,
                path: path.to_string(),
            },
        }
    }

    pub fn not_found(path: impl fmt::Display) -> Self {
        BackendError::NotFound { path: path.to_string() }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            BackendError::NotFound { .. } => true,
            BackendError::HttpStatus { status, .. } => *status == 404,
            BackendError::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<BackendError> for io::Error {
    fn from(err: BackendError) -> Self {
        let kind = match &err {
            BackendError::NotFound { .. } => io::ErrorKind::NotFound,
            BackendError::AlreadyExists { .. } => io::ErrorKind::AlreadyExists,
            BackendError::NotSupported { .. } => io::ErrorKind::Unsupported,
            BackendError::Io { source, .. } => source.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// A directory entry or object as the backend reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEntry {
    pub name: String,
    pub is_dir: bool,
    /// Physical size in bytes. Zero for directories.
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
    /// Thumbnail the backend already provides.
    pub thumbnail: Option<Url>,
}

impl BackendEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size,
            modified: None,
            created: None,
            thumbnail: None,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            is_dir: true,
            ..Self::file(name, 0)
        }
    }
}

/// A file being stored.
pub struct Upload {
    pub name: String,
    /// Exact number of bytes `content` will yield.
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub mimetype: String,
    /// The size is only known as a declaration; do not buffer to verify it.
    pub force_stream: bool,
    pub content: ByteStream,
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("modified", &self.modified)
            .field("mimetype", &self.mimetype)
            .field("force_stream", &self.force_stream)
            .finish_non_exhaustive()
    }
}

/// A seekable handle over the physical object.
pub trait SeekableRead: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> SeekableRead for T {}

/// Serves arbitrary byte ranges of one physical object.
#[async_trait]
pub trait RangeRead: Send + Sync {
    async fn range_read(&self, range: PhysicalRange) -> Result<ByteStream, BackendError>;

    /// Release what the reader holds. Called at most once, by the overlay link
    /// that owns the reader.
    async fn close(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Access to the physical content of one object.
///
/// At least one of the three modes should be present. The overlay prefers
/// the handle, then the range reader, then the URL.
#[derive(Default)]
pub struct BackendLink {
    pub handle: Option<Box<dyn SeekableRead>>,
    pub range_reader: Option<Arc<dyn RangeRead>>,
    pub url: Option<Url>,
    /// Physical size of the object.
    pub total_size: u64,
}

impl BackendLink {
    pub fn has_access_mode(&self) -> bool {
        self.handle.is_some() || self.range_reader.is_some() || self.url.is_some()
    }
}

impl fmt::Debug for BackendLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendLink")
            .field("handle", &self.handle.is_some())
            .field("range_reader", &self.range_reader.is_some())
            .field("url", &self.url)
            .field("total_size", &self.total_size)
            .finish()
    }
}

/// Storage the overlay sits on.
///
/// Paths are absolute in the backend namespace. Directory arguments named
/// `dst_dir` must already exist.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list(&self, dir: &EncryptedPath) -> Result<Vec<BackendEntry>, BackendError>;

    async fn get(&self, path: &EncryptedPath) -> Result<BackendEntry, BackendError>;

    async fn link(&self, path: &EncryptedPath) -> Result<BackendLink, BackendError>;

    async fn put(&self, dst_dir: &EncryptedPath, upload: Upload) -> Result<(), BackendError>;

    async fn make_dir(&self, path: &EncryptedPath) -> Result<(), BackendError>;

    async fn move_entry(&self, src: &EncryptedPath, dst_dir: &EncryptedPath) -> Result<(), BackendError>;

    async fn rename(&self, src: &EncryptedPath, new_name: &str) -> Result<(), BackendError>;

    async fn copy(&self, src: &EncryptedPath, dst_dir: &EncryptedPath) -> Result<(), BackendError>;

    async fn remove(&self, path: &EncryptedPath) -> Result<(), BackendError>;
}
