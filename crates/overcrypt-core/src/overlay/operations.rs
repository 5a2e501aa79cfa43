//! Plaintext filesystem operations over an encrypted backend.
//!
//! [`Overlay`] translates every plaintext path to its encrypted form, forwards
//! the call to the [`Backend`] and maps results back: names are decrypted,
//! sizes converted and content decrypted on demand.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, instrument, trace, warn};
use url::Url;

use super::backend::{Backend, BackendEntry, BackendError, Upload};
use super::config::{ConfigError, OverlayConfig};
use super::link::{HttpRangeOpener, LinkReader, OverlayLink, RangeReadCloser, UrlOpener};
use super::path::{EncryptedPath, VirtualPath, guess_path};
use super::thumbnail::{HmacSigner, ThumbnailSigner, thumbnail_url};
use super::translate::NameTranslator;
use crate::cipher::Cipher;
use crate::fs::name::NameError;
use crate::fs::streaming::{ByteStream, StreamingError};

/// Mimetype given to every stored object. The content is opaque to the backend.
pub const UPLOAD_MIMETYPE: &str = "application/octet-stream";

/// Name of the synthetic root entry.
pub const ROOT_NAME: &str = "Root";

/// Context for overlay operations, providing debugging information.
#[derive(Debug, Clone, Default)]
pub struct OverlayContext {
    /// The plaintext path being operated on
    pub virtual_path: Option<String>,
    /// The translated backend path
    pub encrypted_path: Option<String>,
    pub operation: Option<&'static str>,
}

impl OverlayContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_virtual_path(mut self, path: impl fmt::Display) -> Self {
        self.virtual_path = Some(path.to_string());
        self
    }

    #[must_use]
    pub fn with_encrypted_path(mut self, path: impl fmt::Display) -> Self {
        self.encrypted_path = Some(path.to_string());
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        self.operation = Some(operation);
        self
    }
}

impl fmt::Display for OverlayContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(op) = self.operation {
            parts.push(op.to_string());
        }
        if let Some(ref path) = self.virtual_path {
            parts.push(format!("path '{path}'"));
        }
        if let Some(ref enc) = self.encrypted_path {
            parts.push(format!("at '{enc}'"));
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("Path not found: '{path}'")]
    NotFound { path: String },

    #[error("Name error for {context}: {source}")]
    Name {
        #[source]
        source: NameError,
        context: OverlayContext,
    },

    #[error("Backend offers no seekable handle, range reader or URL for {context}")]
    UnsupportedAccessMode { context: OverlayContext },

    #[error("Backend error for {context}: {source}")]
    Backend {
        #[source]
        source: BackendError,
        context: OverlayContext,
    },

    #[error("Streaming error: {0}")]
    Streaming(#[from] StreamingError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl OverlayError {
    pub fn is_not_found(&self) -> bool {
        match self {
            OverlayError::NotFound { .. } => true,
            OverlayError::Backend { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    fn backend(source: BackendError, context: OverlayContext) -> Self {
        if source.is_not_found() {
            return OverlayError::NotFound {
                path: context.virtual_path.unwrap_or_default(),
            };
        }
        OverlayError::Backend { source, context }
    }
}

/// Behaviour switches of an [`Overlay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlaySettings {
    /// List entries whose plaintext name starts with `.`.
    pub show_hidden: bool,
    /// Attach thumbnail URLs to listed files.
    pub thumbnail: bool,
    /// Encrypt file content. When off, content is stored and served as is.
    pub encrypt_content: bool,
    /// Base of thumbnail URLs.
    pub api_url: Option<Url>,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            show_hidden: true,
            thumbnail: false,
            encrypt_content: true,
            api_url: None,
        }
    }
}

impl From<&OverlayConfig> for OverlaySettings {
    fn from(config: &OverlayConfig) -> Self {
        Self {
            show_hidden: config.show_hidden,
            thumbnail: config.thumbnail,
            encrypt_content: !config.no_encrypted_file,
            api_url: config.api_url.clone(),
        }
    }
}

/// A file or directory in the plaintext namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub name: String,
    pub path: VirtualPath,
    pub is_dir: bool,
    /// Plaintext size; zero for directories.
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
    pub thumbnail: Option<Url>,
}

/// A plaintext file to store.
pub struct PlainUpload {
    pub name: String,
    /// Exact number of plaintext bytes `content` yields.
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub content: ByteStream,
}

impl fmt::Debug for PlainUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainUpload")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("modified", &self.modified)
            .finish_non_exhaustive()
    }
}

/// A plaintext view over an encrypted backend.
///
/// Holds no per-call state; share it across tasks behind an `Arc`.
pub struct Overlay {
    backend: Arc<dyn Backend>,
    cipher: Arc<dyn Cipher>,
    translator: NameTranslator,
    settings: OverlaySettings,
    signer: Option<Arc<dyn ThumbnailSigner>>,
    url_opener: Arc<dyn UrlOpener>,
}

impl fmt::Debug for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overlay")
            .field("cipher", &self.cipher)
            .field("remote_root", self.translator.remote_root())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Overlay {
    pub fn new(
        backend: Arc<dyn Backend>,
        cipher: Arc<dyn Cipher>,
        remote_root: EncryptedPath,
        settings: OverlaySettings,
    ) -> Self {
        Self {
            backend,
            translator: NameTranslator::new(Arc::clone(&cipher), remote_root),
            cipher,
            settings,
            signer: None,
            url_opener: Arc::new(HttpRangeOpener::new()),
        }
    }

    /// Build an overlay from configuration, deriving the cipher.
    pub fn from_config(config: &OverlayConfig, backend: Arc<dyn Backend>) -> Result<Self, OverlayError> {
        let cipher = config.build_cipher()?;
        let overlay = Self::new(backend, Arc::new(cipher), config.remote_root(), OverlaySettings::from(config));
        Ok(match config.thumbnail_secret()? {
            Some(secret) => overlay.with_thumbnail_signer(Arc::new(HmacSigner::new(secret.as_bytes()))),
            None => overlay,
        })
    }

    #[must_use]
    pub fn with_thumbnail_signer(mut self, signer: Arc<dyn ThumbnailSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Replace how download URLs are turned into range readers.
    #[must_use]
    pub fn with_url_opener(mut self, opener: Arc<dyn UrlOpener>) -> Self {
        self.url_opener = opener;
        self
    }

    pub fn settings(&self) -> &OverlaySettings {
        &self.settings
    }

    pub fn translator(&self) -> &NameTranslator {
        &self.translator
    }

    fn translate(&self, path: &VirtualPath, is_folder: bool, operation: &'static str) -> Result<EncryptedPath, OverlayError> {
        self.translator.translate(path, is_folder).map_err(|source| OverlayError::Name {
            source,
            context: OverlayContext::new().with_operation(operation).with_virtual_path(path),
        })
    }

    fn plaintext_size(&self, entry: &BackendEntry, path: &dyn fmt::Display) -> u64 {
        if entry.is_dir {
            return 0;
        }
        if !self.settings.encrypt_content {
            return entry.size;
        }
        self.cipher.decrypted_size(entry.size).unwrap_or_else(|e| {
            warn!(path = %path, error = %e, "Size mapping failed, using stored size");
            entry.size
        })
    }

    fn decrypt_entry_name(&self, entry: &BackendEntry) -> Result<String, NameError> {
        if entry.is_dir {
            self.translator.decrypt_dir_name(&entry.name)
        } else {
            self.translator.decrypt_file_name(&entry.name)
        }
    }

    /// List a directory.
    ///
    /// Entries whose names do not decrypt are left out, as are hidden entries
    /// when `show_hidden` is off.
    #[instrument(level = "debug", skip(self), fields(dir = %dir))]
    pub async fn list(&self, dir: &VirtualPath) -> Result<Vec<ListedEntry>, OverlayError> {
        let remote = self.translate(dir, true, "list")?;
        let entries = self.backend.list(&remote).await.map_err(|source| {
            OverlayError::backend(
                source,
                OverlayContext::new()
                    .with_operation("list")
                    .with_virtual_path(dir)
                    .with_encrypted_path(&remote),
            )
        })?;

        let mut result = Vec::with_capacity(entries.len());
        let mut dropped = 0usize;
        for entry in entries {
            let name = match self.decrypt_entry_name(&entry) {
                Ok(name) => name,
                Err(e) => {
                    debug!(encrypted_name = %entry.name, error = %e, "Skipping entry with undecryptable name");
                    dropped += 1;
                    continue;
                }
            };
            if !self.settings.show_hidden && name.starts_with('.') {
                trace!(name = %name, "Skipping hidden entry");
                continue;
            }

            let path = dir.join(&name);
            let size = self.plaintext_size(&entry, &path);
            let thumbnail = if entry.is_dir {
                None
            } else {
                entry.thumbnail.clone().or_else(|| self.generated_thumbnail(dir, &name))
            };
            result.push(ListedEntry {
                path: if entry.is_dir { path.into_folder() } else { path },
                name,
                is_dir: entry.is_dir,
                size,
                modified: entry.modified,
                created: entry.created,
                thumbnail,
            });
        }

        if dropped > 0 {
            warn!(dir = %dir, dropped, "Dropped entries with undecryptable names");
        }
        debug!(count = result.len(), "Listed directory");
        Ok(result)
    }

    fn generated_thumbnail(&self, dir: &VirtualPath, name: &str) -> Option<Url> {
        if !self.settings.thumbnail {
            return None;
        }
        let Some(api_url) = self.settings.api_url.as_ref() else {
            trace!("No API URL configured, skipping thumbnail");
            return None;
        };
        thumbnail_url(api_url, dir, name, self.signer.as_deref())
    }

    /// Look up a single entry.
    ///
    /// Whether the path names a file or a folder is guessed from its shape;
    /// when the guess misses, the other interpretation is tried once.
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub async fn get(&self, path: &VirtualPath) -> Result<ListedEntry, OverlayError> {
        if path.is_root() {
            return Ok(ListedEntry {
                name: ROOT_NAME.to_string(),
                path: VirtualPath::root(),
                is_dir: true,
                size: 0,
                modified: None,
                created: None,
                thumbnail: None,
            });
        }

        let guess = guess_path(path);
        let first = self.translate(path, guess.is_folder, "get")?;
        let entry = match self.backend.get(&first).await {
            Ok(entry) => entry,
            Err(e) if e.is_not_found() && guess.retry => {
                debug!(first_is_folder = guess.is_folder, "First interpretation missed, retrying");
                let second = self.translate(path, !guess.is_folder, "get")?;
                self.backend.get(&second).await.map_err(|source| {
                    OverlayError::backend(
                        source,
                        OverlayContext::new()
                            .with_operation("get")
                            .with_virtual_path(path)
                            .with_encrypted_path(&second),
                    )
                })?
            }
            Err(source) => {
                return Err(OverlayError::backend(
                    source,
                    OverlayContext::new()
                        .with_operation("get")
                        .with_virtual_path(path)
                        .with_encrypted_path(&first),
                ));
            }
        };

        let name = self.decrypt_entry_name(&entry).unwrap_or_else(|e| {
            warn!(path = %path, error = %e, "Name decryption failed, using stored name");
            entry.name.clone()
        });
        let size = self.plaintext_size(&entry, path);
        let path = if entry.is_dir { path.clone().into_folder() } else { path.clone() };

        Ok(ListedEntry {
            name,
            path,
            is_dir: entry.is_dir,
            size,
            modified: entry.modified,
            created: entry.created,
            thumbnail: None,
        })
    }

    /// Content access for a file.
    ///
    /// With content encryption off the backend link is handed back untouched.
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub async fn link(&self, path: &VirtualPath) -> Result<OverlayLink, OverlayError> {
        let remote = self.translate(path, false, "link")?;
        let context = OverlayContext::new()
            .with_operation("link")
            .with_virtual_path(path)
            .with_encrypted_path(&remote);

        let link = self
            .backend
            .link(&remote)
            .await
            .map_err(|source| OverlayError::backend(source, context.clone()))?;
        if !self.settings.encrypt_content {
            return Ok(OverlayLink::Passthrough(link));
        }

        let total_size = link.total_size;
        let reader = LinkReader::from_backend_link(link, Arc::clone(&self.url_opener))
            .ok_or_else(|| OverlayError::UnsupportedAccessMode { context: context.clone() })?;
        let size = self.cipher.decrypted_size(total_size).unwrap_or_else(|e| {
            warn!(path = %path, error = %e, "Size mapping failed, using stored size");
            total_size
        });

        Ok(OverlayLink::Decrypted(RangeReadCloser::decrypting(
            reader,
            Arc::clone(&self.cipher),
            size,
            context,
        )))
    }

    /// A plaintext range reader for a file, whatever the link kind.
    pub async fn open_reader(&self, path: &VirtualPath) -> Result<RangeReadCloser, OverlayError> {
        let link = self.link(path).await?;
        let context = OverlayContext::new().with_operation("open_reader").with_virtual_path(path);
        link.into_reader(Arc::clone(&self.url_opener), context)
    }

    /// Store a file in `dst_dir`.
    #[instrument(level = "debug", skip(self, upload), fields(dst_dir = %dst_dir, name = %upload.name, size = upload.size))]
    pub async fn put(&self, dst_dir: &VirtualPath, upload: PlainUpload) -> Result<(), OverlayError> {
        let remote_dir = self.translate(dst_dir, true, "put")?;
        let name = self.translator.encrypt_file_name(&upload.name).map_err(|source| OverlayError::Name {
            source,
            context: OverlayContext::new()
                .with_operation("put")
                .with_virtual_path(dst_dir.join(&upload.name)),
        })?;

        let (size, content) = if self.settings.encrypt_content {
            (self.cipher.encrypted_size(upload.size), self.cipher.encrypt_stream(upload.content))
        } else {
            (upload.size, upload.content)
        };
        trace!(encrypted_name = %name, stored_size = size, "Uploading");

        let context = OverlayContext::new()
            .with_operation("put")
            .with_virtual_path(dst_dir.join(&upload.name))
            .with_encrypted_path(remote_dir.join(&name));
        self.backend
            .put(
                &remote_dir,
                Upload {
                    name,
                    size,
                    modified: upload.modified,
                    mimetype: UPLOAD_MIMETYPE.to_string(),
                    force_stream: true,
                    content,
                },
            )
            .await
            .map_err(|source| OverlayError::backend(source, context))
    }

    /// Create directory `name` inside `parent`.
    #[instrument(level = "debug", skip(self), fields(parent = %parent))]
    pub async fn make_dir(&self, parent: &VirtualPath, name: &str) -> Result<(), OverlayError> {
        let context = OverlayContext::new()
            .with_operation("make_dir")
            .with_virtual_path(parent.join(name));
        let remote_parent = self.translate(parent, true, "make_dir")?;
        let encrypted = self
            .translator
            .encrypt_dir_name(name)
            .map_err(|source| OverlayError::Name { source, context: context.clone() })?;
        let remote = remote_parent.join(&encrypted);
        self.backend
            .make_dir(&remote)
            .await
            .map_err(|source| OverlayError::backend(source, context.with_encrypted_path(&remote)))
    }

    /// Move `src` into `dst_dir`.
    #[instrument(level = "debug", skip(self, src), fields(src = %src.path, dst_dir = %dst_dir))]
    pub async fn move_entry(&self, src: &ListedEntry, dst_dir: &VirtualPath) -> Result<(), OverlayError> {
        let remote_src = self.translate(&src.path, src.is_dir, "move")?;
        let remote_dst = self.translate(dst_dir, true, "move")?;
        self.backend.move_entry(&remote_src, &remote_dst).await.map_err(|source| {
            OverlayError::backend(
                source,
                OverlayContext::new()
                    .with_operation("move")
                    .with_virtual_path(&src.path)
                    .with_encrypted_path(&remote_src),
            )
        })
    }

    /// Rename `src` in place.
    #[instrument(level = "debug", skip(self, src), fields(src = %src.path, new_name = %new_name))]
    pub async fn rename(&self, src: &ListedEntry, new_name: &str) -> Result<(), OverlayError> {
        let context = OverlayContext::new().with_operation("rename").with_virtual_path(&src.path);
        let remote = self.translate(&src.path, src.is_dir, "rename")?;
        let encrypted = if src.is_dir {
            self.translator.encrypt_dir_name(new_name)
        } else {
            self.translator.encrypt_file_name(new_name)
        }
        .map_err(|source| OverlayError::Name { source, context: context.clone() })?;

        self.backend
            .rename(&remote, &encrypted)
            .await
            .map_err(|source| OverlayError::backend(source, context.with_encrypted_path(&remote)))
    }

    /// Copy `src` into `dst_dir`.
    #[instrument(level = "debug", skip(self, src), fields(src = %src.path, dst_dir = %dst_dir))]
    pub async fn copy(&self, src: &ListedEntry, dst_dir: &VirtualPath) -> Result<(), OverlayError> {
        let remote_src = self.translate(&src.path, src.is_dir, "copy")?;
        let remote_dst = self.translate(dst_dir, true, "copy")?;
        self.backend.copy(&remote_src, &remote_dst).await.map_err(|source| {
            OverlayError::backend(
                source,
                OverlayContext::new()
                    .with_operation("copy")
                    .with_virtual_path(&src.path)
                    .with_encrypted_path(&remote_src),
            )
        })
    }

    /// Delete an entry; directories go with their contents.
    #[instrument(level = "debug", skip(self, entry), fields(path = %entry.path))]
    pub async fn remove(&self, entry: &ListedEntry) -> Result<(), OverlayError> {
        let remote = self.translate(&entry.path, entry.is_dir, "remove")?;
        self.backend.remove(&remote).await.map_err(|source| {
            OverlayError::backend(
                source,
                OverlayContext::new()
                    .with_operation("remove")
                    .with_virtual_path(&entry.path)
                    .with_encrypted_path(&remote),
            )
        })
    }
}
