//! An in-process backend.
//!
//! Serves content through whichever access mode it is configured for, which
//! makes it the reference backend for exercising the overlay's link handling.
//! Only built for tests and under the `testing` feature.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt, stream};
use tokio::sync::{Mutex, RwLock};
use tracing::trace;
use url::Url;

use crate::fs::size::PhysicalRange;
use crate::fs::streaming::ByteStream;
use crate::overlay::backend::{Backend, BackendEntry, BackendError, BackendLink, RangeRead, Upload};
use crate::overlay::link::UrlOpener;
use crate::overlay::path::EncryptedPath;

/// Size of the pieces range reads are delivered in.
const DELIVERY_CHUNK: usize = 4096;

/// How [`MemoryBackend::link`] exposes content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkMode {
    Seekable,
    RangeRead,
    /// Download URLs under this base; open them with [`MemoryUrlOpener`].
    Url(Url),
}

#[derive(Debug, Clone)]
enum Node {
    Dir { modified: SystemTime },
    File { data: Bytes, modified: Option<SystemTime> },
}

/// What the backend saw of a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub name: String,
    pub size: u64,
    pub mimetype: String,
    pub force_stream: bool,
}

#[derive(Debug)]
struct Store {
    nodes: RwLock<BTreeMap<String, Node>>,
    link_mode: LinkMode,
    urls: Mutex<HashMap<Url, String>>,
    uploads: Mutex<Vec<UploadRecord>>,
    range_reads: AtomicUsize,
    closed_readers: AtomicUsize,
}

/// Backend keeping a directory tree in memory. Clones share the tree.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    store: Arc<Store>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(LinkMode::RangeRead)
    }
}

fn subtree_keys(nodes: &BTreeMap<String, Node>, key: &str) -> Vec<String> {
    let prefix = format!("{key}/");
    nodes
        .keys()
        .filter(|k| k.as_str() == key || (key.is_empty() && !k.is_empty()) || k.starts_with(&prefix))
        .cloned()
        .collect()
}

fn rebase(key: &str, from: &str, to: &str) -> String {
    format!("{to}{}", &key[from.len()..])
}

impl MemoryBackend {
    pub fn new(link_mode: LinkMode) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(String::new(), Node::Dir {
            modified: SystemTime::now(),
        });
        Self {
            store: Arc::new(Store {
                nodes: RwLock::new(nodes),
                link_mode,
                urls: Mutex::new(HashMap::new()),
                uploads: Mutex::new(Vec::new()),
                range_reads: AtomicUsize::new(0),
                closed_readers: AtomicUsize::new(0),
            }),
        }
    }

    /// Store raw bytes at `path`, creating parent directories.
    pub async fn insert_file(&self, path: &EncryptedPath, data: impl Into<Bytes>) {
        let mut nodes = self.store.nodes.write().await;
        let mut ancestor = path.parent();
        while let Some(dir) = ancestor {
            nodes.entry(dir.as_str().to_string()).or_insert(Node::Dir {
                modified: SystemTime::now(),
            });
            ancestor = dir.parent();
        }
        nodes.insert(path.as_str().to_string(), Node::File {
            data: data.into(),
            modified: None,
        });
    }

    /// Raw bytes stored at `path`.
    pub async fn read_file(&self, path: &EncryptedPath) -> Option<Bytes> {
        match self.store.nodes.read().await.get(path.as_str()) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Every stored path, directories included, in order.
    pub async fn paths(&self) -> Vec<String> {
        self.store
            .nodes
            .read()
            .await
            .keys()
            .filter(|k| !k.is_empty())
            .map(|k| format!("/{k}"))
            .collect()
    }

    pub async fn uploads(&self) -> Vec<UploadRecord> {
        self.store.uploads.lock().await.clone()
    }

    /// Number of range reads served so far.
    pub fn range_reads(&self) -> usize {
        self.store.range_reads.load(Ordering::SeqCst)
    }

    /// Number of range readers closed so far.
    pub fn closed_readers(&self) -> usize {
        self.store.closed_readers.load(Ordering::SeqCst)
    }

    /// A [`UrlOpener`] resolving this backend's download URLs.
    pub fn url_opener(&self) -> Arc<dyn UrlOpener> {
        Arc::new(MemoryUrlOpener {
            backend: self.clone(),
        })
    }

    fn reader(&self, data: Bytes) -> Arc<dyn RangeRead> {
        Arc::new(MemoryRangeReader {
            data,
            store: Arc::clone(&self.store),
        })
    }

    async fn file_data(&self, key: &str, display: &EncryptedPath) -> Result<Bytes, BackendError> {
        match self.store.nodes.read().await.get(key) {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(Node::Dir { .. }) => Err(BackendError::NotSupported {
                operation: format!("link to directory {display}"),
            }),
            None => Err(BackendError::not_found(display)),
        }
    }

    async fn relocate(&self, src: &EncryptedPath, dst: &EncryptedPath, keep_source: bool) -> Result<(), BackendError> {
        let mut nodes = self.store.nodes.write().await;
        if !nodes.contains_key(src.as_str()) {
            return Err(BackendError::not_found(src));
        }
        if nodes.contains_key(dst.as_str()) {
            return Err(BackendError::AlreadyExists { path: dst.to_string() });
        }
        let parent = dst.parent().unwrap_or_else(EncryptedPath::root);
        if !matches!(nodes.get(parent.as_str()), Some(Node::Dir { .. })) {
            return Err(BackendError::not_found(parent));
        }

        for key in subtree_keys(&nodes, src.as_str()) {
            let node = if keep_source {
                nodes.get(&key).cloned()
            } else {
                nodes.remove(&key)
            };
            if let Some(node) = node {
                nodes.insert(rebase(&key, src.as_str(), dst.as_str()), node);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn list(&self, dir: &EncryptedPath) -> Result<Vec<BackendEntry>, BackendError> {
        let nodes = self.store.nodes.read().await;
        match nodes.get(dir.as_str()) {
            Some(Node::Dir { .. }) => {}
            Some(Node::File { .. }) => {
                return Err(BackendError::NotSupported {
                    operation: format!("list of file {dir}"),
                });
            }
            None => return Err(BackendError::not_found(dir)),
        }

        let entries = nodes
            .iter()
            .filter(|(key, _)| !key.is_empty())
            .filter_map(|(key, node)| {
                let path = EncryptedPath::new(key);
                (path.parent().as_ref() == Some(dir)).then(|| entry(&path, node))
            })
            .collect();
        Ok(entries)
    }

    async fn get(&self, path: &EncryptedPath) -> Result<BackendEntry, BackendError> {
        self.store
            .nodes
            .read()
            .await
            .get(path.as_str())
            .map(|node| entry(path, node))
            .ok_or_else(|| BackendError::not_found(path))
    }

    async fn link(&self, path: &EncryptedPath) -> Result<BackendLink, BackendError> {
        let data = self.file_data(path.as_str(), path).await?;
        let total_size = data.len() as u64;
        let link = match &self.store.link_mode {
            LinkMode::Seekable => BackendLink {
                handle: Some(Box::new(Cursor::new(data))),
                total_size,
                ..BackendLink::default()
            },
            LinkMode::RangeRead => BackendLink {
                range_reader: Some(self.reader(data)),
                total_size,
                ..BackendLink::default()
            },
            LinkMode::Url(base) => {
                let mut urls = self.store.urls.lock().await;
                let url = base
                    .join(&format!("obj/{}", urls.len()))
                    .map_err(|e| BackendError::Other(format!("invalid download URL: {e}")))?;
                urls.insert(url.clone(), path.as_str().to_string());
                BackendLink {
                    url: Some(url),
                    total_size,
                    ..BackendLink::default()
                }
            }
        };
        Ok(link)
    }

    async fn put(&self, dst_dir: &EncryptedPath, upload: Upload) -> Result<(), BackendError> {
        let target = dst_dir.join(&upload.name);
        if !matches!(self.store.nodes.read().await.get(dst_dir.as_str()), Some(Node::Dir { .. })) {
            return Err(BackendError::not_found(dst_dir));
        }

        let data = upload
            .content
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .map_err(|e| BackendError::io(e, &target))?;
        if data.len() as u64 != upload.size {
            return Err(BackendError::Other(format!(
                "upload of {target} declared {} bytes but produced {}",
                upload.size,
                data.len()
            )));
        }

        self.store.uploads.lock().await.push(UploadRecord {
            name: upload.name.clone(),
            size: upload.size,
            mimetype: upload.mimetype,
            force_stream: upload.force_stream,
        });
        self.store.nodes.write().await.insert(target.as_str().to_string(), Node::File {
            data: data.freeze(),
            modified: upload.modified,
        });
        trace!(path = %target, "Stored file in memory");
        Ok(())
    }

    async fn make_dir(&self, path: &EncryptedPath) -> Result<(), BackendError> {
        let mut nodes = self.store.nodes.write().await;
        let mut current = Some(path.clone());
        while let Some(dir) = current {
            match nodes.get(dir.as_str()) {
                Some(Node::File { .. }) => {
                    return Err(BackendError::AlreadyExists { path: dir.to_string() });
                }
                Some(Node::Dir { .. }) => break,
                None => {
                    nodes.insert(dir.as_str().to_string(), Node::Dir {
                        modified: SystemTime::now(),
                    });
                }
            }
            current = dir.parent();
        }
        Ok(())
    }

    async fn move_entry(&self, src: &EncryptedPath, dst_dir: &EncryptedPath) -> Result<(), BackendError> {
        let name = src.file_name().ok_or_else(|| BackendError::NotSupported {
            operation: "move of the root".to_string(),
        })?;
        self.relocate(src, &dst_dir.join(name), false).await
    }

    async fn rename(&self, src: &EncryptedPath, new_name: &str) -> Result<(), BackendError> {
        let parent = src.parent().ok_or_else(|| BackendError::NotSupported {
            operation: "rename of the root".to_string(),
        })?;
        self.relocate(src, &parent.join(new_name), false).await
    }

    async fn copy(&self, src: &EncryptedPath, dst_dir: &EncryptedPath) -> Result<(), BackendError> {
        let name = src.file_name().ok_or_else(|| BackendError::NotSupported {
            operation: "copy of the root".to_string(),
        })?;
        self.relocate(src, &dst_dir.join(name), true).await
    }

    async fn remove(&self, path: &EncryptedPath) -> Result<(), BackendError> {
        if path.is_root() {
            return Err(BackendError::NotSupported {
                operation: "removal of the root".to_string(),
            });
        }
        let mut nodes = self.store.nodes.write().await;
        if !nodes.contains_key(path.as_str()) {
            return Err(BackendError::not_found(path));
        }
        for key in subtree_keys(&nodes, path.as_str()) {
            nodes.remove(&key);
        }
        Ok(())
    }
}

fn entry(path: &EncryptedPath, node: &Node) -> BackendEntry {
    let name = path.file_name().unwrap_or_default();
    match node {
        Node::Dir { modified } => BackendEntry {
            modified: Some(*modified),
            ..BackendEntry::dir(name)
        },
        Node::File { data, modified } => BackendEntry {
            modified: *modified,
            ..BackendEntry::file(name, data.len() as u64)
        },
    }
}

struct MemoryRangeReader {
    data: Bytes,
    store: Arc<Store>,
}

#[async_trait]
impl RangeRead for MemoryRangeReader {
    async fn range_read(&self, range: PhysicalRange) -> Result<ByteStream, BackendError> {
        self.store.range_reads.fetch_add(1, Ordering::SeqCst);
        let start = usize::try_from(range.offset).unwrap_or(usize::MAX).min(self.data.len());
        let end = match range.length {
            Some(len) => start.saturating_add(usize::try_from(len).unwrap_or(usize::MAX)).min(self.data.len()),
            None => self.data.len(),
        };
        let slice = self.data.slice(start..end);
        let pieces: Vec<std::io::Result<Bytes>> = (0..slice.len())
            .step_by(DELIVERY_CHUNK)
            .map(|at| Ok(slice.slice(at..(at + DELIVERY_CHUNK).min(slice.len()))))
            .collect();
        Ok(stream::iter(pieces).boxed())
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.store.closed_readers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Resolves download URLs handed out by a [`MemoryBackend`] in URL mode.
#[derive(Debug, Clone)]
pub struct MemoryUrlOpener {
    backend: MemoryBackend,
}

#[async_trait]
impl UrlOpener for MemoryUrlOpener {
    async fn open(&self, url: &Url, _total_size: u64) -> Result<Arc<dyn RangeRead>, BackendError> {
        let key = self
            .backend
            .store
            .urls
            .lock()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| BackendError::HttpStatus {
                status: 404,
                url: url.to_string(),
            })?;
        let data = self.backend.file_data(&key, &EncryptedPath::new(&key)).await?;
        Ok(self.backend.reader(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_creates_parents() {
        let backend = MemoryBackend::default();
        backend.insert_file(&EncryptedPath::new("/a/b/c"), &b"x"[..]).await;
        assert_eq!(backend.paths().await, vec!["/a", "/a/b", "/a/b/c"]);
        let listed = backend.list(&EncryptedPath::new("/a")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_dir);
    }

    #[tokio::test]
    async fn test_move_subtree() {
        let backend = MemoryBackend::default();
        backend.insert_file(&EncryptedPath::new("/a/f"), &b"1"[..]).await;
        backend.make_dir(&EncryptedPath::new("/b")).await.unwrap();
        backend.move_entry(&EncryptedPath::new("/a"), &EncryptedPath::new("/b")).await.unwrap();
        assert_eq!(backend.paths().await, vec!["/b", "/b/a", "/b/a/f"]);
    }

    #[tokio::test]
    async fn test_prefix_siblings_untouched() {
        let backend = MemoryBackend::default();
        backend.insert_file(&EncryptedPath::new("/ab"), &b"1"[..]).await;
        backend.insert_file(&EncryptedPath::new("/a"), &b"2"[..]).await;
        backend.remove(&EncryptedPath::new("/a")).await.unwrap();
        assert_eq!(backend.paths().await, vec!["/ab"]);
    }

    #[tokio::test]
    async fn test_range_reader_counts_and_slices() {
        let backend = MemoryBackend::default();
        let data: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        backend.insert_file(&EncryptedPath::new("/f"), data.clone()).await;
        let link = backend.link(&EncryptedPath::new("/f")).await.unwrap();
        let reader = link.range_reader.unwrap();

        let bytes: Vec<u8> = reader
            .range_read(PhysicalRange::new(100, Some(5000)))
            .await
            .unwrap()
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .unwrap();
        assert_eq!(bytes, &data[100..5100]);
        assert_eq!(backend.range_reads(), 1);
        reader.close().await.unwrap();
        assert_eq!(backend.closed_readers(), 1);
    }
}
