//! A backend rooted in a local directory.
//!
//! Content links expose a seekable file handle.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::TryStreamExt;
use rand::RngCore;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, trace, warn};

use crate::fs::streaming::ByteStream;
use crate::overlay::backend::{Backend, BackendEntry, BackendError, BackendLink, Upload};
use crate::overlay::path::EncryptedPath;

const TEMP_PREFIX: &str = ".overcrypt-upload-";
const TEMP_SUFFIX: &str = ".partial";
const TEMP_RANDOM_LEN: usize = 16;

/// Name of an in-flight upload file.
fn temp_name(random: &[u8; TEMP_RANDOM_LEN / 2]) -> String {
    format!("{TEMP_PREFIX}{}{TEMP_SUFFIX}", hex::encode(random))
}

/// Whether `name` has the exact shape produced by [`temp_name`]. Such files
/// are never listed; every other name is.
fn is_temp_name(name: &str) -> bool {
    name.strip_prefix(TEMP_PREFIX)
        .and_then(|rest| rest.strip_suffix(TEMP_SUFFIX))
        .is_some_and(|random| {
            random.len() == TEMP_RANDOM_LEN
                && random.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        })
}

#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &EncryptedPath) -> PathBuf {
        path.as_relative_path().to_path(&self.root)
    }

    async fn ensure_absent(&self, path: &Path, display: &EncryptedPath) -> Result<(), BackendError> {
        match fs::try_exists(path).await {
            Ok(false) => Ok(()),
            Ok(true) => Err(BackendError::AlreadyExists {
                path: display.to_string(),
            }),
            Err(e) => Err(BackendError::io(e, display)),
        }
    }
}

fn entry_from_metadata(name: String, metadata: &Metadata) -> BackendEntry {
    BackendEntry {
        name,
        is_dir: metadata.is_dir(),
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        modified: metadata.modified().ok(),
        created: metadata.created().ok(),
        thumbnail: None,
    }
}

/// Removes a partially written file unless disarmed.
struct TempFileGuard {
    path: Option<PathBuf>,
}

impl TempFileGuard {
    fn disarm(&mut self) {
        self.path = None;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take()
            && let Err(e) = std::fs::remove_file(&path)
        {
            warn!(temp_path = %path.display(), error = %e, "Failed to remove temp file");
        }
    }
}

async fn write_stream(file: &mut File, mut content: ByteStream) -> std::io::Result<u64> {
    let mut written = 0u64;
    while let Some(chunk) = content.try_next().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

async fn copy_dir(src: PathBuf, dst: PathBuf) -> std::io::Result<()> {
    let mut pending = vec![(src, dst)];
    while let Some((from, to)) = pending.pop() {
        fs::create_dir(&to).await?;
        let mut reader = fs::read_dir(&from).await?;
        while let Some(item) = reader.next_entry().await? {
            let target = to.join(item.file_name());
            if item.file_type().await?.is_dir() {
                pending.push((item.path(), target));
            } else {
                fs::copy(item.path(), target).await?;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Backend for LocalBackend {
    #[instrument(level = "trace", skip(self), fields(dir = %dir))]
    async fn list(&self, dir: &EncryptedPath) -> Result<Vec<BackendEntry>, BackendError> {
        let mut reader = fs::read_dir(self.resolve(dir))
            .await
            .map_err(|e| BackendError::io(e, dir))?;

        let mut entries = Vec::new();
        while let Some(item) = reader.next_entry().await.map_err(|e| BackendError::io(e, dir))? {
            let Ok(name) = item.file_name().into_string() else {
                debug!(path = %item.path().display(), "Skipping non UTF-8 name");
                continue;
            };
            if is_temp_name(&name) {
                continue;
            }
            let metadata = item.metadata().await.map_err(|e| BackendError::io(e, dir))?;
            entries.push(entry_from_metadata(name, &metadata));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        trace!(count = entries.len(), "Listed local directory");
        Ok(entries)
    }

    async fn get(&self, path: &EncryptedPath) -> Result<BackendEntry, BackendError> {
        let metadata = fs::metadata(self.resolve(path))
            .await
            .map_err(|e| BackendError::io(e, path))?;
        let name = path.file_name().unwrap_or_default().to_string();
        Ok(entry_from_metadata(name, &metadata))
    }

    async fn link(&self, path: &EncryptedPath) -> Result<BackendLink, BackendError> {
        let file = File::open(self.resolve(path))
            .await
            .map_err(|e| BackendError::io(e, path))?;
        let metadata = file.metadata().await.map_err(|e| BackendError::io(e, path))?;
        if metadata.is_dir() {
            return Err(BackendError::NotSupported {
                operation: format!("link to directory {path}"),
            });
        }
        Ok(BackendLink {
            handle: Some(Box::new(file)),
            total_size: metadata.len(),
            ..BackendLink::default()
        })
    }

    #[instrument(level = "debug", skip(self, upload), fields(dst_dir = %dst_dir, name = %upload.name, size = upload.size))]
    async fn put(&self, dst_dir: &EncryptedPath, upload: Upload) -> Result<(), BackendError> {
        let dir = self.resolve(dst_dir);
        let dest_display = dst_dir.join(&upload.name);

        let mut random = [0u8; TEMP_RANDOM_LEN / 2];
        rand::rng().fill_bytes(&mut random);
        let temp_path = dir.join(temp_name(&random));

        let mut file = File::create(&temp_path)
            .await
            .map_err(|e| BackendError::io(e, dst_dir))?;
        let mut guard = TempFileGuard {
            path: Some(temp_path.clone()),
        };

        let written = write_stream(&mut file, upload.content)
            .await
            .map_err(|e| BackendError::io(e, &dest_display))?;
        if written != upload.size {
            return Err(BackendError::Other(format!(
                "upload of {dest_display} declared {} bytes but produced {written}",
                upload.size
            )));
        }
        file.sync_all().await.map_err(|e| BackendError::io(e, &dest_display))?;

        if let Some(modified) = upload.modified {
            let std_file = file.into_std().await;
            if let Err(e) = std_file.set_modified(modified) {
                debug!(error = %e, "Could not set modification time");
            }
        }

        fs::rename(&temp_path, dir.join(&upload.name))
            .await
            .map_err(|e| BackendError::io(e, &dest_display))?;
        guard.disarm();
        debug!(bytes = written, "Stored file");
        Ok(())
    }

    async fn make_dir(&self, path: &EncryptedPath) -> Result<(), BackendError> {
        fs::create_dir_all(self.resolve(path))
            .await
            .map_err(|e| BackendError::io(e, path))
    }

    async fn move_entry(&self, src: &EncryptedPath, dst_dir: &EncryptedPath) -> Result<(), BackendError> {
        let name = src.file_name().ok_or_else(|| BackendError::NotSupported {
            operation: "move of the root".to_string(),
        })?;
        let target = dst_dir.join(name);
        let target_path = self.resolve(&target);
        self.ensure_absent(&target_path, &target).await?;
        fs::rename(self.resolve(src), target_path)
            .await
            .map_err(|e| BackendError::io(e, src))
    }

    async fn rename(&self, src: &EncryptedPath, new_name: &str) -> Result<(), BackendError> {
        let parent = src.parent().ok_or_else(|| BackendError::NotSupported {
            operation: "rename of the root".to_string(),
        })?;
        let target = parent.join(new_name);
        let target_path = self.resolve(&target);
        self.ensure_absent(&target_path, &target).await?;
        fs::rename(self.resolve(src), target_path)
            .await
            .map_err(|e| BackendError::io(e, src))
    }

    async fn copy(&self, src: &EncryptedPath, dst_dir: &EncryptedPath) -> Result<(), BackendError> {
        let name = src.file_name().ok_or_else(|| BackendError::NotSupported {
            operation: "copy of the root".to_string(),
        })?;
        let target = dst_dir.join(name);
        let target_path = self.resolve(&target);
        self.ensure_absent(&target_path, &target).await?;

        let src_path = self.resolve(src);
        let metadata = fs::metadata(&src_path).await.map_err(|e| BackendError::io(e, src))?;
        if metadata.is_dir() {
            copy_dir(src_path, target_path).await.map_err(|e| BackendError::io(e, src))
        } else {
            fs::copy(src_path, target_path)
                .await
                .map(|_| ())
                .map_err(|e| BackendError::io(e, src))
        }
    }

    async fn remove(&self, path: &EncryptedPath) -> Result<(), BackendError> {
        if path.is_root() {
            return Err(BackendError::NotSupported {
                operation: "removal of the root".to_string(),
            });
        }
        let target = self.resolve(path);
        let metadata = fs::metadata(&target).await.map_err(|e| BackendError::io(e, path))?;
        let result = if metadata.is_dir() {
            fs::remove_dir_all(target).await
        } else {
            fs::remove_file(target).await
        };
        result.map_err(|e| BackendError::io(e, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::{StreamExt, stream};
    use tempfile::TempDir;

    fn upload(name: &str, data: &'static [u8]) -> Upload {
        Upload {
            name: name.to_string(),
            size: data.len() as u64,
            modified: None,
            mimetype: "application/octet-stream".to_string(),
            force_stream: true,
            content: stream::iter(vec![Ok(Bytes::from_static(data))]).boxed(),
        }
    }

    #[tokio::test]
    async fn test_put_then_list() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path());
        backend.make_dir(&EncryptedPath::new("/docs")).await.unwrap();
        backend.put(&EncryptedPath::new("/docs"), upload("a.bin", b"hello")).await.unwrap();

        let entries = backend.list(&EncryptedPath::new("/docs")).await.unwrap();
        assert_eq!(entries, vec![BackendEntry {
            modified: entries[0].modified,
            created: entries[0].created,
            ..BackendEntry::file("a.bin", 5)
        }]);
        assert_eq!(std::fs::read(temp.path().join("docs/a.bin")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_put_size_mismatch_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path());
        let mut bad = upload("a.bin", b"hello");
        bad.size = 99;
        assert!(backend.put(&EncryptedPath::root(), bad).await.is_err());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_path_is_not_found() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path());
        let err = backend.get(&EncryptedPath::new("/nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rename_refuses_to_overwrite() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path());
        backend.put(&EncryptedPath::root(), upload("a", b"1")).await.unwrap();
        backend.put(&EncryptedPath::root(), upload("b", b"2")).await.unwrap();
        let err = backend.rename(&EncryptedPath::new("/a"), "b").await.unwrap_err();
        assert!(matches!(err, BackendError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_copy_directory_recursively() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path());
        backend.make_dir(&EncryptedPath::new("/src/inner")).await.unwrap();
        backend.make_dir(&EncryptedPath::new("/dst")).await.unwrap();
        backend.put(&EncryptedPath::new("/src/inner"), upload("f", b"data")).await.unwrap();

        backend.copy(&EncryptedPath::new("/src"), &EncryptedPath::new("/dst")).await.unwrap();
        assert_eq!(std::fs::read(temp.path().join("dst/src/inner/f")).unwrap(), b"data");
        assert!(temp.path().join("src/inner/f").exists());
    }

    #[tokio::test]
    async fn test_list_shows_names_resembling_temp_files() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path());
        for name in [".tmp_notes", ".overcrypt-upload-notes.partial", ".tmp_0123456789abcdef"] {
            backend.put(&EncryptedPath::root(), upload(name, b"x")).await.unwrap();
        }
        let in_flight = temp_name(&[0xab; TEMP_RANDOM_LEN / 2]);
        std::fs::write(temp.path().join(&in_flight), b"partial").unwrap();

        let names: Vec<_> = backend
            .list(&EncryptedPath::root())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![".overcrypt-upload-notes.partial", ".tmp_0123456789abcdef", ".tmp_notes"]);
    }

    #[test]
    fn test_temp_name_shape() {
        let name = temp_name(&[0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]);
        assert_eq!(name, ".overcrypt-upload-0123456789abcdef.partial");
        assert!(is_temp_name(&name));
        assert!(!is_temp_name(".overcrypt-upload-0123456789ABCDEF.partial"));
        assert!(!is_temp_name(".overcrypt-upload-0123456789abcde.partial"));
        assert!(!is_temp_name(".overcrypt-upload-0123456789abcdef"));
    }
}
