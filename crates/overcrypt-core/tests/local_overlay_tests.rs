//! Overlay over a local directory: seekable handles and on-disk layout.

use std::sync::Arc;

use overcrypt_core::backend::LocalBackend;
use overcrypt_core::fs::{RangeRequest, encrypted_size};
use overcrypt_core::overlay::{Overlay, OverlayConfig, VirtualPath};
use overcrypt_core::{NameEncryptionMode, PlainUpload};
use tempfile::TempDir;

mod common;
use common::{TEST_PASSWORD, byte_stream, collect, create_sized_content};

fn config() -> OverlayConfig {
    let mut config = OverlayConfig::new(TEST_PASSWORD);
    config.remote_path = "/vault".to_string();
    config.filename_encryption = NameEncryptionMode::Standard;
    config.directory_name_encryption = true;
    config
}

fn setup(config: &OverlayConfig) -> (TempDir, Overlay) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    std::fs::create_dir(temp.path().join("vault")).unwrap();
    let backend = Arc::new(LocalBackend::new(temp.path()));
    let overlay = Overlay::from_config(config, backend).expect("Failed to build overlay");
    (temp, overlay)
}

#[tokio::test]
async fn test_put_and_read_through_local_files() {
    let (temp, overlay) = setup(&config());
    let content = create_sized_content(90_000);
    overlay
        .put(
            &VirtualPath::root(),
            PlainUpload {
                name: "movie.mkv".to_string(),
                size: content.len() as u64,
                modified: None,
                content: byte_stream(&content, 8192),
            },
        )
        .await
        .unwrap();

    let stored: Vec<_> = std::fs::read_dir(temp.path().join("vault"))
        .unwrap()
        .map(|e| e.unwrap())
        .collect();
    assert_eq!(stored.len(), 1);
    let stored_name = stored[0].file_name().into_string().unwrap();
    assert!(stored_name.ends_with(".mkv"));
    assert_ne!(stored_name, "movie.mkv");
    assert_eq!(stored[0].metadata().unwrap().len(), encrypted_size(90_000));

    let reader = overlay.open_reader(&VirtualPath::new("/movie.mkv")).await.unwrap();
    assert_eq!(reader.access_mode(), "seekable");
    let data = collect(reader.range_read(RangeRequest::new(32_000, 40_000)).await.unwrap())
        .await
        .unwrap();
    assert_eq!(data, &content[32_000..72_000]);
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_directories_and_listing() {
    let (temp, overlay) = setup(&config());
    overlay.make_dir(&VirtualPath::root(), "Photos").await.unwrap();
    overlay.make_dir(&VirtualPath::new("/Photos"), "2024").await.unwrap();

    let entries = overlay.list(&VirtualPath::new("/Photos")).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "2024");
    assert!(entries[0].is_dir);

    let top: Vec<_> = std::fs::read_dir(temp.path().join("vault")).unwrap().collect();
    assert_eq!(top.len(), 1);
    assert!(!temp.path().join("vault/Photos").exists());
}

#[tokio::test]
async fn test_same_password_reads_existing_store() {
    let config = config();
    let (temp, overlay) = setup(&config);
    overlay
        .put(
            &VirtualPath::root(),
            PlainUpload {
                name: "note.txt".to_string(),
                size: 5,
                modified: None,
                content: byte_stream(b"hello", 5),
            },
        )
        .await
        .unwrap();

    let mut obfuscated = config.clone();
    obfuscated.obfuscate_secrets();
    let reopened = Overlay::from_config(&obfuscated, Arc::new(LocalBackend::new(temp.path()))).unwrap();
    let entries = reopened.list(&VirtualPath::root()).await.unwrap();
    assert_eq!(entries[0].name, "note.txt");
    assert_eq!(entries[0].size, 5);
}
