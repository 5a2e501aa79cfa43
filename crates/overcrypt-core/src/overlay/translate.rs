//! Plaintext path to backend path translation.

use std::sync::Arc;

use tracing::trace;

use super::path::{EncryptedPath, VirtualPath};
use crate::cipher::Cipher;
use crate::fs::name::{split_extension, NameError};

/// Maps names and paths between the plaintext and encrypted namespaces.
///
/// File names keep their extension in cleartext: only the part before the
/// last `.` goes through the cipher. Directory segments are handled whole.
#[derive(Debug, Clone)]
pub struct NameTranslator {
    cipher: Arc<dyn Cipher>,
    remote_root: EncryptedPath,
}

impl NameTranslator {
    pub fn new(cipher: Arc<dyn Cipher>, remote_root: EncryptedPath) -> Self {
        Self { cipher, remote_root }
    }

    pub fn remote_root(&self) -> &EncryptedPath {
        &self.remote_root
    }

    pub fn encrypt_file_name(&self, name: &str) -> Result<String, NameError> {
        let (base, ext) = split_extension(name);
        let encrypted = self.cipher.encrypt_file_name(base)?;
        Ok(format!("{encrypted}{ext}"))
    }

    pub fn decrypt_file_name(&self, name: &str) -> Result<String, NameError> {
        let (base, ext) = split_extension(name);
        let decrypted = self.cipher.decrypt_file_name(base)?;
        Ok(format!("{decrypted}{ext}"))
    }

    pub fn encrypt_dir_name(&self, name: &str) -> Result<String, NameError> {
        self.cipher.encrypt_dir_name(name)
    }

    pub fn decrypt_dir_name(&self, name: &str) -> Result<String, NameError> {
        self.cipher.decrypt_dir_name(name)
    }

    /// Translate a full plaintext path.
    ///
    /// Every segment but the last is a directory. The last one is encrypted
    /// as a directory when `is_folder`, otherwise as a file name.
    pub fn translate(&self, path: &VirtualPath, is_folder: bool) -> Result<EncryptedPath, NameError> {
        let mut result = self.remote_root.clone();
        let Some(leaf) = path.file_name() else {
            return Ok(result);
        };
        if let Some(parent) = path.parent() {
            for segment in parent.components() {
                result = result.join(&self.encrypt_dir_name(segment)?);
            }
        }
        let leaf = if is_folder {
            self.encrypt_dir_name(leaf)?
        } else {
            self.encrypt_file_name(leaf)?
        };
        let result = result.join(&leaf);
        trace!(virtual_path = %path, encrypted_path = %result, is_folder, "Translated path");
        Ok(result)
    }
}
