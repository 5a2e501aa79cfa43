//! Overlay configuration.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use super::path::EncryptedPath;
use crate::cipher::{AeadCipher, CipherSettings};
use crate::crypto::CryptoError;
use crate::crypto::keys::{CipherKeys, DEFAULT_SCRYPT_COST_PARAM_LOG2};
use crate::crypto::obscure;
use crate::fs::encoding::NameEncoding;
use crate::fs::name::NameEncryptionMode;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("A password is required")]
    MissingPassword,

    #[error("Invalid secret in configuration: {0}")]
    Secret(#[from] CryptoError),
}

fn default_remote_path() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

/// User-facing settings of one overlay instance.
///
/// `password`, `salt` and `thumbnail_sign_key` are stored obscured once
/// [`obfuscate_secrets`](Self::obfuscate_secrets) has run; plaintext values are
/// still accepted everywhere.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Backend prefix every encrypted path lives under.
    #[serde(default = "default_remote_path")]
    pub remote_path: String,

    #[serde(default)]
    pub password: String,

    /// Second password. Empty means the built-in default salt.
    #[serde(default)]
    pub salt: String,

    #[serde(default)]
    pub filename_encryption: NameEncryptionMode,

    /// An empty value selects `base64`.
    #[serde(default)]
    pub filename_encoding: NameEncoding,

    #[serde(default)]
    pub directory_name_encryption: bool,

    #[serde(default)]
    pub thumbnail: bool,

    #[serde(default = "default_true")]
    pub show_hidden: bool,

    /// Store content in plaintext. Names are still translated.
    #[serde(default)]
    pub no_encrypted_file: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<Url>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_sign_key: Option<String>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            remote_path: default_remote_path(),
            password: String::new(),
            salt: String::new(),
            filename_encryption: NameEncryptionMode::default(),
            filename_encoding: NameEncoding::default(),
            directory_name_encryption: false,
            thumbnail: false,
            show_hidden: true,
            no_encrypted_file: false,
            api_url: None,
            thumbnail_sign_key: None,
        }
    }
}

impl fmt::Debug for OverlayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayConfig")
            .field("remote_path", &self.remote_path)
            .field("password", &"[REDACTED]")
            .field("salt", &"[REDACTED]")
            .field("filename_encryption", &self.filename_encryption)
            .field("filename_encoding", &self.filename_encoding)
            .field("directory_name_encryption", &self.directory_name_encryption)
            .field("thumbnail", &self.thumbnail)
            .field("show_hidden", &self.show_hidden)
            .field("no_encrypted_file", &self.no_encrypted_file)
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl OverlayConfig {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            ..Self::default()
        }
    }

    /// Replace plaintext secrets with their obscured form.
    ///
    /// Values already carrying the obfuscation prefix are left alone. Returns
    /// whether anything changed, so the caller knows to persist the config.
    pub fn obfuscate_secrets(&mut self) -> bool {
        let mut changed = false;
        for secret in [&mut self.password, &mut self.salt] {
            changed |= obfuscate_in_place(secret);
        }
        if let Some(key) = self.thumbnail_sign_key.as_mut() {
            changed |= obfuscate_in_place(key);
        }
        if changed {
            debug!("Obfuscated configuration secrets");
        }
        changed
    }

    pub fn cipher_settings(&self) -> CipherSettings {
        CipherSettings {
            mode: self.filename_encryption,
            encoding: self.filename_encoding,
            directory_name_encryption: self.directory_name_encryption,
        }
    }

    pub fn remote_root(&self) -> EncryptedPath {
        EncryptedPath::new(&self.remote_path)
    }

    /// The thumbnail signing secret in plaintext, if configured.
    pub fn thumbnail_secret(&self) -> Result<Option<String>, ConfigError> {
        self.thumbnail_sign_key
            .as_deref()
            .map(obscure::deobfuscate)
            .transpose()
            .map_err(ConfigError::from)
    }

    /// Reveal the secrets and derive the cipher.
    pub fn build_cipher(&self) -> Result<AeadCipher, ConfigError> {
        self.build_cipher_with_cost(DEFAULT_SCRYPT_COST_PARAM_LOG2)
    }

    /// [`build_cipher`](Self::build_cipher) with an explicit scrypt cost.
    #[instrument(level = "debug", skip(self), fields(mode = %self.filename_encryption, encoding = %self.filename_encoding))]
    pub fn build_cipher_with_cost(&self, log2_n: u8) -> Result<AeadCipher, ConfigError> {
        let password = obscure::deobfuscate(&self.password)?;
        if password.is_empty() {
            return Err(ConfigError::MissingPassword);
        }
        let salt = obscure::deobfuscate(&self.salt)?;
        let keys = CipherKeys::derive_with_cost(&password, &salt, log2_n)?;
        Ok(AeadCipher::new(keys, self.cipher_settings()))
    }
}

fn obfuscate_in_place(value: &mut String) -> bool {
    if value.is_empty() || obscure::is_obfuscated(value) {
        return false;
    }
    *value = obscure::obfuscate(value).into_owned();
    true
}
