//! Init-config command - write a new overlay configuration.
//!
//! The password comes from the global `--password` flag or
//! `OVERCRYPT_PASSWORD`; it is written in obscured form.

use std::path::Path;

use anyhow::{Result, bail};
use clap::Args as ClapArgs;
use tracing::instrument;

use overcrypt_core::error::ConfigError;
use overcrypt_core::{NameEncoding, NameEncryptionMode, OverlayConfig};

use crate::config;

#[derive(ClapArgs)]
pub struct Args {
    /// Backend prefix all encrypted data lives under
    #[arg(long, default_value = "/")]
    pub remote_path: String,

    /// Optional second password
    #[arg(long, env = "OVERCRYPT_SALT", hide_env_values = true)]
    pub salt: Option<String>,

    /// How file names are encrypted (off, standard, obfuscate)
    #[arg(long, default_value_t = NameEncryptionMode::Off)]
    pub filename_encryption: NameEncryptionMode,

    /// Encoding of encrypted names (base64, base32, base32768)
    #[arg(long, default_value_t = NameEncoding::Base64)]
    pub filename_encoding: NameEncoding,

    /// Encrypt directory names as well as file names
    #[arg(long)]
    pub directory_name_encryption: bool,

    /// Store file content unencrypted
    #[arg(long)]
    pub no_encrypted_file: bool,

    /// Overwrite an existing config
    #[arg(long)]
    pub force: bool,
}

#[instrument(level = "info", name = "cmd::init_config", skip_all, fields(path = %path.display()))]
pub fn execute(path: &Path, password: Option<&str>, args: &Args) -> Result<()> {
    let password = password.filter(|p| !p.is_empty()).ok_or(ConfigError::MissingPassword)?;
    if path.exists() && !args.force {
        bail!("Config already exists: {} (use --force to overwrite)", path.display());
    }

    let mut overlay_config = OverlayConfig {
        remote_path: args.remote_path.clone(),
        salt: args.salt.clone().unwrap_or_default(),
        filename_encryption: args.filename_encryption,
        filename_encoding: args.filename_encoding,
        directory_name_encryption: args.directory_name_encryption,
        no_encrypted_file: args.no_encrypted_file,
        ..OverlayConfig::new(password)
    };
    overlay_config.obfuscate_secrets();
    config::save(path, &overlay_config)?;

    println!("Wrote config to {}", path.display());
    Ok(())
}
