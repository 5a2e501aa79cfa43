//! Loading and saving the overlay configuration file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use overcrypt_core::OverlayConfig;
use tracing::{debug, info};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "overcrypt.toml";

/// Read the configuration at `path`.
///
/// Plaintext secrets are obscured and the file is rewritten, so a password
/// typed into the file by hand only stays readable until the first run.
pub fn load(path: &Path) -> Result<OverlayConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let mut config: OverlayConfig =
        toml::from_str(&text).with_context(|| format!("Invalid config: {}", path.display()))?;

    if config.obfuscate_secrets() {
        save(path, &config)?;
        info!(path = %path.display(), "Obscured plaintext secrets in config");
    }
    debug!(?config, "Loaded config");
    Ok(config)
}

/// Write `config` to `path` as TOML.
pub fn save(path: &Path, config: &OverlayConfig) -> Result<()> {
    let text = toml::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(path, text).with_context(|| format!("Failed to write config: {}", path.display()))
}
