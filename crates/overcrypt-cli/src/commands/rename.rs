use anyhow::{Context, Result, bail};
use clap::Args as ClapArgs;
use tracing::instrument;

use overcrypt_core::{Overlay, VirtualPath};

#[derive(ClapArgs)]
pub struct Args {
    /// Path to rename
    pub path: String,

    /// New name, without a directory
    pub new_name: String,
}

#[instrument(level = "info", name = "cmd::rename", skip_all, fields(path = %args.path, new_name = %args.new_name))]
pub async fn execute(overlay: &Overlay, args: &Args) -> Result<()> {
    if args.new_name.is_empty() || args.new_name.contains('/') {
        bail!("Invalid name: {:?} (use mv to change directories)", args.new_name);
    }
    let path = VirtualPath::new(&args.path);
    let entry = overlay
        .get(&path)
        .await
        .with_context(|| format!("Failed to look up {path}"))?;
    overlay
        .rename(&entry, &args.new_name)
        .await
        .with_context(|| format!("Failed to rename {path} to {}", args.new_name))?;
    Ok(())
}
