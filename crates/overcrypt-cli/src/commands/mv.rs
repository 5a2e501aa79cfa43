use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use overcrypt_core::{Overlay, VirtualPath};

#[derive(ClapArgs)]
pub struct Args {
    /// Source path
    pub source: String,

    /// Directory to move the source into
    pub dest_dir: String,
}

#[instrument(level = "info", name = "cmd::mv", skip_all, fields(source = %args.source, dest_dir = %args.dest_dir))]
pub async fn execute(overlay: &Overlay, args: &Args) -> Result<()> {
    let source = VirtualPath::new(&args.source);
    let dest_dir = VirtualPath::new(&args.dest_dir);
    let entry = overlay
        .get(&source)
        .await
        .with_context(|| format!("Failed to look up {source}"))?;
    overlay
        .move_entry(&entry, &dest_dir)
        .await
        .with_context(|| format!("Failed to move {source} to {dest_dir}"))?;
    Ok(())
}
