use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::{debug, instrument};

use overcrypt_core::{Overlay, VirtualPath};

#[derive(ClapArgs)]
pub struct Args {
    /// Path to remove; directories are removed with their contents
    pub path: String,

    /// Ignore nonexistent paths
    #[arg(short, long)]
    pub force: bool,
}

#[instrument(level = "info", name = "cmd::rm", skip_all, fields(path = %args.path, force = args.force))]
pub async fn execute(overlay: &Overlay, args: &Args) -> Result<()> {
    let path = VirtualPath::new(&args.path);
    let entry = match overlay.get(&path).await {
        Ok(entry) => entry,
        Err(e) if args.force && e.is_not_found() => {
            debug!("Nothing to remove");
            return Ok(());
        }
        Err(e) => return Err(anyhow::Error::new(e).context(format!("Failed to look up {path}"))),
    };
    overlay
        .remove(&entry)
        .await
        .with_context(|| format!("Failed to remove {path}"))?;
    Ok(())
}
