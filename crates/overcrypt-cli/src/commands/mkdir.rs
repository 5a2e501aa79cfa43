use anyhow::{Context, Result, bail};
use clap::Args as ClapArgs;
use tracing::instrument;

use overcrypt_core::{Overlay, VirtualPath};

#[derive(ClapArgs)]
pub struct Args {
    /// Directory to create the new directory in
    pub parent: String,

    /// Name of the new directory
    pub name: String,
}

#[instrument(level = "info", name = "cmd::mkdir", skip_all, fields(parent = %args.parent, name = %args.name))]
pub async fn execute(overlay: &Overlay, args: &Args) -> Result<()> {
    if args.name.is_empty() || args.name.contains('/') {
        bail!("Invalid directory name: {:?}", args.name);
    }
    let parent = VirtualPath::new(&args.parent);
    overlay
        .make_dir(&parent, &args.name)
        .await
        .with_context(|| format!("Failed to create {}", parent.join(&args.name)))?;
    Ok(())
}
