use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use overcrypt_core::{Overlay, VirtualPath};

use super::{format_size, unix_seconds};

#[derive(ClapArgs)]
pub struct Args {
    /// File or directory path; a trailing `/` marks a directory
    pub path: String,
}

#[instrument(level = "info", name = "cmd::stat", skip_all, fields(path = %args.path))]
pub async fn execute(overlay: &Overlay, args: &Args) -> Result<()> {
    let path = VirtualPath::new(&args.path);
    let entry = overlay
        .get(&path)
        .await
        .with_context(|| format!("Failed to stat {path}"))?;

    println!("Name:     {}", entry.name);
    println!("Path:     {}", entry.path);
    println!("Type:     {}", if entry.is_dir { "directory" } else { "file" });
    if !entry.is_dir {
        println!("Size:     {} ({} bytes)", format_size(entry.size), entry.size);
    }
    if let Some(modified) = unix_seconds(entry.modified) {
        println!("Modified: {modified}");
    }
    Ok(())
}
