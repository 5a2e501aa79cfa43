use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use futures::TryStreamExt;
use tokio::io::{self, AsyncWriteExt};
use tracing::instrument;

use overcrypt_core::{Overlay, RangeReadCloser, RangeRequest, VirtualPath};

#[derive(ClapArgs)]
pub struct Args {
    /// File path
    pub file: String,

    /// First plaintext byte to output
    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    /// Number of bytes to output (default: to end of file)
    #[arg(long)]
    pub length: Option<u64>,
}

#[instrument(level = "info", name = "cmd::cat", skip_all, fields(file = %args.file, offset = args.offset, length = ?args.length))]
pub async fn execute(overlay: &Overlay, args: &Args) -> Result<()> {
    let path = VirtualPath::new(&args.file);
    let reader = overlay
        .open_reader(&path)
        .await
        .with_context(|| format!("Failed to open {path}"))?;

    let request = match args.length {
        Some(length) => RangeRequest::new(args.offset, length),
        None => RangeRequest::to_end(args.offset),
    };

    // Close even when the copy fails; report the copy error first.
    let copied = copy_to_stdout(&reader, request).await;
    let closed = reader.close().await;
    copied.with_context(|| format!("Failed to read {path}"))?;
    closed.with_context(|| format!("Failed to close {path}"))?;
    Ok(())
}

async fn copy_to_stdout(reader: &RangeReadCloser, request: RangeRequest) -> Result<()> {
    let mut stream = reader.range_read(request).await?;
    let mut stdout = io::stdout();
    while let Some(chunk) = stream.try_next().await? {
        stdout.write_all(&chunk).await?;
    }
    stdout.flush().await?;
    Ok(())
}
