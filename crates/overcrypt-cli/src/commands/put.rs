use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use bytes::BytesMut;
use clap::Args as ClapArgs;
use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::instrument;

use overcrypt_core::{ByteStream, Overlay, PlainUpload, VirtualPath};

const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(ClapArgs)]
pub struct Args {
    /// Local file to upload
    pub local: PathBuf,

    /// Destination directory
    pub dest_dir: String,

    /// Name to store the file under (default: the local file name)
    #[arg(long)]
    pub name: Option<String>,
}

#[instrument(level = "info", name = "cmd::put", skip_all, fields(local = %args.local.display(), dest_dir = %args.dest_dir))]
pub async fn execute(overlay: &Overlay, args: &Args) -> Result<()> {
    let file = File::open(&args.local)
        .await
        .with_context(|| format!("Failed to open {}", args.local.display()))?;
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        bail!("Not a regular file: {}", args.local.display());
    }

    let name = match &args.name {
        Some(name) => name.clone(),
        None => args
            .local
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .with_context(|| format!("No usable file name in {}", args.local.display()))?,
    };
    if name.is_empty() || name.contains('/') {
        bail!("Invalid file name: {name:?}");
    }

    let dest_dir = VirtualPath::new(&args.dest_dir);
    let upload = PlainUpload {
        name,
        size: metadata.len(),
        modified: metadata.modified().ok(),
        content: file_stream(file),
    };
    overlay
        .put(&dest_dir, upload)
        .await
        .with_context(|| format!("Failed to upload {} to {dest_dir}", args.local.display()))?;
    Ok(())
}

fn file_stream(file: File) -> ByteStream {
    futures::stream::try_unfold(file, |mut file| async move {
        let mut buf = BytesMut::zeroed(READ_BUFFER_SIZE);
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok::<_, io::Error>(Some((buf.freeze(), file)))
    })
    .boxed()
}
