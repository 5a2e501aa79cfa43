//! List command - list the plaintext contents of a directory.
//!
//! # Examples
//!
//! ```bash
//! # List root directory
//! overcrypt ls
//!
//! # Output as JSON for scripting
//! overcrypt ls --json /photos | jq '.entries[].name'
//! ```

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use overcrypt_core::{ListedEntry, Overlay, VirtualPath};

use super::{format_size, unix_seconds};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Directory path (default: root)
    #[arg(default_value = "/")]
    pub path: String,

    /// Show size and kind of each entry
    #[arg(short, long)]
    pub long: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// JSON output format for ls command
#[derive(Serialize)]
struct LsOutput {
    path: String,
    entries: Vec<EntryInfo>,
}

#[derive(Serialize)]
struct EntryInfo {
    name: String,
    #[serde(rename = "type")]
    entry_type: &'static str,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    modified: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail: Option<String>,
}

impl From<&ListedEntry> for EntryInfo {
    fn from(entry: &ListedEntry) -> Self {
        Self {
            name: entry.name.clone(),
            entry_type: if entry.is_dir { "directory" } else { "file" },
            size: entry.size,
            modified: unix_seconds(entry.modified),
            thumbnail: entry.thumbnail.as_ref().map(ToString::to_string),
        }
    }
}

#[instrument(level = "info", name = "cmd::ls", skip_all, fields(path = %args.path))]
pub async fn execute(overlay: &Overlay, args: &Args) -> Result<()> {
    let dir = VirtualPath::new(&args.path);
    let mut entries = overlay
        .list(&dir)
        .await
        .with_context(|| format!("Failed to list {dir}"))?;
    // Directories first, then by name.
    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));

    if args.json {
        let output = LsOutput {
            path: dir.to_string(),
            entries: entries.iter().map(EntryInfo::from).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if args.long {
        for entry in &entries {
            let kind = if entry.is_dir { "d" } else { "-" };
            let size = if entry.is_dir { String::new() } else { format_size(entry.size) };
            println!("{kind} {size:>10}  {}", display_name(entry));
        }
    } else {
        for entry in &entries {
            println!("{}", display_name(entry));
        }
    }

    Ok(())
}

fn display_name(entry: &ListedEntry) -> String {
    if entry.is_dir {
        format!("{}/", entry.name)
    } else {
        entry.name.clone()
    }
}
