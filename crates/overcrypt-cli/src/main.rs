#![deny(unsafe_code)]

mod commands;
mod config;
mod exit_code;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use overcrypt_core::backend::LocalBackend;
use overcrypt_core::error::{ConfigError, CryptoError, StreamingError};
use overcrypt_core::{Overlay, OverlayError};

use crate::commands::{cat, cp, init_config, ls, mkdir, mv, put, rename, rm, stat};

/// Command-line access to an encrypted storage overlay
#[derive(Parser)]
#[command(name = "overcrypt")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Write a config with obscured secrets
    OVERCRYPT_PASSWORD=\"$SECRET\" overcrypt init-config --filename-encryption standard

    # List the plaintext view of an encrypted directory
    overcrypt --backend-root ~/encrypted ls /

    # Upload a file, then read part of it back
    overcrypt --backend-root ~/encrypted put ./report.pdf /docs
    overcrypt --backend-root ~/encrypted cat /docs/report.pdf --offset 1024 --length 256
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Overlay configuration file
    #[arg(long, env = "OVERCRYPT_CONFIG", default_value = config::DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Directory holding the encrypted data
    #[arg(long, env = "OVERCRYPT_BACKEND_ROOT", default_value = ".", global = true)]
    backend_root: PathBuf,

    /// Overlay password, overriding the one in the config
    #[arg(long, env = "OVERCRYPT_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Overlay(OverlayCommand),

    /// Write a new config file with obscured secrets
    InitConfig(init_config::Args),
}

/// Commands that open the overlay described by the config.
#[derive(Subcommand)]
enum OverlayCommand {
    /// List directory contents
    Ls(ls::Args),

    /// Show information about a file or directory
    Stat(stat::Args),

    /// Write file contents to stdout
    Cat(cat::Args),

    /// Upload a local file
    Put(put::Args),

    /// Create a directory
    Mkdir(mkdir::Args),

    /// Move a file or directory into another directory
    Mv(mv::Args),

    /// Rename a file or directory in place
    Rename(rename::Args),

    /// Copy a file or directory into another directory
    Cp(cp::Args),

    /// Remove a file or directory
    Rm(rm::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let code = categorize_error(&e);

            let args: Vec<String> = std::env::args().collect();
            let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");
            if !is_quiet {
                eprintln!("Error: {e:#}");
            }

            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    match &cli.command {
        Commands::InitConfig(args) => init_config::execute(&cli.config, cli.password.as_deref(), args),
        Commands::Overlay(command) => {
            let overlay = open_overlay(&cli)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(execute_overlay_command(&overlay, command))
        }
    }
}

async fn execute_overlay_command(overlay: &Overlay, command: &OverlayCommand) -> Result<()> {
    match command {
        OverlayCommand::Ls(args) => ls::execute(overlay, args).await,
        OverlayCommand::Stat(args) => stat::execute(overlay, args).await,
        OverlayCommand::Cat(args) => cat::execute(overlay, args).await,
        OverlayCommand::Put(args) => put::execute(overlay, args).await,
        OverlayCommand::Mkdir(args) => mkdir::execute(overlay, args).await,
        OverlayCommand::Mv(args) => mv::execute(overlay, args).await,
        OverlayCommand::Rename(args) => rename::execute(overlay, args).await,
        OverlayCommand::Cp(args) => cp::execute(overlay, args).await,
        OverlayCommand::Rm(args) => rm::execute(overlay, args).await,
    }
}

/// Load the config, apply the password override and open the overlay.
fn open_overlay(cli: &Cli) -> Result<Overlay> {
    let mut config = config::load(&cli.config)?;
    if let Some(password) = &cli.password {
        config.password.clone_from(password);
    }

    if !cli.backend_root.is_dir() {
        anyhow::bail!("Backend root is not a directory: {}", cli.backend_root.display());
    }
    let backend = Arc::new(LocalBackend::new(&cli.backend_root));
    Overlay::from_config(&config, backend).context("Failed to set up overlay")
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Categorize an error into an exit code using typed error downcasting
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(overlay_err) = cause.downcast_ref::<OverlayError>() {
            match overlay_err {
                OverlayError::NotFound { .. } => return exit_code::NOT_FOUND,
                OverlayError::Config(_) => return exit_code::CONFIG_INVALID,
                OverlayError::Streaming(streaming_err) => {
                    if let Some(code) = categorize_streaming(streaming_err) {
                        return code;
                    }
                }
                _ => {}
            }
        }

        if cause.downcast_ref::<ConfigError>().is_some()
            || cause.downcast_ref::<CryptoError>().is_some()
            || cause.downcast_ref::<toml::de::Error>().is_some()
        {
            return exit_code::CONFIG_INVALID;
        }

        if let Some(streaming_err) = cause.downcast_ref::<StreamingError>()
            && let Some(code) = categorize_streaming(streaming_err)
        {
            return code;
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            // Stream errors arrive wrapped in io::Error.
            if let Some(streaming_err) = io_err.get_ref().and_then(|inner| inner.downcast_ref::<StreamingError>())
                && let Some(code) = categorize_streaming(streaming_err)
            {
                return code;
            }
            match io_err.kind() {
                io::ErrorKind::PermissionDenied => return exit_code::PERMISSION_DENIED,
                io::ErrorKind::NotFound => return exit_code::NOT_FOUND,
                io::ErrorKind::Interrupted => return exit_code::CANCELLED,
                _ => {}
            }
        }
    }

    exit_code::GENERAL_ERROR
}

fn categorize_streaming(err: &StreamingError) -> Option<u8> {
    match err {
        StreamingError::Header(_) | StreamingError::ChunkDecryptionFailed { .. } => {
            Some(exit_code::AUTH_FAILED)
        }
        _ => None,
    }
}
