//! CLI command definitions and dispatch.

mod cache;
mod history;
mod image_tag;
mod images;
mod import;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use layerbox_runtime::{BuildCache, LocalDriver, LocalDriverOptions};

/// layerbox: inspect and maintain the local layer store and build cache.
#[derive(Parser)]
#[command(name = "layerbox", version, about)]
pub struct Cli {
    /// Store root (defaults to $LAYERBOX_HOME or ~/.layerbox)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Import a tar.gz root filesystem as a base image
    Import(import::ImportArgs),
    /// List tagged images
    Images(images::ImagesArgs),
    /// Show the layers of an image, newest first
    History(history::HistoryArgs),
    /// Create a tag that refers to an existing image
    Tag(image_tag::ImageTagArgs),
    /// Inspect or prune the build cache
    Cache(cache::CacheArgs),
}

/// Resolve the store root from `--root` or the driver defaults.
pub(crate) fn store_root(root: Option<PathBuf>) -> PathBuf {
    root.unwrap_or_else(|| LocalDriverOptions::default().root)
}

/// Open the local driver rooted at `root`.
pub(crate) fn open_driver(root: &Path) -> Result<LocalDriver, Box<dyn std::error::Error>> {
    Ok(LocalDriver::new(LocalDriverOptions::with_root(root))?)
}

/// Open the persistent build cache under `root`.
pub(crate) fn open_cache(root: &Path) -> Result<BuildCache, Box<dyn std::error::Error>> {
    Ok(BuildCache::open(&root.join("cache"))?)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let root = store_root(cli.root);
    tracing::debug!(root = %root.display(), "Using store root");

    match cli.command {
        Command::Import(args) => import::execute(args, &root).await,
        Command::Images(args) => images::execute(args, &root).await,
        Command::History(args) => history::execute(args, &root).await,
        Command::Tag(args) => image_tag::execute(args, &root).await,
        Command::Cache(args) => cache::execute(args, &root).await,
    }
}
