//! `layerbox import` command: seed a base image from a tar.gz.

use std::path::{Path, PathBuf};

use clap::Args;

use crate::output;

#[derive(Args)]
pub struct ImportArgs {
    /// Root filesystem archive (tar.gz)
    pub archive: PathBuf,

    /// Reference to tag the image with (e.g., base:latest)
    pub reference: String,
}

pub async fn execute(args: ImportArgs, root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let driver = super::open_driver(root)?;
    let layer = driver.import_archive(&args.archive, &args.reference)?;

    println!(
        "{} ({})",
        layer.id,
        output::format_bytes(layer.size)
    );
    Ok(())
}
