//! `layerbox tag` command: create a tag that refers to an existing image.

use std::path::Path;

use clap::Args;
use layerbox_runtime::{ImageReference, LayerStore};

#[derive(Args)]
pub struct ImageTagArgs {
    /// Source image reference or layer id
    pub source: String,

    /// Target image reference (new tag)
    pub target: String,
}

pub async fn execute(args: ImageTagArgs, root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let driver = super::open_driver(root)?;
    let target = tag_image(driver.store(), &args.source, &args.target)?;
    println!("{}", target);
    Ok(())
}

/// Point `target` at the image `source` names. Returns the normalized
/// target reference.
pub(crate) fn tag_image(
    store: &LayerStore,
    source: &str,
    target: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let id = if store.contains(source) {
        source.to_string()
    } else {
        let reference = ImageReference::parse(source)?;
        store
            .resolve(&reference.full_reference())
            .ok_or_else(|| format!("Image not found: {}", source))?
    };

    let target = ImageReference::parse(target)?.full_reference();
    store.tag(&target, &id)?;
    Ok(target)
}
