//! `layerbox history` command: show the layers of an image.

use std::path::Path;

use clap::Args;
use layerbox_runtime::{ImageReference, Layer, LayerStore};

use crate::output;

#[derive(Args)]
pub struct HistoryArgs {
    /// Image reference or layer id
    pub image: String,

    /// Only show layer ids
    #[arg(short, long)]
    pub quiet: bool,

    /// Don't truncate output
    #[arg(long)]
    pub no_trunc: bool,
}

pub async fn execute(args: HistoryArgs, root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let driver = super::open_driver(root)?;
    let mut layers = image_lineage(driver.store(), &args.image)?;
    layers.reverse();

    if args.quiet {
        for layer in &layers {
            println!("{}", layer.id);
        }
        return Ok(());
    }

    let mut table = output::new_table(&["IMAGE", "CREATED", "CREATED BY", "SIZE"]);
    for layer in &layers {
        let (id, created_by) = if args.no_trunc {
            (layer.id.clone(), layer.created_by.clone())
        } else {
            (
                output::short_id(&layer.id),
                output::truncate_str(&layer.created_by, 60),
            )
        };
        table.add_row(vec![
            id,
            output::format_ago(&layer.created_at),
            created_by,
            output::format_bytes(layer.size),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Lineage of `image` (a tag or a layer id), root first.
pub(crate) fn image_lineage(
    store: &LayerStore,
    image: &str,
) -> Result<Vec<Layer>, Box<dyn std::error::Error>> {
    if store.contains(image) {
        return Ok(store.lineage(image)?);
    }
    let reference = ImageReference::parse(image)?;
    let id = store
        .resolve(&reference.full_reference())
        .ok_or_else(|| format!("Image not found: {}", image))?;
    Ok(store.lineage(&id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{base_archive, open_test_driver};
    use tempfile::TempDir;

    #[test]
    fn test_image_lineage_by_tag_and_id() {
        let tmp = TempDir::new().unwrap();
        let driver = open_test_driver(&tmp);
        let layer = driver.import_archive(&base_archive(&tmp), "base").unwrap();

        let by_tag = image_lineage(driver.store(), "base:latest").unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].id, layer.id);

        let by_id = image_lineage(driver.store(), &layer.id).unwrap();
        assert_eq!(by_id[0].created_by, "IMPORT docker.io/library/base:latest");
    }

    #[test]
    fn test_image_lineage_unknown() {
        let tmp = TempDir::new().unwrap();
        let driver = open_test_driver(&tmp);
        let err = image_lineage(driver.store(), "nothing").unwrap_err();
        assert!(err.to_string().contains("Image not found"));
    }
}
