//! `layerbox images` command.

use std::path::Path;

use clap::Args;
use layerbox_runtime::{ImageReference, LayerStore};

use crate::output;

#[derive(Args)]
pub struct ImagesArgs {
    /// Only show image ids (one per line)
    #[arg(short, long)]
    pub quiet: bool,

    /// Show full image ids
    #[arg(long)]
    pub no_trunc: bool,
}

pub async fn execute(args: ImagesArgs, root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let driver = super::open_driver(root)?;
    let rows = image_rows(driver.store())?;

    if args.quiet {
        for row in &rows {
            println!("{}", row.id);
        }
        return Ok(());
    }

    let mut table = output::new_table(&["REPOSITORY", "TAG", "IMAGE ID", "SIZE", "CREATED"]);
    for row in &rows {
        let id = if args.no_trunc {
            row.id.clone()
        } else {
            output::short_id(&row.id)
        };
        table.add_row(vec![
            row.repository.clone(),
            row.tag.clone(),
            id,
            output::format_bytes(row.size),
            row.created.clone(),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Display fields for one tag.
#[derive(Debug)]
pub(crate) struct ImageRow {
    pub repository: String,
    pub tag: String,
    pub id: String,
    /// Sum of all layers in the lineage
    pub size: u64,
    pub created: String,
}

pub(crate) fn image_rows(store: &LayerStore) -> Result<Vec<ImageRow>, Box<dyn std::error::Error>> {
    let mut rows = Vec::new();
    for (reference, id) in store.tags() {
        let (repository, tag) = match ImageReference::parse(&reference) {
            Ok(r) => (
                format!("{}/{}", r.registry, r.repository),
                r.tag.unwrap_or_else(|| "<none>".to_string()),
            ),
            Err(_) => (reference.clone(), "<none>".to_string()),
        };

        let (size, created) = match store.lineage(&id) {
            Ok(lineage) => (
                lineage.iter().map(|l| l.size).sum::<u64>(),
                lineage
                    .last()
                    .map(|l| output::format_ago(&l.created_at))
                    .unwrap_or_default(),
            ),
            Err(e) => {
                tracing::warn!(reference = %reference, error = %e, "Tagged image is incomplete");
                (0, "<missing>".to_string())
            }
        };

        rows.push(ImageRow {
            repository,
            tag,
            id,
            size,
            created,
        });
    }
    Ok(rows)
}
