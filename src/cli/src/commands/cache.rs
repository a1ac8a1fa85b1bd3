//! `layerbox cache` commands: list and prune build cache entries.

use std::path::Path;

use clap::{Args, Subcommand};
use layerbox_runtime::{BuildCache, LayerStore};

use crate::output;

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand)]
pub enum CacheCommand {
    /// List cache entries
    Ls {
        /// Don't truncate output
        #[arg(long)]
        no_trunc: bool,
    },
    /// Remove entries whose image no longer exists
    Prune {
        /// Remove every entry
        #[arg(long)]
        all: bool,
    },
}

pub async fn execute(args: CacheArgs, root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let cache = super::open_cache(root)?;

    match args.command {
        CacheCommand::Ls { no_trunc } => {
            let mut table =
                output::new_table(&["FINGERPRINT", "IMAGE ID", "CREATED BY", "CACHED"]);
            for entry in cache.entries()? {
                let (fingerprint, image_id, created_by) = if no_trunc {
                    (entry.fingerprint, entry.image_id, entry.created_by)
                } else {
                    (
                        output::short_id(&entry.fingerprint),
                        output::short_id(&entry.image_id),
                        output::truncate_str(&entry.created_by, 48),
                    )
                };
                table.add_row(vec![
                    fingerprint,
                    image_id,
                    created_by,
                    output::format_ago_unix(entry.cached_at),
                ]);
            }
            println!("{table}");
        }
        CacheCommand::Prune { all } => {
            let driver = super::open_driver(root)?;
            let removed = prune(&cache, driver.store(), all)?;
            println!("Removed {} cache entries", removed);
        }
    }
    Ok(())
}

/// Drop entries whose image is gone from `store` (or all of them).
pub(crate) fn prune(
    cache: &BuildCache,
    store: &LayerStore,
    all: bool,
) -> Result<usize, Box<dyn std::error::Error>> {
    let removed = cache.retain(|entry| !all && store.contains(&entry.image_id))?;
    tracing::info!(removed, "Pruned build cache");
    Ok(removed)
}
