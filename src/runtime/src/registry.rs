//! Directory-backed registry for base images.
//!
//! Serves `<root>/<registry>/<repository>/<tag>.tar.gz`, which is what a
//! mirrored or air-gapped set of base images looks like on disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use layerbox_core::error::{BuildError, Result};

use crate::driver::RegistrySource;
use crate::image::ImageReference;

pub struct ArchiveRegistry {
    root: PathBuf,
}

impl ArchiveRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where the archive for `reference` is expected.
    pub fn archive_path(&self, reference: &ImageReference) -> PathBuf {
        self.root
            .join(reference.registry.replace(':', "_"))
            .join(&reference.repository)
            .join(format!("{}.tar.gz", reference.version_key()))
    }
}

#[async_trait]
impl RegistrySource for ArchiveRegistry {
    async fn pull(&self, reference: &ImageReference, dest_dir: &Path) -> Result<PathBuf> {
        if !tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(BuildError::NetworkError(format!(
                "registry at {} is unreachable",
                self.root.display()
            )));
        }

        let source = self.archive_path(reference);
        if !tokio::fs::metadata(&source)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            return Err(BuildError::NotFound(format!("image {}", reference)));
        }

        let dest = dest_dir.join(format!("pull-{}.tar.gz", uuid::Uuid::new_v4().simple()));
        tokio::fs::copy(&source, &dest).await.map_err(|e| {
            BuildError::NetworkError(format!("Failed to download {}: {}", reference, e))
        })?;

        tracing::debug!(reference = %reference, source = %source.display(), "Pulled image archive");
        Ok(dest)
    }
}
