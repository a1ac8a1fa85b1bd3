//! Applying layer archives onto a root filesystem.

use std::fs::File;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use layerbox_core::error::{BuildError, Result};
use tar::Archive;

use super::layer::{OPAQUE_WHITEOUT, WHITEOUT_PREFIX};

/// Extract a tar.gz layer into `target_dir`, honoring whiteouts.
///
/// A `.wh.<name>` entry deletes `<name>` from the lower layers; a
/// `.wh..wh..opq` entry empties its directory before the rest of the layer
/// lands.
pub fn apply_layer(layer_path: &Path, target_dir: &Path) -> Result<()> {
    if !layer_path.exists() {
        return Err(BuildError::NotFound(format!(
            "layer archive {}",
            layer_path.display()
        )));
    }

    std::fs::create_dir_all(target_dir).map_err(|e| {
        BuildError::RuntimeUnavailable(format!(
            "Failed to create target directory {}: {}",
            target_dir.display(),
            e
        ))
    })?;

    let file = File::open(layer_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);

    let entries = archive.entries().map_err(|e| corrupt(layer_path, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| corrupt(layer_path, e))?;
        let path = entry.path().map_err(|e| corrupt(layer_path, e))?.into_owned();

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if file_name == OPAQUE_WHITEOUT {
            let dir = safe_join(target_dir, path.parent().unwrap_or(Path::new("")))?;
            clear_dir(&dir)?;
            continue;
        }

        if let Some(hidden) = file_name.strip_prefix(WHITEOUT_PREFIX) {
            let victim = safe_join(target_dir, &path.with_file_name(hidden))?;
            remove_path(&victim)?;
            continue;
        }

        // unpack_in refuses entries that escape target_dir
        let unpacked = entry
            .unpack_in(target_dir)
            .map_err(|e| corrupt(layer_path, e))?;
        if !unpacked {
            tracing::warn!(
                layer = %layer_path.display(),
                entry = %path.display(),
                "Skipped layer entry outside the root filesystem"
            );
        }
    }

    tracing::debug!(
        layer = %layer_path.display(),
        target = %target_dir.display(),
        "Applied layer"
    );

    Ok(())
}

fn corrupt(layer_path: &Path, e: std::io::Error) -> BuildError {
    BuildError::TransferFailed(format!(
        "Corrupt layer archive {}: {}",
        layer_path.display(),
        e
    ))
}

/// Join a whiteout path onto `root`. Every directory on the way must be a
/// real directory, so a whiteout never reaches through a symlink.
fn safe_join(root: &Path, relative: &Path) -> Result<PathBuf> {
    let mut joined = root.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                let is_last = components.peek().is_none();
                let through_link = std::fs::symlink_metadata(&joined)
                    .map(|meta| meta.file_type().is_symlink())
                    .unwrap_or(false);
                if through_link && !is_last {
                    return Err(BuildError::TransferFailed(format!(
                        "whiteout path {} passes through a symlink",
                        relative.display()
                    )));
                }
            }
            Component::CurDir => {}
            _ => {
                return Err(BuildError::TransferFailed(format!(
                    "whiteout path {} escapes the root filesystem",
                    relative.display()
                )))
            }
        }
    }
    Ok(joined)
}

fn remove_path(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path)?,
        Ok(_) => std::fs::remove_file(path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn clear_dir(dir: &Path) -> Result<()> {
    match std::fs::symlink_metadata(dir) {
        Ok(meta) if meta.is_dir() => {}
        _ => return Ok(()),
    }
    for entry in std::fs::read_dir(dir)? {
        remove_path(&entry?.path())?;
    }
    Ok(())
}
