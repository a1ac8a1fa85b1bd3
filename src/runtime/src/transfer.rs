//! Archive transfer between callers and container filesystems.
//!
//! Streams are plain tar. Incoming archives are unpacked into a staging
//! directory first, so a corrupt stream leaves the destination untouched.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use layerbox_core::error::{BuildError, Result};

/// Symlinks followed while resolving one path before giving up.
const MAX_SYMLINKS: usize = 40;

/// Map a container path onto the host, refusing anything that leaves
/// `rootfs`.
///
/// Symlinks inside the rootfs are followed the way the container would
/// see them: absolute targets restart at `rootfs`, relative targets resolve
/// against the link's directory.
pub fn resolve_in_rootfs(rootfs: &Path, container_path: &str) -> Result<PathBuf> {
    let mut pending = VecDeque::new();
    push_components(&mut pending, Path::new(container_path), container_path)?;

    let mut resolved = rootfs.to_path_buf();
    let mut depth = 0usize;
    let mut followed = 0usize;

    while let Some(part) = pending.pop_front() {
        if part == ".." {
            if depth == 0 {
                return Err(BuildError::TransferFailed(format!(
                    "path {} escapes the container root",
                    container_path
                )));
            }
            resolved.pop();
            depth -= 1;
            continue;
        }

        let next = resolved.join(&part);
        let is_link = std::fs::symlink_metadata(&next)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            resolved = next;
            depth += 1;
            continue;
        }

        followed += 1;
        if followed > MAX_SYMLINKS {
            return Err(BuildError::TransferFailed(format!(
                "too many levels of symbolic links in {}",
                container_path
            )));
        }
        let target = std::fs::read_link(&next)?;
        if target.is_absolute() {
            resolved = rootfs.to_path_buf();
            depth = 0;
        }
        let mut expanded = VecDeque::new();
        push_components(&mut expanded, &target, container_path)?;
        while let Some(component) = expanded.pop_back() {
            pending.push_front(component);
        }
    }
    Ok(resolved)
}

fn push_components(out: &mut VecDeque<OsString>, path: &Path, original: &str) -> Result<()> {
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => out.push_back(part.to_os_string()),
            Component::ParentDir => out.push_back(OsString::from("..")),
            Component::Prefix(_) => {
                return Err(BuildError::TransferFailed(format!(
                    "path {} is not a container path",
                    original
                )))
            }
        }
    }
    Ok(())
}

/// Unpack a tar stream into `dest` inside `rootfs`.
///
/// `scratch` must be on the same filesystem as `rootfs`. The reader is
/// drained to EOF on success.
pub fn unpack_into(
    reader: impl Read,
    rootfs: &Path,
    scratch: &Path,
    dest: &str,
) -> Result<()> {
    let dest_path = resolve_in_rootfs(rootfs, dest)?;
    if let Ok(meta) = std::fs::symlink_metadata(&dest_path) {
        if !meta.is_dir() {
            return Err(BuildError::TransferFailed(format!(
                "destination {} is not a directory",
                dest
            )));
        }
    }

    let staging = tempfile::Builder::new()
        .prefix("copy-")
        .tempdir_in(scratch)
        .map_err(|e| BuildError::TransferFailed(format!("Failed to stage archive: {}", e)))?;

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive
        .unpack(staging.path())
        .map_err(|e| BuildError::TransferFailed(format!("Corrupt archive stream: {}", e)))?;

    let mut rest = archive.into_inner();
    std::io::copy(&mut rest, &mut std::io::sink())
        .map_err(|e| BuildError::TransferFailed(format!("Failed to drain archive stream: {}", e)))?;

    std::fs::create_dir_all(&dest_path).map_err(|e| {
        BuildError::TransferFailed(format!("Failed to create destination {}: {}", dest, e))
    })?;
    merge_tree(staging.path(), &dest_path)?;

    tracing::debug!(dest, "Unpacked archive into container");
    Ok(())
}

/// Move everything under `src` into `dst`, replacing files that exist.
fn merge_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        let existing = std::fs::symlink_metadata(&target).ok();

        if entry.file_type()?.is_dir() {
            match existing {
                Some(meta) if meta.is_dir() => merge_tree(&entry.path(), &target)?,
                Some(_) => {
                    std::fs::remove_file(&target)?;
                    std::fs::rename(entry.path(), &target)?;
                }
                None => std::fs::rename(entry.path(), &target)?,
            }
        } else {
            if matches!(&existing, Some(meta) if meta.is_dir()) {
                return Err(BuildError::TransferFailed(format!(
                    "cannot overwrite directory {} with a file",
                    target.display()
                )));
            }
            std::fs::rename(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Archive `src` inside `rootfs` into an anonymous temp file, rewound.
///
/// Entries are named after the last component of `src`; the root itself
/// archives as `.`.
pub fn pack_path(rootfs: &Path, src: &str) -> Result<File> {
    let path = resolve_in_rootfs(rootfs, src)?;
    let meta = std::fs::symlink_metadata(&path)
        .map_err(|_| BuildError::NotFound(format!("path {} in container", src)))?;

    let name = match path.strip_prefix(rootfs) {
        Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
        _ => PathBuf::from(path.file_name().unwrap_or_default()),
    };

    let file = tempfile::tempfile()
        .map_err(|e| BuildError::TransferFailed(format!("Failed to buffer archive: {}", e)))?;
    let mut builder = tar::Builder::new(file);
    builder.follow_symlinks(false);

    let appended = if meta.is_dir() {
        builder.append_dir_all(&name, &path)
    } else {
        builder.append_path_with_name(&path, &name)
    };
    appended.map_err(|e| BuildError::TransferFailed(format!("Failed to archive {}: {}", src, e)))?;

    let mut file = builder
        .into_inner()
        .map_err(|e| BuildError::TransferFailed(format!("Failed to archive {}: {}", src, e)))?;
    file.seek(SeekFrom::Start(0))?;
    Ok(file)
}

/// Read the first entry of a tar stream, which must be a regular file.
pub fn read_single_file(reader: impl Read) -> Result<Vec<u8>> {
    let mut archive = tar::Archive::new(reader);
    let mut entries = archive
        .entries()
        .map_err(|e| BuildError::TransferFailed(format!("Corrupt archive stream: {}", e)))?;

    let mut entry = match entries.next() {
        Some(entry) => {
            entry.map_err(|e| BuildError::TransferFailed(format!("Corrupt archive stream: {}", e)))?
        }
        None => return Err(BuildError::NotFound("archive is empty".to_string())),
    };

    if !entry.header().entry_type().is_file() {
        let path = entry
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        return Err(BuildError::TransferFailed(format!(
            "{} is not a regular file",
            path
        )));
    }

    let mut data = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut data)
        .map_err(|e| BuildError::TransferFailed(format!("Failed to read archive entry: {}", e)))?;
    Ok(data)
}
