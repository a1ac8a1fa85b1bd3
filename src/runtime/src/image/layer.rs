//! Layer creation utilities.
//!
//! Provides filesystem snapshotting, diffing, and tar.gz layer creation
//! for turning a container's filesystem changes into an image layer.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use layerbox_core::error::{BuildError, Result};
use sha2::{Digest, Sha256};

/// Prefix marking a deleted path inside a layer archive (OCI whiteout).
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Whiteout marking a directory whose lower-layer contents are hidden.
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Metadata for a single file in a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    /// Relative path from rootfs root
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Modification time (nanoseconds since epoch)
    pub mtime_ns: i128,
    /// Permission bits
    pub mode: u32,
    /// Whether this is a directory
    pub is_dir: bool,
    /// Whether this is a symbolic link
    pub is_symlink: bool,
}

/// A filesystem change between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Change {
    Added(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

impl Change {
    pub fn path(&self) -> &Path {
        match self {
            Change::Added(p) | Change::Modified(p) | Change::Removed(p) => p,
        }
    }
}

/// A snapshot of a directory's file state.
#[derive(Debug, Clone, Default)]
pub struct DirSnapshot {
    /// Map of relative path → file entry
    pub entries: HashMap<PathBuf, FileEntry>,
}

impl DirSnapshot {
    /// Take a snapshot of a directory, recording all files and their metadata.
    pub fn capture(root: &Path) -> Result<Self> {
        let mut entries = HashMap::new();
        walk_dir(root, root, &mut entries)?;
        Ok(DirSnapshot { entries })
    }

    /// Compute the changes from this snapshot (before) to another (after).
    ///
    /// Removals are reported only for the top-most removed path; children of
    /// a removed directory are implied. Output is sorted by path.
    pub fn diff(&self, after: &DirSnapshot) -> Vec<Change> {
        let mut changes = Vec::new();

        for (path, after_entry) in &after.entries {
            match self.entries.get(path) {
                None => changes.push(Change::Added(path.clone())),
                Some(before_entry) => {
                    if before_entry.size != after_entry.size
                        || before_entry.mtime_ns != after_entry.mtime_ns
                        || before_entry.mode != after_entry.mode
                        || before_entry.is_dir != after_entry.is_dir
                        || before_entry.is_symlink != after_entry.is_symlink
                    {
                        changes.push(Change::Modified(path.clone()));
                    }
                }
            }
        }

        for path in self.entries.keys() {
            if after.entries.contains_key(path) {
                continue;
            }
            let parent_removed = path
                .ancestors()
                .skip(1)
                .filter(|a| !a.as_os_str().is_empty())
                .any(|a| self.entries.contains_key(a) && !after.entries.contains_key(a));
            if !parent_removed {
                changes.push(Change::Removed(path.clone()));
            }
        }

        changes.sort_by(|a, b| a.path().cmp(b.path()));
        changes
    }
}

/// Recursively walk a directory and collect file entries.
fn walk_dir(root: &Path, current: &Path, entries: &mut HashMap<PathBuf, FileEntry>) -> Result<()> {
    let read_dir = std::fs::read_dir(current).map_err(|e| {
        BuildError::RuntimeUnavailable(format!(
            "Failed to read directory {}: {}",
            current.display(),
            e
        ))
    })?;

    for entry in read_dir {
        let entry = entry.map_err(|e| {
            BuildError::RuntimeUnavailable(format!("Failed to read directory entry: {}", e))
        })?;

        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .map_err(|e| {
                BuildError::RuntimeUnavailable(format!(
                    "Failed to compute relative path for {}: {}",
                    path.display(),
                    e
                ))
            })?
            .to_path_buf();

        // DirEntry::metadata does not follow symlinks
        let metadata = entry.metadata().map_err(|e| {
            BuildError::RuntimeUnavailable(format!(
                "Failed to read metadata for {}: {}",
                path.display(),
                e
            ))
        })?;

        let mtime_ns = metadata
            .modified()
            .map(|t| {
                t.duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_nanos() as i128
            })
            .unwrap_or(0);

        let is_dir = metadata.is_dir();
        entries.insert(
            relative.clone(),
            FileEntry {
                path: relative,
                size: metadata.len(),
                mtime_ns,
                mode: file_mode(&metadata),
                is_dir,
                is_symlink: metadata.file_type().is_symlink(),
            },
        );

        if is_dir {
            walk_dir(root, &path, entries)?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Information about a created layer archive.
#[derive(Debug, Clone)]
pub struct LayerInfo {
    /// Path to the layer tar.gz file
    pub path: PathBuf,
    /// SHA256 digest (hex string, without "sha256:" prefix)
    pub digest: String,
    /// Size in bytes
    pub size: u64,
}

impl LayerInfo {
    /// Get the digest with "sha256:" prefix.
    pub fn prefixed_digest(&self) -> String {
        format!("sha256:{}", self.digest)
    }
}

/// Create a tar.gz layer from a list of changes in a rootfs.
///
/// Added and modified paths are archived from `rootfs`; removed paths become
/// whiteout entries.
pub fn create_layer(rootfs: &Path, changes: &[Change], output_path: &Path) -> Result<LayerInfo> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let file = std::fs::File::create(output_path).map_err(|e| {
        BuildError::RuntimeUnavailable(format!(
            "Failed to create layer file {}: {}",
            output_path.display(),
            e
        ))
    })?;

    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for change in changes {
        match change {
            Change::Added(relative) | Change::Modified(relative) => {
                let full_path = rootfs.join(relative);
                let metadata = match std::fs::symlink_metadata(&full_path) {
                    Ok(m) => m,
                    // Vanished between snapshot and archive
                    Err(_) => continue,
                };

                let appended = if metadata.is_dir() {
                    builder.append_dir(relative, &full_path)
                } else {
                    builder.append_path_with_name(&full_path, relative)
                };
                appended.map_err(|e| {
                    BuildError::RuntimeUnavailable(format!(
                        "Failed to add {} to layer: {}",
                        relative.display(),
                        e
                    ))
                })?;
            }
            Change::Removed(relative) => {
                let name = relative
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let whiteout = match relative.parent() {
                    Some(parent) => parent.join(format!("{}{}", WHITEOUT_PREFIX, name)),
                    None => PathBuf::from(format!("{}{}", WHITEOUT_PREFIX, name)),
                };

                let mut header = tar::Header::new_gnu();
                header.set_size(0);
                header.set_mode(0o644);
                header.set_entry_type(tar::EntryType::Regular);
                builder
                    .append_data(&mut header, &whiteout, std::io::empty())
                    .map_err(|e| {
                        BuildError::RuntimeUnavailable(format!(
                            "Failed to add whiteout for {}: {}",
                            relative.display(),
                            e
                        ))
                    })?;
            }
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| BuildError::RuntimeUnavailable(format!("Failed to finalize layer: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| BuildError::RuntimeUnavailable(format!("Failed to finalize layer: {}", e)))?;

    let digest = sha256_file(output_path)?;
    let size = std::fs::metadata(output_path).map(|m| m.len()).unwrap_or(0);

    Ok(LayerInfo {
        path: output_path.to_path_buf(),
        digest,
        size,
    })
}

/// Compute SHA256 digest of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| {
        BuildError::RuntimeUnavailable(format!(
            "Failed to open file for hashing {}: {}",
            path.display(),
            e
        ))
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compute SHA256 digest of raw bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
