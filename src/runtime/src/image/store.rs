//! Disk-based layer store with a persistent tag index.
//!
//! Layout under the store root:
//!
//! ```text
//! layers/<id>.tar.gz   layer archive
//! layers/<id>.json     layer record
//! index.json           tag → layer id
//! ```
//!
//! Ids are used as file stems with ':' mapped to '_', so an id may not
//! contain path separators.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use layerbox_core::error::{BuildError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::chain::Layer;

/// Persistent tag index stored as JSON on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    tags: BTreeMap<String, String>,
}

/// Layer archives, layer records, and tags on local disk.
pub struct LayerStore {
    root: PathBuf,
    layers_dir: PathBuf,
    /// In-memory tag index: full reference → layer id
    tags: RwLock<BTreeMap<String, String>>,
}

impl LayerStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let layers_dir = root.join("layers");
        std::fs::create_dir_all(&layers_dir).map_err(|e| {
            BuildError::RuntimeUnavailable(format!(
                "Failed to create layer store {}: {}",
                layers_dir.display(),
                e
            ))
        })?;

        let store = Self {
            root: root.to_path_buf(),
            layers_dir,
            tags: RwLock::new(BTreeMap::new()),
        };
        store.load_index()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the archive for `id` lives (or would live).
    pub fn archive_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.layers_dir.join(format!("{}.tar.gz", file_stem(id)?)))
    }

    fn record_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.layers_dir.join(format!("{}.json", file_stem(id)?)))
    }

    /// Store `layer`, moving `archive` into the store.
    pub fn put_layer(&self, layer: &Layer, archive: &Path) -> Result<()> {
        let target = self.archive_path(&layer.id)?;
        if std::fs::rename(archive, &target).is_err() {
            // Different filesystem
            std::fs::copy(archive, &target)?;
            let _ = std::fs::remove_file(archive);
        }
        write_json_atomic(&self.layers_dir, &self.record_path(&layer.id)?, layer)?;

        tracing::debug!(id = %layer.id, size = layer.size, "Stored layer");
        Ok(())
    }

    /// Store a copy of `source` under a different id.
    pub fn alias_layer(&self, source: &Layer, new_id: &str) -> Result<Layer> {
        let from = self.archive_path(&source.id)?;
        let to = self.archive_path(new_id)?;
        if std::fs::hard_link(&from, &to).is_err() {
            std::fs::copy(&from, &to)?;
        }

        let layer = Layer {
            id: new_id.to_string(),
            ..source.clone()
        };
        write_json_atomic(&self.layers_dir, &self.record_path(new_id)?, &layer)?;
        Ok(layer)
    }

    /// Load the record for `id`.
    pub fn layer(&self, id: &str) -> Result<Option<Layer>> {
        let path = match self.record_path(id) {
            Ok(path) => path,
            Err(_) => return Ok(None),
        };
        match std::fs::read_to_string(&path) {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.record_path(id).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Delete a layer's archive and record. Missing layers are ignored.
    pub fn remove_layer(&self, id: &str) -> Result<()> {
        for path in [self.archive_path(id)?, self.record_path(id)?] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!(id, "Removed layer");
        Ok(())
    }

    /// All stored layer records, oldest first.
    pub fn list_layers(&self) -> Result<Vec<Layer>> {
        let mut layers = Vec::new();
        for entry in std::fs::read_dir(&self.layers_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Layer>(&data) {
                Ok(layer) => layers.push(layer),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable layer record")
                }
            }
        }
        layers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(layers)
    }

    /// Layers from the root down to `id`, in apply order.
    pub fn lineage(&self, id: &str) -> Result<Vec<Layer>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(id.to_string());

        while let Some(current) = cursor {
            if !seen.insert(current.clone()) {
                return Err(BuildError::RuntimeUnavailable(format!(
                    "layer {} has a cyclic parent chain",
                    id
                )));
            }
            let layer = self
                .layer(&current)?
                .ok_or_else(|| BuildError::NotFound(format!("layer {}", current)))?;
            cursor = layer.parent.clone();
            out.push(layer);
        }

        out.reverse();
        Ok(out)
    }

    /// Point `reference` at layer `id`, replacing any previous target.
    pub fn tag(&self, reference: &str, id: &str) -> Result<()> {
        if !self.contains(id) {
            return Err(BuildError::NotFound(format!("layer {}", id)));
        }
        self.tags.write().insert(reference.to_string(), id.to_string());
        self.save_index()?;

        tracing::info!(reference, id, "Tagged image");
        Ok(())
    }

    /// Remove a tag. Returns the layer id it pointed at.
    pub fn untag(&self, reference: &str) -> Result<String> {
        let removed = self.tags.write().remove(reference);
        match removed {
            Some(id) => {
                self.save_index()?;
                Ok(id)
            }
            None => Err(BuildError::NotFound(format!("tag {}", reference))),
        }
    }

    pub fn resolve(&self, reference: &str) -> Option<String> {
        self.tags.read().get(reference).cloned()
    }

    /// All tags, sorted by reference.
    pub fn tags(&self) -> Vec<(String, String)> {
        self.tags
            .read()
            .iter()
            .map(|(r, id)| (r.clone(), id.clone()))
            .collect()
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn load_index(&self) -> Result<()> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(());
        }
        let data = std::fs::read_to_string(&path).map_err(|e| {
            BuildError::RuntimeUnavailable(format!("Failed to read store index: {}", e))
        })?;
        let index: StoreIndex = serde_json::from_str(&data)?;
        *self.tags.write() = index.tags;
        Ok(())
    }

    fn save_index(&self) -> Result<()> {
        let index = StoreIndex {
            tags: self.tags.read().clone(),
        };
        write_json_atomic(&self.root, &self.index_path(), &index)
    }
}

/// File stem for a layer id, rejecting ids that could escape the store.
fn file_stem(id: &str) -> Result<String> {
    if id.is_empty()
        || id == "."
        || id.contains("..")
        || id.contains('/')
        || id.contains('\\')
        || id.contains('\0')
    {
        return Err(BuildError::InvalidReference(format!(
            "'{}' is not a valid layer id",
            id
        )));
    }
    Ok(id.replace(':', "_"))
}

/// Write `value` as JSON via a temp file in `dir` renamed over `path`.
pub(crate) fn write_json_atomic<T: Serialize>(dir: &Path, path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.persist(path).map_err(|e| BuildError::IoError(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn layer(id: &str, parent: Option<&str>) -> Layer {
        Layer {
            id: id.to_string(),
            parent: parent.map(str::to_string),
            created_by: "RUN true".to_string(),
            digest: "ab".repeat(32),
            size: 3,
            created_at: Utc::now(),
        }
    }

    fn put(store: &LayerStore, tmp: &TempDir, l: &Layer) {
        let archive = tmp.path().join("incoming.tar.gz");
        std::fs::write(&archive, b"gz!").unwrap();
        store.put_layer(l, &archive).unwrap();
    }

    #[test]
    fn test_put_and_get_layer() {
        let tmp = TempDir::new().unwrap();
        let store = LayerStore::open(&tmp.path().join("store")).unwrap();
        put(&store, &tmp, &layer("sha256:aa", None));

        let loaded = store.layer("sha256:aa").unwrap().unwrap();
        assert_eq!(loaded.id, "sha256:aa");
        assert!(store.contains("sha256:aa"));
        assert!(store.archive_path("sha256:aa").unwrap().ends_with("sha256_aa.tar.gz"));
        assert!(store.layer("sha256:bb").unwrap().is_none());
    }

    #[test]
    fn test_lineage_root_first() {
        let tmp = TempDir::new().unwrap();
        let store = LayerStore::open(&tmp.path().join("store")).unwrap();
        put(&store, &tmp, &layer("A", None));
        put(&store, &tmp, &layer("L1", Some("A")));
        put(&store, &tmp, &layer("L2", Some("L1")));

        let ids: Vec<String> = store.lineage("L2").unwrap().into_iter().map(|l| l.id).collect();
        assert_eq!(ids, vec!["A", "L1", "L2"]);
    }

    #[test]
    fn test_lineage_missing_parent() {
        let tmp = TempDir::new().unwrap();
        let store = LayerStore::open(&tmp.path().join("store")).unwrap();
        put(&store, &tmp, &layer("L1", Some("gone")));

        let err = store.lineage("L1").unwrap_err();
        assert_eq!(err.kind(), layerbox_core::ErrorKind::NotFound);
    }

    #[test]
    fn test_alias_layer_copies_archive() {
        let tmp = TempDir::new().unwrap();
        let store = LayerStore::open(&tmp.path().join("store")).unwrap();
        let source = layer("sha256:cc", Some("A"));
        put(&store, &tmp, &source);

        let alias = store.alias_layer(&source, "L1").unwrap();
        assert_eq!(alias.id, "L1");
        assert_eq!(alias.parent.as_deref(), Some("A"));
        assert_eq!(std::fs::read(store.archive_path("L1").unwrap()).unwrap(), b"gz!");
    }

    #[test]
    fn test_remove_layer_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = LayerStore::open(&tmp.path().join("store")).unwrap();
        put(&store, &tmp, &layer("A", None));

        store.remove_layer("A").unwrap();
        store.remove_layer("A").unwrap();
        assert!(!store.contains("A"));
    }

    #[test]
    fn test_tags_persist_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("store");
        {
            let store = LayerStore::open(&root).unwrap();
            put(&store, &tmp, &layer("L3", None));
            store.tag("docker.io/library/myimage:v1", "L3").unwrap();
        }

        let store = LayerStore::open(&root).unwrap();
        assert_eq!(
            store.resolve("docker.io/library/myimage:v1").as_deref(),
            Some("L3")
        );
        assert_eq!(store.tags().len(), 1);
    }

    #[test]
    fn test_tag_unknown_layer() {
        let tmp = TempDir::new().unwrap();
        let store = LayerStore::open(tmp.path()).unwrap();
        assert!(store.tag("docker.io/library/x:latest", "nope").is_err());
    }

    #[test]
    fn test_untag() {
        let tmp = TempDir::new().unwrap();
        let store = LayerStore::open(&tmp.path().join("store")).unwrap();
        put(&store, &tmp, &layer("A", None));
        store.tag("docker.io/library/a:latest", "A").unwrap();

        assert_eq!(store.untag("docker.io/library/a:latest").unwrap(), "A");
        assert!(store.resolve("docker.io/library/a:latest").is_none());
        assert!(store.untag("docker.io/library/a:latest").is_err());
    }

    #[test]
    fn test_rejects_path_like_ids() {
        assert!(file_stem("../etc").is_err());
        assert!(file_stem("a/b").is_err());
        assert!(file_stem("").is_err());
        assert_eq!(file_stem("sha256:ff").unwrap(), "sha256_ff");
    }
}
