//! Fingerprint → image id cache shared by executors.
//!
//! Entries are written once: the first committer of a fingerprint wins
//! and later records return the existing entry. When opened on a
//! directory, each entry is persisted as `<key>.json` with a no-clobber
//! rename so that concurrent processes agree on the winner.

use std::io::Write;
use std::path::{Path, PathBuf};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use layerbox_core::error::{BuildError, Result};
use layerbox_core::step::Fingerprint;
use serde::{Deserialize, Serialize};

use crate::image::sha256_bytes;

/// A cached step result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    /// Image produced by the step
    pub image_id: String,
    /// Instruction of the step
    pub created_by: String,
    /// When the entry was recorded (Unix timestamp)
    pub cached_at: i64,
}

/// Build cache keyed by step fingerprint.
pub struct BuildCache {
    /// Backing directory; `None` for a process-local cache
    dir: Option<PathBuf>,
    entries: DashMap<String, CacheEntry>,
}

impl BuildCache {
    /// Cache that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            entries: DashMap::new(),
        }
    }

    /// Open (or create) a persistent cache in `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            BuildError::CacheUnavailable(format!(
                "Failed to create build cache directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let cache = Self {
            dir: Some(dir.to_path_buf()),
            entries: DashMap::new(),
        };
        for entry in cache.read_disk_entries()? {
            cache.entries.insert(entry.fingerprint.clone(), entry);
        }

        tracing::debug!(
            dir = %dir.display(),
            entries = cache.entries.len(),
            "Opened build cache"
        );
        Ok(cache)
    }

    /// Look up `fingerprint`. Pure read as far as callers can observe.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>> {
        if let Some(entry) = self.entries.get(fingerprint.as_str()) {
            return Ok(Some(entry.clone()));
        }

        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        self.ensure_reachable(dir)?;

        // Another process may have recorded it since we opened
        match read_entry(&entry_path(dir, fingerprint))? {
            Some(entry) => {
                self.entries
                    .entry(fingerprint.as_str().to_string())
                    .or_insert_with(|| entry.clone());
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(self.lookup(fingerprint)?.is_some())
    }

    /// Record that `fingerprint` produced `image_id`.
    ///
    /// Returns the stored entry, which is the earlier one if another writer
    /// got there first.
    pub fn record(
        &self,
        fingerprint: &Fingerprint,
        image_id: &str,
        created_by: &str,
    ) -> Result<CacheEntry> {
        let candidate = CacheEntry {
            fingerprint: fingerprint.as_str().to_string(),
            image_id: image_id.to_string(),
            created_by: created_by.to_string(),
            cached_at: chrono::Utc::now().timestamp(),
        };

        let stored = match self.entries.entry(candidate.fingerprint.clone()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => {
                let winner = match &self.dir {
                    Some(dir) => {
                        self.ensure_reachable(dir)?;
                        persist_noclobber(dir, &entry_path(dir, fingerprint), &candidate)?
                    }
                    None => candidate.clone(),
                };
                slot.insert(winner.clone());
                winner
            }
        };

        if stored.image_id != image_id {
            tracing::warn!(
                fingerprint = %fingerprint,
                cached = %stored.image_id,
                committed = image_id,
                "Step produced a different image than the cached one; keeping the cached entry"
            );
        } else {
            tracing::debug!(fingerprint = %fingerprint, image_id, "Recorded build cache entry");
        }
        Ok(stored)
    }

    /// Forget `fingerprint`. Missing entries are ignored.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> Result<()> {
        self.entries.remove(fingerprint.as_str());
        if let Some(dir) = &self.dir {
            match std::fs::remove_file(entry_path(dir, fingerprint)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(BuildError::CacheUnavailable(format!(
                        "Failed to remove cache entry: {}",
                        e
                    )))
                }
            }
        }
        Ok(())
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries: Vec<CacheEntry> = match &self.dir {
            Some(dir) => {
                self.ensure_reachable(dir)?;
                self.read_disk_entries()?
            }
            None => self.entries.iter().map(|e| e.value().clone()).collect(),
        };
        entries.sort_by(|a, b| {
            a.cached_at
                .cmp(&b.cached_at)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        Ok(entries)
    }

    /// Drop every entry for which `keep` returns false. Returns how many
    /// were dropped.
    pub fn retain<F>(&self, keep: F) -> Result<usize>
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let mut removed = 0;
        for entry in self.entries()? {
            if !keep(&entry) {
                self.invalidate(&Fingerprint::new(entry.fingerprint))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ensure_reachable(&self, dir: &Path) -> Result<()> {
        if dir.is_dir() {
            Ok(())
        } else {
            Err(BuildError::CacheUnavailable(format!(
                "build cache directory {} is missing",
                dir.display()
            )))
        }
    }

    fn read_disk_entries(&self) -> Result<Vec<CacheEntry>> {
        let Some(dir) = &self.dir else {
            return Ok(Vec::new());
        };
        let read_dir = std::fs::read_dir(dir).map_err(|e| {
            BuildError::CacheUnavailable(format!("Failed to read {}: {}", dir.display(), e))
        })?;

        let mut out = Vec::new();
        for dir_entry in read_dir.flatten() {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(entry) = read_entry(&path)? {
                out.push(entry);
            }
        }
        Ok(out)
    }
}

/// File for `fingerprint`: the fingerprint itself when it is a plain
/// token, its SHA-256 otherwise.
fn entry_path(dir: &Path, fingerprint: &Fingerprint) -> PathBuf {
    let raw = fingerprint.as_str();
    let plain = !raw.is_empty()
        && raw.len() <= 128
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    let stem = if plain {
        raw.to_string()
    } else {
        sha256_bytes(raw.as_bytes())
    };
    dir.join(format!("{}.json", stem))
}

fn read_entry(path: &Path) -> Result<Option<CacheEntry>> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(BuildError::CacheUnavailable(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };
    match serde_json::from_str(&data) {
        Ok(entry) => Ok(Some(entry)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt cache entry");
            Ok(None)
        }
    }
}

/// Write `entry` to `path` unless it already exists; return whichever
/// entry ends up on disk.
fn persist_noclobber(dir: &Path, path: &Path, entry: &CacheEntry) -> Result<CacheEntry> {
    let unavailable =
        |e: std::io::Error| BuildError::CacheUnavailable(format!("Failed to write cache entry: {}", e));

    let json = serde_json::to_string_pretty(entry)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(unavailable)?;
    tmp.write_all(json.as_bytes()).map_err(unavailable)?;

    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(entry.clone()),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
            Ok(read_entry(path)?.unwrap_or_else(|| entry.clone()))
        }
        Err(e) => Err(unavailable(e.error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerbox_core::ErrorKind;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::new(s)
    }

    #[test]
    fn test_in_memory_record_and_lookup() {
        let cache = BuildCache::in_memory();
        assert!(cache.lookup(&fp("f1")).unwrap().is_none());

        cache.record(&fp("f1"), "L1", "RUN make").unwrap();
        let entry = cache.lookup(&fp("f1")).unwrap().unwrap();
        assert_eq!(entry.image_id, "L1");
        assert_eq!(entry.created_by, "RUN make");
        assert!(cache.contains(&fp("f1")).unwrap());
    }

    #[test]
    fn test_record_first_writer_wins() {
        let cache = BuildCache::in_memory();
        cache.record(&fp("f1"), "L1", "RUN make").unwrap();
        let stored = cache.record(&fp("f1"), "L1-prime", "RUN make").unwrap();

        assert_eq!(stored.image_id, "L1");
        assert_eq!(cache.lookup(&fp("f1")).unwrap().unwrap().image_id, "L1");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_persistent_cache_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let cache = BuildCache::open(tmp.path()).unwrap();
            cache.record(&fp("f1"), "L1", "RUN make").unwrap();
        }
        let cache = BuildCache::open(tmp.path()).unwrap();
        assert_eq!(cache.lookup(&fp("f1")).unwrap().unwrap().image_id, "L1");
    }

    #[test]
    fn test_two_handles_agree_on_winner() {
        let tmp = TempDir::new().unwrap();
        let a = BuildCache::open(tmp.path()).unwrap();
        let b = BuildCache::open(tmp.path()).unwrap();

        a.record(&fp("f1"), "L1", "RUN make").unwrap();
        // b has not seen f1 in memory yet
        let stored = b.record(&fp("f1"), "L9", "RUN make").unwrap();
        assert_eq!(stored.image_id, "L1");
        assert_eq!(b.lookup(&fp("f1")).unwrap().unwrap().image_id, "L1");
    }

    #[test]
    fn test_lookup_sees_other_writer() {
        let tmp = TempDir::new().unwrap();
        let a = BuildCache::open(tmp.path()).unwrap();
        let b = BuildCache::open(tmp.path()).unwrap();

        a.record(&fp("f2"), "L2", "COPY . /app").unwrap();
        assert_eq!(b.lookup(&fp("f2")).unwrap().unwrap().image_id, "L2");
    }

    #[test]
    fn test_missing_directory_is_unavailable() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("cache");
        let cache = BuildCache::open(&dir).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        let err = cache.lookup(&fp("f1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CacheUnavailable);
        let err = cache.record(&fp("f1"), "L1", "RUN make").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CacheUnavailable);
    }

    #[test]
    fn test_invalidate_and_retain() {
        let tmp = TempDir::new().unwrap();
        let cache = BuildCache::open(tmp.path()).unwrap();
        cache.record(&fp("f1"), "L1", "RUN a").unwrap();
        cache.record(&fp("f2"), "L2", "RUN b").unwrap();
        cache.record(&fp("f3"), "L3", "RUN c").unwrap();

        cache.invalidate(&fp("f1")).unwrap();
        assert!(cache.lookup(&fp("f1")).unwrap().is_none());

        let removed = cache.retain(|e| e.image_id != "L2").unwrap();
        assert_eq!(removed, 1);
        let ids: Vec<String> = cache.entries().unwrap().into_iter().map(|e| e.image_id).collect();
        assert_eq!(ids, vec!["L3"]);
    }

    #[test]
    fn test_unusual_fingerprint_is_hashed_to_file_name() {
        let tmp = TempDir::new().unwrap();
        let cache = BuildCache::open(tmp.path()).unwrap();
        cache.record(&fp("../../escape"), "L1", "RUN a").unwrap();

        assert!(!tmp.path().parent().unwrap().join("escape.json").exists());
        assert_eq!(
            cache.lookup(&fp("../../escape")).unwrap().unwrap().image_id,
            "L1"
        );
    }

    #[test]
    fn test_concurrent_record_single_winner() {
        let cache = Arc::new(BuildCache::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    cache
                        .record(&Fingerprint::new("shared"), &format!("L{}", i), "RUN x")
                        .unwrap()
                        .image_id
                })
            })
            .collect();

        let winners: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(winners.iter().all(|w| w == &winners[0]));
    }
}
