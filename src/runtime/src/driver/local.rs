//! Local filesystem driver.
//!
//! Containers are plain directories under `<root>/containers/<id>/rootfs`
//! populated from the layer store. Commands run either directly on the
//! host with the container rootfs as working directory, or under
//! `chroot` when enabled.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use layerbox_core::config::BuildConfig;
use layerbox_core::error::{BuildError, Result};
use layerbox_core::exec::ExecOutput;
use layerbox_core::executor::{ArchiveReader, ContainerHandle};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use super::{RegistrySource, RuntimeDriver};
use crate::chain::Layer;
use crate::image::{apply_layer, create_layer, sha256_file, DirSnapshot, ImageReference, LayerStore};
use crate::transfer;

/// Environment variable overriding the driver root.
pub const HOME_ENV: &str = "LAYERBOX_HOME";

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Options for [`LocalDriver`].
#[derive(Debug, Clone)]
pub struct LocalDriverOptions {
    /// Root directory for layers, tags, and container filesystems
    pub root: PathBuf,
    /// Maximum number of live containers
    pub max_containers: usize,
    /// Run commands under `chroot` (requires privileges)
    pub use_chroot: bool,
}

impl LocalDriverOptions {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }
}

impl Default for LocalDriverOptions {
    fn default() -> Self {
        let root = std::env::var_os(HOME_ENV)
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".layerbox")))
            .unwrap_or_else(|| PathBuf::from(".layerbox"));
        Self {
            root,
            max_containers: 16,
            use_chroot: false,
        }
    }
}

struct ContainerState {
    dir: PathBuf,
    rootfs: PathBuf,
    scratch: PathBuf,
    /// Filesystem state right after creation; commits diff against it
    baseline: Arc<DirSnapshot>,
}

/// Driver that keeps everything on the local filesystem.
pub struct LocalDriver {
    options: LocalDriverOptions,
    store: Arc<LayerStore>,
    containers: DashMap<ContainerHandle, ContainerState>,
    /// Candidate layers created by commit and not yet finalized
    candidates: Mutex<HashSet<String>>,
    registry: Option<Arc<dyn RegistrySource>>,
    containers_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl LocalDriver {
    /// Open the driver, creating its directories if needed.
    pub fn new(options: LocalDriverOptions) -> Result<Self> {
        let containers_dir = options.root.join("containers");
        let tmp_dir = options.root.join("tmp");
        for dir in [&containers_dir, &tmp_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                BuildError::RuntimeUnavailable(format!(
                    "Failed to create {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        let store = Arc::new(LayerStore::open(&options.root.join("store"))?);

        tracing::debug!(root = %options.root.display(), "Opened local driver");
        Ok(Self {
            options,
            store,
            containers: DashMap::new(),
            candidates: Mutex::new(HashSet::new()),
            registry: None,
            containers_dir,
            tmp_dir,
        })
    }

    /// Pull images missing from the store through `registry`.
    pub fn with_registry(mut self, registry: Arc<dyn RegistrySource>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn options(&self) -> &LocalDriverOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<LayerStore> {
        &self.store
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    /// Import a tar.gz root filesystem as a base image tagged `reference`.
    pub fn import_archive(&self, archive: &Path, reference: &str) -> Result<Layer> {
        let reference = ImageReference::parse(reference)?;
        validate_layer_archive(archive)?;

        let staged = self.tmp_path("import");
        std::fs::copy(archive, &staged).map_err(|e| {
            BuildError::TransferFailed(format!("Failed to read {}: {}", archive.display(), e))
        })?;
        self.store_base_layer(&staged, &reference)
    }

    fn store_base_layer(&self, staged: &Path, reference: &ImageReference) -> Result<Layer> {
        let full = reference.full_reference();
        let digest = sha256_file(staged)?;
        let created_by = format!("IMPORT {}", full);
        let id = layer_id(None, &digest, &created_by);

        let layer = match self.store.layer(&id)? {
            Some(existing) => {
                let _ = std::fs::remove_file(staged);
                existing
            }
            None => {
                let layer = Layer {
                    id,
                    parent: None,
                    created_by,
                    digest,
                    size: std::fs::metadata(staged)?.len(),
                    created_at: chrono::Utc::now(),
                };
                self.store.put_layer(&layer, staged)?;
                layer
            }
        };
        self.store.tag(&full, &layer.id)?;

        tracing::info!(reference = %full, id = %layer.id, "Imported base image");
        Ok(layer)
    }

    fn tmp_path(&self, prefix: &str) -> PathBuf {
        self.tmp_dir
            .join(format!("{}-{}.tar.gz", prefix, uuid::Uuid::new_v4().simple()))
    }

    fn container(&self, handle: &ContainerHandle) -> Result<(PathBuf, PathBuf, Arc<DirSnapshot>)> {
        self.containers
            .get(handle)
            .map(|state| (state.rootfs.clone(), state.scratch.clone(), state.baseline.clone()))
            .ok_or_else(|| BuildError::NotFound(format!("container {}", handle)))
    }

    fn populate(&self, image: Option<&str>, rootfs: &Path, config: &BuildConfig) -> Result<()> {
        if let Some(image) = image {
            for layer in self.store.lineage(image)? {
                apply_layer(&self.store.archive_path(&layer.id)?, rootfs)?;
            }
        }
        let workdir = transfer::resolve_in_rootfs(rootfs, &config.workdir)?;
        std::fs::create_dir_all(workdir)?;
        Ok(())
    }
}

/// Content address of a layer: parent, archive digest, and instruction.
fn layer_id(parent: Option<&str>, digest: &str, created_by: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent.unwrap_or("").as_bytes());
    hasher.update([0u8]);
    hasher.update(digest.as_bytes());
    hasher.update([0u8]);
    hasher.update(created_by.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

fn validate_layer_archive(path: &Path) -> Result<()> {
    let file = std::fs::File::open(path)
        .map_err(|e| BuildError::NotFound(format!("archive {}: {}", path.display(), e)))?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    let entries = archive
        .entries()
        .map_err(|e| BuildError::TransferFailed(format!("{} is not a tar.gz: {}", path.display(), e)))?;
    for entry in entries {
        entry.map_err(|e| {
            BuildError::TransferFailed(format!("{} is not a tar.gz: {}", path.display(), e))
        })?;
    }
    Ok(())
}

#[async_trait]
impl RuntimeDriver for LocalDriver {
    fn name(&self) -> &str {
        "local"
    }

    async fn create_container(
        &self,
        image: Option<&str>,
        config: &BuildConfig,
    ) -> Result<ContainerHandle> {
        if self.containers.len() >= self.options.max_containers {
            return Err(BuildError::ResourceExhausted(format!(
                "container limit of {} reached",
                self.options.max_containers
            )));
        }

        let handle = ContainerHandle::new(uuid::Uuid::new_v4().simple().to_string());
        let dir = self.containers_dir.join(handle.as_str());
        let rootfs = dir.join("rootfs");
        let scratch = dir.join("scratch");
        for path in [&rootfs, &scratch] {
            std::fs::create_dir_all(path).map_err(|e| {
                BuildError::RuntimeUnavailable(format!(
                    "Failed to create container directory {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }

        let baseline = match self
            .populate(image, &rootfs, config)
            .and_then(|_| DirSnapshot::capture(&rootfs))
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&dir);
                return Err(e);
            }
        };

        self.containers.insert(
            handle.clone(),
            ContainerState {
                dir,
                rootfs,
                scratch,
                baseline: Arc::new(baseline),
            },
        );

        tracing::info!(container = %handle, image = ?image, "Created container");
        Ok(handle)
    }

    async fn destroy_container(&self, handle: &ContainerHandle) -> Result<()> {
        let dir = self
            .containers
            .get(handle)
            .map(|state| state.dir.clone())
            .ok_or_else(|| BuildError::NotFound(format!("container {}", handle)))?;

        // The handle stays registered until its directory is gone, so a
        // failed removal can be retried.
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(BuildError::RuntimeUnavailable(format!(
                    "Failed to remove container {}: {}",
                    handle, e
                )))
            }
        }
        if self.containers.remove(handle).is_none() {
            return Err(BuildError::NotFound(format!("container {}", handle)));
        }

        tracing::info!(container = %handle, "Destroyed container");
        Ok(())
    }

    async fn exec(
        &self,
        handle: &ContainerHandle,
        config: &BuildConfig,
        argv: &[String],
    ) -> Result<ExecOutput> {
        let (rootfs, _, _) = self.container(handle)?;
        let Some(program) = argv.first() else {
            return Err(BuildError::StepFailed {
                command: String::new(),
                exit_code: -1,
                stderr: "empty command".to_string(),
            });
        };

        let mut cmd = if self.options.use_chroot {
            let mut cmd = tokio::process::Command::new("chroot");
            if let Some(user) = &config.user {
                cmd.arg(format!("--userspec={}", user));
            }
            cmd.arg(&rootfs)
                .arg("/bin/sh")
                .arg("-c")
                .arg("cd \"$0\" && exec \"$@\"")
                .arg(&config.workdir)
                .args(argv);
            cmd
        } else {
            let workdir = transfer::resolve_in_rootfs(&rootfs, &config.workdir)?;
            std::fs::create_dir_all(&workdir)?;
            let mut cmd = tokio::process::Command::new(program);
            cmd.args(&argv[1..]).current_dir(workdir);
            cmd
        };

        cmd.env_clear();
        cmd.env("PATH", DEFAULT_PATH);
        cmd.env("HOME", "/root");
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null()).kill_on_drop(true);

        tracing::debug!(container = %handle, argv = ?argv, "Executing command");
        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ExecOutput::new(
                    127,
                    Vec::new(),
                    format!("{}: command not found", program).into_bytes(),
                ))
            }
            Err(e) => {
                return Err(BuildError::RuntimeUnavailable(format!(
                    "Failed to execute {}: {}",
                    program, e
                )))
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        tracing::debug!(container = %handle, exit_code, "Command finished");
        Ok(ExecOutput::new(exit_code, output.stdout, output.stderr))
    }

    async fn copy_in(
        &self,
        handle: &ContainerHandle,
        dest: &str,
        reader: ArchiveReader,
    ) -> Result<()> {
        let (rootfs, scratch, _) = self.container(handle)?;
        transfer::unpack_into(reader, &rootfs, &scratch, dest)
    }

    async fn copy_out(&self, handle: &ContainerHandle, src: &str) -> Result<ArchiveReader> {
        let (rootfs, _, _) = self.container(handle)?;
        let file = transfer::pack_path(&rootfs, src)?;
        Ok(Box::new(file))
    }

    async fn commit_container(
        &self,
        handle: Option<&ContainerHandle>,
        parent: Option<&str>,
        created_by: &str,
    ) -> Result<Layer> {
        let output = self.tmp_path("layer");
        let info = match handle {
            Some(handle) => {
                let (rootfs, _, baseline) = self.container(handle)?;
                let current = DirSnapshot::capture(&rootfs)?;
                let changes = baseline.diff(&current);
                tracing::debug!(container = %handle, changes = changes.len(), "Computed filesystem diff");
                create_layer(&rootfs, &changes, &output)?
            }
            None => create_layer(&self.tmp_dir, &[], &output)?,
        };

        let id = layer_id(parent, &info.digest, created_by);
        if let Some(existing) = self.store.layer(&id)? {
            let _ = std::fs::remove_file(&output);
            return Ok(existing);
        }

        let layer = Layer {
            id,
            parent: parent.map(str::to_string),
            created_by: created_by.to_string(),
            digest: info.digest,
            size: info.size,
            created_at: chrono::Utc::now(),
        };
        self.store.put_layer(&layer, &output)?;
        self.candidates.lock().insert(layer.id.clone());

        tracing::debug!(id = %layer.id, size = layer.size, "Created candidate layer");
        Ok(layer)
    }

    async fn discard_layer(&self, id: &str) -> Result<()> {
        if self.candidates.lock().remove(id) {
            self.store.remove_layer(id)?;
            tracing::debug!(id, "Discarded candidate layer");
        }
        Ok(())
    }

    async fn finalize_layer(&self, candidate: &Layer, final_id: &str) -> Result<Layer> {
        if final_id == candidate.id {
            return Ok(candidate.clone());
        }

        let finalized = match self.store.layer(final_id)? {
            Some(existing)
                if existing.parent == candidate.parent && existing.digest == candidate.digest =>
            {
                existing
            }
            Some(_) => {
                return Err(BuildError::HookFailed {
                    hook: "commit".to_string(),
                    message: format!("image id {} already names a different layer", final_id),
                })
            }
            None => {
                let layer = self.store.alias_layer(candidate, final_id)?;
                self.candidates.lock().insert(layer.id.clone());
                layer
            }
        };
        // The candidate id is no longer referenced
        self.discard_layer(&candidate.id).await?;
        Ok(finalized)
    }

    async fn confirm_layer(&self, id: &str) -> Result<()> {
        self.candidates.lock().remove(id);
        Ok(())
    }

    async fn layer(&self, id: &str) -> Result<Option<Layer>> {
        self.store.layer(id)
    }

    async fn fetch_image(&self, reference: &ImageReference) -> Result<Layer> {
        let full = reference.full_reference();
        if let Some(id) = self.store.resolve(&full) {
            return self
                .store
                .layer(&id)?
                .ok_or_else(|| BuildError::NotFound(format!("layer {} tagged {}", id, full)));
        }

        let Some(registry) = &self.registry else {
            return Err(BuildError::NotFound(format!("image {}", full)));
        };

        tracing::info!(reference = %full, "Pulling image");
        let pulled = registry.pull(reference, &self.tmp_dir).await?;
        validate_layer_archive(&pulled)?;
        self.store_base_layer(&pulled, reference)
    }

    async fn tag_image(&self, id: &str, reference: &ImageReference) -> Result<()> {
        self.store.tag(&reference.full_reference(), id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerbox_core::ErrorKind;
    use tempfile::TempDir;

    fn driver(tmp: &TempDir) -> LocalDriver {
        LocalDriver::new(LocalDriverOptions::with_root(tmp.path().join("root"))).unwrap()
    }

    fn base_archive(dir: &Path) -> PathBuf {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let path = dir.join("base.tar.gz");
        let file = std::fs::File::create(&path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        let content = b"ID=layerbox\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, "etc/os-release", &content[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    #[test]
    fn test_layer_id_depends_on_all_parts() {
        let a = layer_id(Some("p"), "d", "RUN a");
        assert!(a.starts_with("sha256:"));
        assert_ne!(a, layer_id(None, "d", "RUN a"));
        assert_ne!(a, layer_id(Some("p"), "e", "RUN a"));
        assert_ne!(a, layer_id(Some("p"), "d", "RUN b"));
    }

    #[test]
    fn test_options_with_root() {
        let opts = LocalDriverOptions::with_root("/tmp/lb");
        assert_eq!(opts.root, PathBuf::from("/tmp/lb"));
        assert_eq!(opts.max_containers, 16);
        assert!(!opts.use_chroot);
    }

    #[test]
    fn test_import_archive_tags_base() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);
        let layer = driver.import_archive(&base_archive(tmp.path()), "base").unwrap();

        assert!(layer.parent.is_none());
        assert_eq!(
            driver.store().resolve("docker.io/library/base:latest").as_deref(),
            Some(layer.id.as_str())
        );
    }

    #[test]
    fn test_import_archive_rejects_garbage() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);
        let bogus = tmp.path().join("bogus.tar.gz");
        std::fs::write(&bogus, b"not gzip at all").unwrap();

        let err = driver.import_archive(&bogus, "base").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransferFailed);
    }

    #[tokio::test]
    async fn test_create_container_seeds_rootfs() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);
        let base = driver.import_archive(&base_archive(tmp.path()), "base").unwrap();

        let handle = driver
            .create_container(Some(&base.id), &BuildConfig::default())
            .await
            .unwrap();
        let reader = driver.copy_out(&handle, "/etc/os-release").await.unwrap();
        assert_eq!(transfer::read_single_file(reader).unwrap(), b"ID=layerbox\n");

        driver.destroy_container(&handle).await.unwrap();
        assert_eq!(driver.container_count(), 0);
    }

    #[tokio::test]
    async fn test_create_container_unknown_image() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);
        let err = driver
            .create_container(Some("sha256:missing"), &BuildConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(driver.container_count(), 0);
    }

    #[tokio::test]
    async fn test_container_limit() {
        let tmp = TempDir::new().unwrap();
        let mut opts = LocalDriverOptions::with_root(tmp.path().join("root"));
        opts.max_containers = 1;
        let driver = LocalDriver::new(opts).unwrap();

        driver.create_container(None, &BuildConfig::default()).await.unwrap();
        let err = driver
            .create_container(None, &BuildConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[tokio::test]
    async fn test_destroy_twice_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);
        let handle = driver.create_container(None, &BuildConfig::default()).await.unwrap();

        driver.destroy_container(&handle).await.unwrap();
        let err = driver.destroy_container(&handle).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_runs_in_workdir_with_config_env() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);
        let mut config = BuildConfig::default();
        config.workdir = "/app".to_string();
        config.env.push(("GREETING".to_string(), "hi".to_string()));

        let handle = driver.create_container(None, &config).await.unwrap();
        let argv: Vec<String> = ["sh", "-c", "echo \"$GREETING\" > out.txt"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let output = driver.exec(&handle, &config, &argv).await.unwrap();
        assert!(output.success(), "stderr: {}", output.stderr_text());

        let reader = driver.copy_out(&handle, "/app/out.txt").await.unwrap();
        assert_eq!(transfer::read_single_file(reader).unwrap(), b"hi\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_reports_exit_code() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);
        let config = BuildConfig::default();
        let handle = driver.create_container(None, &config).await.unwrap();

        let argv: Vec<String> = ["sh", "-c", "echo oops >&2; exit 3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let output = driver.exec(&handle, &config, &argv).await.unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stderr_text(), "oops");
    }

    #[tokio::test]
    async fn test_exec_missing_program() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);
        let config = BuildConfig::default();
        let handle = driver.create_container(None, &config).await.unwrap();

        let output = driver
            .exec(&handle, &config, &["definitely-not-a-binary-xyz".to_string()])
            .await
            .unwrap();
        assert_eq!(output.exit_code, 127);
    }

    #[tokio::test]
    async fn test_commit_discard_and_finalize() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);
        let config = BuildConfig::default();
        let handle = driver.create_container(None, &config).await.unwrap();

        let archive = {
            let mut builder = tar::Builder::new(Vec::new());
            let mut header = tar::Header::new_gnu();
            header.set_size(2);
            header.set_mode(0o644);
            builder.append_data(&mut header, "f.txt", &b"hi"[..]).unwrap();
            builder.into_inner().unwrap()
        };
        driver
            .copy_in(&handle, "/data", Box::new(std::io::Cursor::new(archive)))
            .await
            .unwrap();

        let candidate = driver
            .commit_container(Some(&handle), None, "COPY f.txt /data")
            .await
            .unwrap();
        assert!(driver.layer(&candidate.id).await.unwrap().is_some());

        let finalized = driver.finalize_layer(&candidate, "L1").await.unwrap();
        assert_eq!(finalized.id, "L1");
        assert!(driver.layer(&candidate.id).await.unwrap().is_none());

        // Confirmed layers survive a late discard
        driver.confirm_layer("L1").await.unwrap();
        driver.discard_layer("L1").await.unwrap();
        assert!(driver.layer("L1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unconfirmed_alias_is_discarded() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);
        let candidate = driver.commit_container(None, None, "LABEL a=b").await.unwrap();

        driver.finalize_layer(&candidate, "L1").await.unwrap();
        driver.discard_layer("L1").await.unwrap();
        assert!(driver.layer("L1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_finalize_refuses_id_of_a_different_layer() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);
        let base = driver.import_archive(&base_archive(tmp.path()), "base").unwrap();

        let candidate = driver
            .commit_container(None, Some(&base.id), "LABEL a=b")
            .await
            .unwrap();
        let err = driver.finalize_layer(&candidate, &base.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HookFailed);

        // Nothing was overwritten and the candidate is still discardable
        let stored = driver.layer(&base.id).await.unwrap().unwrap();
        assert_eq!(stored.digest, base.digest);
        assert!(stored.parent.is_none());
        driver.discard_layer(&candidate.id).await.unwrap();
        assert!(driver.layer(&candidate.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_destroy_can_be_retried() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);
        let handle = driver.create_container(None, &BuildConfig::default()).await.unwrap();

        // A regular file where the container directory was makes removal fail
        let dir = tmp.path().join("root/containers").join(handle.as_str());
        std::fs::remove_dir_all(&dir).unwrap();
        std::fs::write(&dir, "in the way").unwrap();

        let err = driver.destroy_container(&handle).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RuntimeUnavailable);
        assert_eq!(driver.container_count(), 1);

        std::fs::remove_file(&dir).unwrap();
        driver.destroy_container(&handle).await.unwrap();
        assert_eq!(driver.container_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_unknown_image_without_registry() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);
        let reference = ImageReference::parse("nothing:here").unwrap();
        let err = driver.fetch_image(&reference).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
