//! Executor - the contract between an image builder and a container backend.
//!
//! The builder drives one executor per image chain, one step at a time:
//!
//! ```text
//! load_config ─► fetch(base) ─► for each step:
//!                                 check_cache(fp)
//!                                   hit  ─► cached_image + advance_to
//!                                   miss ─► create ─► copy_to_container ─► exec
//!                                           ─► copy_from_container ─► commit ─► destroy
//!                               ─► tag / run_hook
//! ```

use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::BuildConfig;
use crate::error::Result;
use crate::exec::ExecOutput;
use crate::hook::CommitHook;
use crate::step::{Fingerprint, StepDescriptor};

/// Opaque reference to a live build container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Readable archive stream moving in or out of a container.
pub type ArchiveReader = Box<dyn Read + Send>;

/// Engine for turning build steps into committed image layers.
///
/// Implemented per container backend. An executor is used sequentially:
/// each operation completes before the next begins.
#[async_trait]
pub trait Executor: Send {
    /// Replace the active configuration. Fails with `ConfigInvalid`.
    fn load_config(&self, config: BuildConfig) -> Result<()>;

    /// Current configuration snapshot.
    fn config(&self) -> Arc<BuildConfig>;

    /// Identifier of the most recent layer, `None` before the first fetch
    /// or commit.
    fn image_id(&self) -> Option<String>;

    /// Commit the step as a new layer on top of the current head.
    ///
    /// `hook` receives the candidate identifier and returns the final one.
    /// On any failure the head and the cache are left untouched.
    async fn commit(&mut self, step: &StepDescriptor, hook: &dyn CommitHook) -> Result<String>;

    /// Whether a committed layer already satisfies `fingerprint`.
    ///
    /// Pure lookup: never advances the chain.
    async fn check_cache(&self, fingerprint: &Fingerprint) -> Result<bool>;

    /// Image identifier cached for `fingerprint`, if any.
    async fn cached_image(&self, fingerprint: &Fingerprint) -> Result<Option<String>>;

    /// Move the chain head to an existing layer (after a cache hit).
    async fn advance_to(&mut self, image_id: &str) -> Result<()>;

    /// Unpack the archive read from `reader` into `dest` inside the container.
    async fn copy_to_container(
        &mut self,
        handle: &ContainerHandle,
        dest: &str,
        reader: ArchiveReader,
    ) -> Result<()>;

    /// Archive `src` inside the container. The stream is single-pass.
    async fn copy_from_container(
        &mut self,
        handle: &ContainerHandle,
        src: &str,
    ) -> Result<ArchiveReader>;

    /// Read one file from the most recently created live container.
    async fn copy_one_file_from_container(&mut self, src: &str) -> Result<Vec<u8>>;

    /// Run a command inside the container.
    async fn exec(&mut self, handle: &ContainerHandle, argv: &[String]) -> Result<ExecOutput>;

    /// Create a container seeded from the current head.
    async fn create(&mut self) -> Result<ContainerHandle>;

    /// Tear down a container. Unknown or already destroyed handles fail
    /// with `NotFound`.
    async fn destroy(&mut self, handle: &ContainerHandle) -> Result<()>;

    /// Label the current head with `name`.
    async fn tag(&mut self, name: &str) -> Result<()>;

    /// Resolve `reference` to an image and make it the new chain root.
    async fn fetch(&mut self, reference: &str) -> Result<String>;

    /// Run the post-build hook registered under `name`.
    async fn run_hook(&mut self, name: &str) -> Result<String>;
}
