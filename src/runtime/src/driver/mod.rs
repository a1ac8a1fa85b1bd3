//! Container backends.
//!
//! A `RuntimeDriver` owns containers and layer storage. The generic
//! [`Engine`](crate::engine::Engine) layers the image chain, build cache,
//! and commit hooks on top, so a driver only deals in containers and
//! layer records.

pub mod local;

use std::path::Path;

use async_trait::async_trait;
use layerbox_core::config::BuildConfig;
use layerbox_core::error::Result;
use layerbox_core::exec::ExecOutput;
use layerbox_core::executor::{ArchiveReader, ContainerHandle};

use crate::chain::Layer;
use crate::image::ImageReference;

pub use local::{LocalDriver, LocalDriverOptions};

/// Backend operations behind an executor.
///
/// Implementations must be shareable across executors; every method takes
/// `&self`.
#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    /// Backend name for logs (e.g., "local").
    fn name(&self) -> &str;

    /// Create a container whose filesystem is `image` (empty for `None`).
    async fn create_container(
        &self,
        image: Option<&str>,
        config: &BuildConfig,
    ) -> Result<ContainerHandle>;

    async fn destroy_container(&self, handle: &ContainerHandle) -> Result<()>;

    async fn exec(
        &self,
        handle: &ContainerHandle,
        config: &BuildConfig,
        argv: &[String],
    ) -> Result<ExecOutput>;

    async fn copy_in(&self, handle: &ContainerHandle, dest: &str, reader: ArchiveReader)
        -> Result<()>;

    async fn copy_out(&self, handle: &ContainerHandle, src: &str) -> Result<ArchiveReader>;

    /// Snapshot a container (or nothing, for metadata steps) into a
    /// candidate layer on top of `parent`.
    async fn commit_container(
        &self,
        handle: Option<&ContainerHandle>,
        parent: Option<&str>,
        created_by: &str,
    ) -> Result<Layer>;

    /// Drop a candidate that was never finalized. Layers that existed
    /// before the commit are kept.
    async fn discard_layer(&self, id: &str) -> Result<()>;

    /// Turn a candidate into the layer stored under `final_id`.
    ///
    /// Fails with `HookFailed` when `final_id` already names a layer with
    /// different content or a different parent. A layer created here stays
    /// discardable until [`confirm_layer`](Self::confirm_layer).
    async fn finalize_layer(&self, candidate: &Layer, final_id: &str) -> Result<Layer>;

    /// Keep a finalized layer; `discard_layer` no longer removes it.
    async fn confirm_layer(&self, id: &str) -> Result<()>;

    /// Look up a stored layer.
    async fn layer(&self, id: &str) -> Result<Option<Layer>>;

    /// Resolve a reference to a layer, pulling it if the backend can.
    async fn fetch_image(&self, reference: &ImageReference) -> Result<Layer>;

    async fn tag_image(&self, id: &str, reference: &ImageReference) -> Result<()>;
}

/// Source of base images that are not yet in the local store.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Download `reference` as a gzip layer archive into `dest_dir` and
    /// return its path.
    async fn pull(&self, reference: &ImageReference, dest_dir: &Path) -> Result<std::path::PathBuf>;
}
