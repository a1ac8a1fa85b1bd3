//! Executor implementation over any [`RuntimeDriver`].
//!
//! The engine owns the image chain of one build, the containers it has
//! created, and the named post-build hooks. The build cache and the
//! driver are shared.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use layerbox_core::config::{BuildConfig, ConfigStore};
use layerbox_core::error::{BuildError, Result};
use layerbox_core::exec::ExecOutput;
use layerbox_core::executor::{ArchiveReader, ContainerHandle, Executor};
use layerbox_core::hook::CommitHook;
use layerbox_core::step::{Fingerprint, StepDescriptor};

use crate::cache::BuildCache;
use crate::chain::{ImageChain, Layer};
use crate::driver::RuntimeDriver;
use crate::image::ImageReference;
use crate::transfer;

/// A build executor backed by driver `D`.
pub struct Engine<D: RuntimeDriver> {
    driver: Arc<D>,
    cache: Arc<BuildCache>,
    config: ConfigStore,
    chain: ImageChain,
    /// Live containers in creation order; the last one is the active one
    live: Vec<ContainerHandle>,
    hooks: HashMap<String, Arc<dyn CommitHook>>,
}

impl<D: RuntimeDriver> Engine<D> {
    pub fn new(driver: Arc<D>, cache: Arc<BuildCache>) -> Self {
        Self {
            driver,
            cache,
            config: ConfigStore::default(),
            chain: ImageChain::new(),
            live: Vec::new(),
            hooks: HashMap::new(),
        }
    }

    /// Register a post-build hook callable through `run_hook`.
    pub fn register_hook(&mut self, name: impl Into<String>, hook: impl CommitHook + 'static) {
        self.hooks.insert(name.into(), Arc::new(hook));
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn cache(&self) -> &Arc<BuildCache> {
        &self.cache
    }

    /// Chain history from the root to the head.
    pub fn history(&self) -> Vec<Layer> {
        let mut layers: Vec<Layer> = self.chain.history().into_iter().cloned().collect();
        layers.reverse();
        layers
    }

    pub fn live_containers(&self) -> &[ContainerHandle] {
        &self.live
    }

    /// Destroy every container this engine still holds.
    ///
    /// Keeps going past failures and returns the first one. Containers
    /// that could not be destroyed stay live for a later attempt.
    pub async fn destroy_all(&mut self) -> Result<()> {
        let mut first_error = None;
        let mut kept = Vec::new();
        for handle in std::mem::take(&mut self.live) {
            if let Err(e) = self.driver.destroy_container(&handle).await {
                tracing::warn!(container = %handle, error = %e, "Failed to destroy container");
                first_error.get_or_insert(e);
                kept.push(handle);
            }
        }
        self.live = kept;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn ensure_live(&self, handle: &ContainerHandle) -> Result<()> {
        if self.live.contains(handle) {
            Ok(())
        } else {
            Err(BuildError::NotFound(format!("container {}", handle)))
        }
    }

    /// Cached image for `fingerprint` whose layer still exists.
    async fn usable_cached_image(&self, fingerprint: &Fingerprint) -> Result<Option<String>> {
        let Some(entry) = self.cache.lookup(fingerprint)? else {
            return Ok(None);
        };
        match self.driver.layer(&entry.image_id).await? {
            Some(_) => Ok(Some(entry.image_id)),
            None => {
                tracing::debug!(
                    fingerprint = %fingerprint,
                    image_id = %entry.image_id,
                    "Cached image no longer exists"
                );
                Ok(None)
            }
        }
    }

    async fn discard_candidate(&self, id: &str) {
        if let Err(e) = self.driver.discard_layer(id).await {
            tracing::warn!(id, error = %e, "Failed to discard candidate layer");
        }
    }
}

fn valid_image_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && !id.contains("..")
        && !id.contains('/')
        && !id.chars().any(|c| c.is_whitespace() || c.is_control())
}

#[async_trait]
impl<D: RuntimeDriver + 'static> Executor for Engine<D> {
    fn load_config(&self, config: BuildConfig) -> Result<()> {
        self.config.load(config)
    }

    fn config(&self) -> Arc<BuildConfig> {
        self.config.snapshot()
    }

    fn image_id(&self) -> Option<String> {
        self.chain.head_id().map(str::to_string)
    }

    async fn commit(&mut self, step: &StepDescriptor, hook: &dyn CommitHook) -> Result<String> {
        if let Some(handle) = &step.container {
            self.ensure_live(handle)?;
        }

        let parent = self.chain.head_id().map(str::to_string);
        let fingerprint = step.fingerprint(parent.as_deref());

        let candidate = self
            .driver
            .commit_container(step.container.as_ref(), parent.as_deref(), &step.instruction)
            .await?;

        let final_id = match hook.finalize(&candidate.id) {
            Ok(id) if valid_image_id(&id) => id,
            Ok(id) => {
                self.discard_candidate(&candidate.id).await;
                return Err(BuildError::HookFailed {
                    hook: "commit".to_string(),
                    message: format!("returned invalid image id '{}'", id),
                });
            }
            Err(e) => {
                self.discard_candidate(&candidate.id).await;
                return Err(BuildError::hook_failed("commit", e));
            }
        };

        let layer = match self.driver.finalize_layer(&candidate, &final_id).await {
            Ok(layer) => layer,
            Err(e) => {
                self.discard_candidate(&candidate.id).await;
                return Err(e);
            }
        };

        // The new head must sit exactly one link above the old one
        if layer.parent != parent {
            self.discard_candidate(&layer.id).await;
            self.discard_candidate(&candidate.id).await;
            return Err(BuildError::HookFailed {
                hook: "commit".to_string(),
                message: format!("image id {} does not extend the current image", layer.id),
            });
        }

        if let Err(e) = self.cache.record(&fingerprint, &layer.id, &step.instruction) {
            self.discard_candidate(&layer.id).await;
            return Err(e);
        }
        self.driver.confirm_layer(&layer.id).await?;
        let id = self.chain.advance(layer).id.clone();

        tracing::info!(
            id = %id,
            parent = ?parent,
            instruction = %step.instruction,
            "Committed layer"
        );
        Ok(id)
    }

    async fn check_cache(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(self.usable_cached_image(fingerprint).await?.is_some())
    }

    async fn cached_image(&self, fingerprint: &Fingerprint) -> Result<Option<String>> {
        self.usable_cached_image(fingerprint).await
    }

    async fn advance_to(&mut self, image_id: &str) -> Result<()> {
        let layer = self
            .driver
            .layer(image_id)
            .await?
            .ok_or_else(|| BuildError::NotFound(format!("image {}", image_id)))?;
        self.chain.advance(layer);

        tracing::debug!(id = image_id, "Advanced chain to cached layer");
        Ok(())
    }

    async fn copy_to_container(
        &mut self,
        handle: &ContainerHandle,
        dest: &str,
        reader: ArchiveReader,
    ) -> Result<()> {
        self.ensure_live(handle)?;
        self.driver.copy_in(handle, dest, reader).await
    }

    async fn copy_from_container(
        &mut self,
        handle: &ContainerHandle,
        src: &str,
    ) -> Result<ArchiveReader> {
        self.ensure_live(handle)?;
        self.driver.copy_out(handle, src).await
    }

    async fn copy_one_file_from_container(&mut self, src: &str) -> Result<Vec<u8>> {
        let handle = self
            .live
            .last()
            .cloned()
            .ok_or_else(|| BuildError::NotFound("no live container".to_string()))?;
        let reader = self.driver.copy_out(&handle, src).await?;
        transfer::read_single_file(reader)
    }

    async fn exec(&mut self, handle: &ContainerHandle, argv: &[String]) -> Result<ExecOutput> {
        self.ensure_live(handle)?;
        let config = self.config.snapshot();
        self.driver.exec(handle, &config, argv).await
    }

    async fn create(&mut self) -> Result<ContainerHandle> {
        let config = self.config.snapshot();
        let image = self.chain.head_id().map(str::to_string);
        let handle = self
            .driver
            .create_container(image.as_deref(), &config)
            .await?;
        self.live.push(handle.clone());
        Ok(handle)
    }

    async fn destroy(&mut self, handle: &ContainerHandle) -> Result<()> {
        self.ensure_live(handle)?;
        // On failure the handle stays live so destroy can be retried
        self.driver.destroy_container(handle).await?;
        self.live.retain(|h| h != handle);
        Ok(())
    }

    async fn tag(&mut self, name: &str) -> Result<()> {
        let reference = ImageReference::parse(name)?;
        let head = self
            .chain
            .head_id()
            .map(str::to_string)
            .ok_or_else(|| BuildError::NotFound("no image to tag".to_string()))?;
        self.driver.tag_image(&head, &reference).await
    }

    async fn fetch(&mut self, reference: &str) -> Result<String> {
        let reference = ImageReference::parse(reference)?;
        let layer = self.driver.fetch_image(&reference).await?;
        let id = self.chain.advance(layer).id.clone();

        tracing::info!(reference = %reference, id = %id, "Fetched base image");
        Ok(id)
    }

    async fn run_hook(&mut self, name: &str) -> Result<String> {
        let hook = self
            .hooks
            .get(name)
            .cloned()
            .ok_or_else(|| BuildError::NotFound(format!("hook '{}'", name)))?;
        let head = self.chain.head_id().unwrap_or_default().to_string();

        let result = hook
            .finalize(&head)
            .map_err(|e| BuildError::hook_failed(name, e))?;
        tracing::info!(hook = name, image = %head, "Ran post-build hook");
        Ok(result)
    }
}
