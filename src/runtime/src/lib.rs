//! layerbox Runtime - layer engine implementation
//!
//! Turns build steps into committed image layers: the image chain, the
//! shared build cache, the local layer store, container drivers, and the
//! generic [`Engine`] that implements [`layerbox_core::Executor`].

pub mod cache;
pub mod chain;
pub mod driver;
pub mod engine;
pub mod image;
pub mod pipeline;
pub mod registry;
pub mod transfer;

// Re-exports
pub use cache::{BuildCache, CacheEntry};
pub use chain::{ImageChain, Layer};
pub use driver::{LocalDriver, LocalDriverOptions, RegistrySource, RuntimeDriver};
pub use engine::Engine;
pub use image::{ImageReference, LayerStore};
pub use pipeline::{run_step, BuildStep, StepInput, StepOptions, StepOutcome, StepPhase};
pub use registry::ArchiveRegistry;

/// Executor over the local filesystem driver.
pub type LocalEngine = Engine<LocalDriver>;
