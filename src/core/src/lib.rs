//! layerbox Core - the Executor contract
//!
//! Types shared by every layerbox backend: the error type, build
//! configuration, step descriptors and fingerprints, commit hooks, and the
//! `Executor` trait itself.

pub mod config;
pub mod error;
pub mod exec;
pub mod executor;
pub mod hook;
pub mod step;

// Re-export commonly used types
pub use config::{BuildConfig, ConfigStore, ImageMetadata};
pub use error::{BuildError, ErrorKind, Result};
pub use exec::ExecOutput;
pub use executor::{ArchiveReader, ContainerHandle, Executor};
pub use hook::{keep_candidate, CommitHook};
pub use step::{Fingerprint, StepDescriptor};

/// layerbox version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
