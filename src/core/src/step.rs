//! Build step descriptors and cache fingerprints.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::executor::ContainerHandle;

/// Deterministic cache key for one build step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an existing fingerprint string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Description of one build step handed to `commit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDescriptor {
    /// Instruction text (e.g., "RUN apk add curl")
    pub instruction: String,
    /// Digests of the step's inputs, in the order the step consumes them
    pub inputs: Vec<String>,
    /// Container whose filesystem the commit snapshots; `None` for
    /// metadata-only steps
    pub container: Option<ContainerHandle>,
}

impl StepDescriptor {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            inputs: Vec::new(),
            container: None,
        }
    }

    /// Add an input digest.
    pub fn with_input(mut self, digest: impl Into<String>) -> Self {
        self.inputs.push(digest.into());
        self
    }

    /// Commit the filesystem state of `handle`.
    pub fn in_container(mut self, handle: ContainerHandle) -> Self {
        self.container = Some(handle);
        self
    }

    /// Compute the cache fingerprint of this step on top of `parent`.
    ///
    /// SHA-256 over parent id, instruction, and inputs, NUL separated.
    /// The container handle does not take part.
    pub fn fingerprint(&self, parent: Option<&str>) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(parent.unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(self.instruction.as_bytes());
        for input in &self.inputs {
            hasher.update([0u8]);
            hasher.update(input.as_bytes());
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }
}
