//! The image chain: an arena of layer records with a moving head.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One committed (or fetched) image layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    /// Image identifier
    pub id: String,
    /// Identifier of the layer this one was committed on top of
    pub parent: Option<String>,
    /// Instruction that produced the layer
    pub created_by: String,
    /// SHA256 of the layer archive (hex, no prefix)
    pub digest: String,
    /// Archive size in bytes
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Ordered history of layers built by one executor.
///
/// Layers live in an arena indexed by id; `head` points at the most recent
/// one. Records are immutable once appended.
#[derive(Debug, Default)]
pub struct ImageChain {
    layers: Vec<Layer>,
    index: HashMap<String, usize>,
    head: Option<usize>,
}

impl ImageChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `layer` the head. A layer already in the arena keeps its
    /// original record.
    pub fn advance(&mut self, layer: Layer) -> &Layer {
        let slot = match self.index.get(&layer.id) {
            Some(&slot) => slot,
            None => {
                let slot = self.layers.len();
                self.index.insert(layer.id.clone(), slot);
                self.layers.push(layer);
                slot
            }
        };
        self.head = Some(slot);
        &self.layers[slot]
    }

    pub fn head(&self) -> Option<&Layer> {
        self.head.map(|slot| &self.layers[slot])
    }

    pub fn head_id(&self) -> Option<&str> {
        self.head().map(|layer| layer.id.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&Layer> {
        self.index.get(id).map(|&slot| &self.layers[slot])
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Ancestry of the head, newest first, as far as the arena knows it.
    pub fn history(&self) -> Vec<&Layer> {
        let mut out = Vec::new();
        let mut cursor = self.head();
        while let Some(layer) = cursor {
            // A hook may hand back an existing id; stop on cycles
            if out.iter().any(|seen: &&Layer| seen.id == layer.id) {
                break;
            }
            out.push(layer);
            cursor = layer.parent.as_deref().and_then(|p| self.get(p));
        }
        out
    }
}
