//! Image layers: references, layer archives, and the local store.

pub mod apply;
pub mod layer;
pub mod reference;
pub mod store;

pub use apply::apply_layer;
pub use layer::{create_layer, sha256_bytes, sha256_file, Change, DirSnapshot, LayerInfo};
pub use reference::ImageReference;
pub use store::LayerStore;
