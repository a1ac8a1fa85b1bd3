//! Build cache: step fingerprints mapped to committed images.

pub mod build_cache;

pub use build_cache::{BuildCache, CacheEntry};
