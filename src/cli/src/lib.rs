//! layerbox CLI - maintenance commands for the local layer store and build cache.

pub mod commands;
pub mod output;
