//! Commit hooks: caller-supplied finalization of candidate layers.

use crate::error::Result;

/// Finalizes a candidate image identifier.
///
/// Called synchronously from `commit` and `run_hook`. Returning `Err`
/// aborts the operation without touching the image chain.
pub trait CommitHook: Send + Sync {
    fn finalize(&self, candidate: &str) -> Result<String>;
}

impl<F> CommitHook for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn finalize(&self, candidate: &str) -> Result<String> {
        self(candidate)
    }
}

/// Hook that accepts the candidate identifier unchanged.
pub fn keep_candidate(candidate: &str) -> Result<String> {
    Ok(candidate.to_string())
}
