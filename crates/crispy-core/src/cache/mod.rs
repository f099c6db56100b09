//! Artifact cache providers.
//!
//! Compiled shared objects are keyed by a content hash over everything
//! that can change the produced artifact. [`FileCache`] is the default
//! filesystem-backed implementation.

mod file;

pub use file::FileCache;

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Capability set required of a cache provider.
///
/// `compute_hash`, `path_for` and `has_valid` are read-only and safe to
/// share across threads; `purge` must be externally serialized.
pub trait CacheProvider {
    /// Compute the cache key for a (source, flags, compiler version)
    /// triple. Deterministic; any change to any input changes the output
    /// with cryptographic confidence.
    fn compute_hash(
        &self,
        source: &[u8],
        extra_flags: Option<&str>,
        compiler_version: &str,
    ) -> String;

    /// The artifact path for a hash. Total and injective.
    fn path_for(&self, hash: &str) -> PathBuf;

    /// Whether a usable artifact exists for `hash`. With a source path the
    /// artifact must also be at least as new as the source; without one
    /// (inline/stdin) existence suffices. Stat failures count as invalid.
    fn has_valid(&self, hash: &str, source_path: Option<&Path>) -> bool;

    /// Remove every artifact managed by this provider. Purging an empty
    /// cache is a success.
    fn purge(&self) -> Result<()>;
}

/// Platform shared-object suffix for cached artifacts.
pub fn artifact_suffix() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "dylib"
    }
    #[cfg(not(target_os = "macos"))]
    {
        "so"
    }
}
