//! Filesystem implementation of [`CacheProvider`].
//!
//! Artifacts live directly under the cache directory, one regular file
//! per entry, named by the lowercase SHA-256 hex digest of their inputs.
//! No sidecar files and no index: the filename is the whole story.

use std::fmt::Write as _;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::cache::{artifact_suffix, CacheProvider};
use crate::error::{Error, Result};

/// Content-addressed artifact cache rooted at a single directory.
pub struct FileCache {
    cache_dir: PathBuf,
}

impl FileCache {
    /// Open the default per-user cache (`~/.cache/crispy` on Linux),
    /// creating it with mode 0755 if needed.
    pub fn new() -> Result<Self> {
        let base = dirs::cache_dir()
            .ok_or_else(|| Error::Cache("no per-user cache directory available".to_string()))?;
        Self::with_dir(base.join("crispy"))
    }

    /// Open a cache rooted at an explicit directory, creating it on demand.
    pub fn with_dir(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;
        fs::set_permissions(&cache_dir, fs::Permissions::from_mode(0o755))?;
        Ok(Self { cache_dir })
    }

    /// The directory artifacts are stored under.
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }
}

impl CacheProvider for FileCache {
    fn compute_hash(
        &self,
        source: &[u8],
        extra_flags: Option<&str>,
        compiler_version: &str,
    ) -> String {
        // NUL separators keep field boundaries unambiguous: ("ab", "c")
        // and ("a", "bc") must not collide.
        let mut hasher = Sha256::new();
        hasher.update(source);
        hasher.update([0u8]);
        hasher.update(extra_flags.unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(compiler_version.as_bytes());

        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{:02x}", byte);
        }
        hex
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.{}", hash, artifact_suffix()))
    }

    fn has_valid(&self, hash: &str, source_path: Option<&Path>) -> bool {
        let artifact = self.path_for(hash);

        if !artifact.is_file() {
            return false;
        }

        let Some(source_path) = source_path else {
            // Inline and stdin sources have no mtime to compare against.
            return true;
        };

        let artifact_mtime = match fs::metadata(&artifact).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => return false,
        };
        let source_mtime = match fs::metadata(source_path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => return false,
        };

        artifact_mtime >= source_mtime
    }

    fn purge(&self) -> Result<()> {
        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            Error::Cache(format!(
                "cannot read cache directory {}: {}",
                self.cache_dir.display(),
                e
            ))
        })?;

        let suffix = format!(".{}", artifact_suffix());
        let mut count = 0usize;

        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(&suffix) && fs::remove_file(entry.path()).is_ok() {
                count += 1;
            }
        }

        tracing::info!(
            "purged {} cached artifact(s) from {}",
            count,
            self.cache_dir.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn cache() -> (tempfile::TempDir, FileCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::with_dir(dir.path().join("cache")).unwrap();
        (dir, cache)
    }

    #[test]
    fn test_hash_is_deterministic() {
        let (_dir, cache) = cache();
        let a = cache.compute_hash(b"int main(void){}", Some("-lm"), "gcc 13.2.0");
        let b = cache.compute_hash(b"int main(void){}", Some("-lm"), "gcc 13.2.0");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(a, a.to_lowercase());
    }

    #[test]
    fn test_hash_changes_with_each_input() {
        let (_dir, cache) = cache();
        let base = cache.compute_hash(b"source", Some("-lm"), "v1");
        assert_ne!(base, cache.compute_hash(b"source2", Some("-lm"), "v1"));
        assert_ne!(base, cache.compute_hash(b"source", Some("-lpthread"), "v1"));
        assert_ne!(base, cache.compute_hash(b"source", Some("-lm"), "v2"));
        assert_ne!(base, cache.compute_hash(b"source", None, "v1"));
    }

    #[test]
    fn test_hash_field_boundaries_are_unambiguous() {
        let (_dir, cache) = cache();
        let a = cache.compute_hash(b"ab", Some("c"), "v");
        let b = cache.compute_hash(b"a", Some("bc"), "v");
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_tolerates_embedded_nul() {
        let (_dir, cache) = cache();
        let a = cache.compute_hash(b"a\0b", None, "v");
        let b = cache.compute_hash(b"a", None, "v");
        assert_ne!(a, b);
    }

    #[test]
    fn test_path_layout() {
        let (_dir, cache) = cache();
        let path = cache.path_for("deadbeef");
        assert_eq!(path.parent(), Some(cache.dir()));
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("deadbeef.{}", artifact_suffix())
        );
    }

    #[test]
    fn test_has_valid_missing_artifact() {
        let (_dir, cache) = cache();
        assert!(!cache.has_valid("0000", None));
    }

    #[test]
    fn test_has_valid_without_source_path() {
        let (_dir, cache) = cache();
        fs::write(cache.path_for("aaaa"), b"fake artifact").unwrap();
        assert!(cache.has_valid("aaaa", None));
    }

    #[test]
    fn test_has_valid_fresh_artifact() {
        let (dir, cache) = cache();
        let source = dir.path().join("script.c");
        fs::write(&source, b"int main(void){}").unwrap();
        thread::sleep(Duration::from_millis(10));
        fs::write(cache.path_for("bbbb"), b"fake artifact").unwrap();
        assert!(cache.has_valid("bbbb", Some(&source)));
    }

    #[test]
    fn test_has_valid_stale_artifact() {
        let (dir, cache) = cache();
        fs::write(cache.path_for("cccc"), b"fake artifact").unwrap();
        thread::sleep(Duration::from_millis(10));
        let source = dir.path().join("script.c");
        fs::write(&source, b"int main(void){}").unwrap();
        assert!(!cache.has_valid("cccc", Some(&source)));
    }

    #[test]
    fn test_has_valid_missing_source_is_invalid() {
        let (dir, cache) = cache();
        fs::write(cache.path_for("dddd"), b"fake artifact").unwrap();
        assert!(!cache.has_valid("dddd", Some(&dir.path().join("gone.c"))));
    }

    #[test]
    fn test_purge_removes_only_artifacts() {
        let (_dir, cache) = cache();
        fs::write(cache.path_for("eeee"), b"artifact").unwrap();
        let keep = cache.dir().join("notes.txt");
        fs::write(&keep, b"keep me").unwrap();

        cache.purge().unwrap();
        assert!(!cache.path_for("eeee").exists());
        assert!(keep.exists());
    }

    #[test]
    fn test_purge_twice_on_empty_dir() {
        let (_dir, cache) = cache();
        cache.purge().unwrap();
        cache.purge().unwrap();
    }
}
