//! Shared fixtures for the integration tests.
//!
//! These tests drive the real gcc backend: they compile scripts,
//! plugins, and config files to temporary directories and run them
//! through the full pipeline.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crispy_core::{FileCache, GccCompiler};

/// A fresh compiler backend. gcc must be installed to run these tests.
pub fn backend() -> Arc<GccCompiler> {
    Arc::new(GccCompiler::new().expect("integration tests require gcc in PATH"))
}

/// A cache rooted inside the given scratch directory.
pub fn cache_in(dir: &Path) -> Arc<FileCache> {
    Arc::new(FileCache::with_dir(dir.join("cache")).expect("failed to create test cache"))
}

/// Write a script source into the scratch directory.
pub fn write_script(dir: &Path, name: &str, source: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, source).expect("failed to write test script");
    path
}

/// The in-tree include directory holding crispy.h.
pub fn include_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../include")
}

/// Compile a C plugin or helper library to a shared object, handing the
/// include directory to the compiler so sources can use <crispy.h>.
pub fn compile_shared_object(
    compiler: &GccCompiler,
    dir: &Path,
    name: &str,
    source: &str,
) -> PathBuf {
    use crispy_core::Compiler;

    let src = dir.join(format!("{name}.c"));
    let out = dir.join(format!("{name}.so"));
    fs::write(&src, source).expect("failed to write plugin source");

    let include = format!("-I{}", include_dir().display());
    compiler
        .compile_shared(&src, &out, Some(&include))
        .expect("failed to compile test shared object");
    out
}

/// Convenience: argv vector from string literals.
pub fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
