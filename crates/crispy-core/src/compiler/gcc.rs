//! GCC implementation of the [`Compiler`] trait.
//!
//! Probes `gcc --version` and the pkg-config flags for the GLib stack once
//! at construction so neither is re-evaluated per compilation. Compile
//! commands run through `/bin/sh -c` so that flag strings word-split the
//! way script authors expect.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::compiler::Compiler;
use crate::error::{Error, Result};

/// Modules whose cflags/libs make up the default base flags.
const BASE_FLAG_MODULES: &str = "glib-2.0 gobject-2.0 gio-2.0 gmodule-2.0";

/// GCC-based compiler backend.
pub struct GccCompiler {
    /// Resolved path to the gcc binary.
    gcc_path: PathBuf,

    /// First line of `gcc --version`.
    version: String,

    /// Cached pkg-config output (may be empty when the GLib development
    /// packages are not installed).
    base_flags: String,
}

impl GccCompiler {
    /// Create a new backend, probing the toolchain.
    ///
    /// # Errors
    /// Returns [`Error::ToolchainNotFound`] when gcc is not locatable.
    pub fn new() -> Result<Self> {
        let gcc_path = which::which("gcc")
            .map_err(|_| Error::ToolchainNotFound("gcc is not in PATH".to_string()))?;

        let version = Self::probe_version(&gcc_path)?;
        let base_flags = Self::probe_base_flags();

        Ok(Self {
            gcc_path,
            version,
            base_flags,
        })
    }

    /// First line of `gcc --version`.
    fn probe_version(gcc_path: &Path) -> Result<String> {
        let output = Command::new(gcc_path)
            .arg("--version")
            .output()
            .map_err(|e| {
                Error::ToolchainNotFound(format!("failed to run {}: {}", gcc_path.display(), e))
            })?;

        if !output.status.success() {
            return Err(Error::ToolchainNotFound(format!(
                "{} --version exited with {}",
                gcc_path.display(),
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }

    /// Cached `pkg-config --cflags --libs` output for the default stack.
    ///
    /// A missing pkg-config or missing modules is not fatal: scripts that
    /// do not use the GLib runtime still compile, so this degrades to an
    /// empty flag string.
    fn probe_base_flags() -> String {
        let result = Command::new("pkg-config")
            .arg("--cflags")
            .arg("--libs")
            .args(BASE_FLAG_MODULES.split(' '))
            .output();

        match result {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            }
            Ok(output) => {
                tracing::debug!(
                    "pkg-config has no flags for {}: {}",
                    BASE_FLAG_MODULES,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                String::new()
            }
            Err(e) => {
                tracing::debug!("pkg-config not available: {}", e);
                String::new()
            }
        }
    }

    /// Build and run a gcc command line for the given mode.
    fn run_gcc(
        &self,
        mode_flags: &str,
        source_path: &Path,
        output_path: &Path,
        extra_flags: Option<&str>,
    ) -> Result<()> {
        let command = format!(
            "{} -std=gnu89 {} {} {} -o {} {}",
            self.gcc_path.display(),
            mode_flags,
            self.base_flags,
            extra_flags.unwrap_or(""),
            output_path.display(),
            source_path.display()
        );

        tracing::debug!("compile: {}", command);

        let output = Command::new("/bin/sh").arg("-c").arg(&command).output()?;

        if !output.status.success() {
            return Err(Error::Compile {
                message: String::from_utf8_lossy(&output.stderr).to_string(),
                command,
            });
        }

        // The driver can exit zero without producing the requested file
        // (e.g. when the flag string smuggles in -E). Never report success
        // without an artifact.
        if !output_path.is_file() {
            return Err(Error::Compile {
                message: "compiler exited successfully but produced no output file".to_string(),
                command,
            });
        }

        Ok(())
    }
}

impl Compiler for GccCompiler {
    fn version(&self) -> &str {
        &self.version
    }

    fn base_flags(&self) -> &str {
        &self.base_flags
    }

    fn compile_shared(
        &self,
        source_path: &Path,
        output_path: &Path,
        extra_flags: Option<&str>,
    ) -> Result<()> {
        self.run_gcc("-shared -fPIC", source_path, output_path, extra_flags)
    }

    fn compile_executable(
        &self,
        source_path: &Path,
        output_path: &Path,
        extra_flags: Option<&str>,
    ) -> Result<()> {
        self.run_gcc("-g -O0", source_path, output_path, extra_flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_probe_succeeds() {
        let compiler = GccCompiler::new().expect("gcc should be available");
        assert!(!compiler.version().is_empty());
        assert!(compiler.version().to_lowercase().contains("gcc")
            || compiler.version().contains('.'));
    }

    #[test]
    fn test_compile_shared_produces_artifact() {
        let compiler = GccCompiler::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("ok.c");
        let out = dir.path().join("ok.so");
        fs::write(&src, "int main(int argc, char **argv) { return 0; }\n").unwrap();

        compiler.compile_shared(&src, &out, None).unwrap();
        assert!(out.is_file());
    }

    #[test]
    fn test_compile_failure_captures_stderr_and_command() {
        let compiler = GccCompiler::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("bad.c");
        let out = dir.path().join("bad.so");
        fs::write(&src, "this is not valid C\n").unwrap();

        let err = compiler.compile_shared(&src, &out, None).unwrap_err();
        match err {
            Error::Compile { message, command } => {
                assert!(!message.is_empty());
                assert!(command.contains("-shared"));
                assert!(command.contains("bad.c"));
            }
            other => panic!("expected Compile error, got {:?}", other),
        }
    }

    #[test]
    fn test_extra_flags_are_applied() {
        let compiler = GccCompiler::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("flagged.c");
        let out = dir.path().join("flagged.so");
        fs::write(
            &src,
            "#ifndef WANTED\n#error missing define\n#endif\nint main(void) { return 0; }\n",
        )
        .unwrap();

        assert!(compiler.compile_shared(&src, &out, None).is_err());
        compiler
            .compile_shared(&src, &out, Some("-DWANTED"))
            .unwrap();
        assert!(out.is_file());
    }
}
