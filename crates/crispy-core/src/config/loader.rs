//! Configuration file location, compilation, and loading.
//!
//! The configuration file is an ordinary C source compiled through the
//! same compiler backend and cache provider as scripts, then loaded and
//! asked for its `crispy_config_init` entry point. It does not run the
//! script pipeline and no plugin hooks fire for it.

use std::os::raw::c_int;
use std::path::{Path, PathBuf};
use std::process::Command;

use libloading::Library;

use crate::cache::CacheProvider;
use crate::compiler::Compiler;
use crate::config::ConfigContext;
use crate::dylib;
use crate::error::{Error, Result};
use crate::source;

/// Signature of the configuration artifact's entry point. A zero return
/// means the settings were not applied.
type ConfigInitFn = unsafe extern "C" fn(*mut ConfigContext) -> c_int;

/// Whether configuration loading is disabled for this process.
pub fn config_disabled() -> bool {
    std::env::var_os("NO_CRISPY_CONFIG").is_some()
}

/// Locate the configuration source file.
///
/// Probes, in order: the `CRISPY_CONFIG_FILE` environment variable, the
/// explicit path (from `-c/--config`), `~/.config/crispy/config.c`,
/// `/etc/crispy/config.c`, `/usr/share/crispy/config.c`. The first that
/// resolves to a regular file wins; `None` means "run with defaults".
pub fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(env_path) = std::env::var_os("CRISPY_CONFIG_FILE") {
        let env_path = PathBuf::from(env_path);
        if env_path.is_file() {
            return Some(env_path);
        }
    }

    if let Some(explicit) = explicit {
        if explicit.is_file() {
            return Some(explicit.to_path_buf());
        }
    }

    if let Some(user_config) = dirs::config_dir() {
        let path = user_config.join("crispy").join("config.c");
        if path.is_file() {
            return Some(path);
        }
    }

    for system_path in ["/etc/crispy/config.c", "/usr/share/crispy/config.c"] {
        let path = Path::new(system_path);
        if path.is_file() {
            return Some(path.to_path_buf());
        }
    }

    None
}

/// Compile (or reuse a cached build of) the configuration source, load
/// it, and run its initializer against `ctx`.
///
/// Returns the loaded library on success; the caller must keep it open
/// for the life of the process so symbols the config exposes stay valid.
///
/// # Errors
/// Any compile, load, missing-initializer, or initializer-declined
/// failure surfaces as [`Error::Config`].
pub fn compile_and_load(
    config_path: &Path,
    compiler: &dyn Compiler,
    cache: &dyn CacheProvider,
    ctx: &mut ConfigContext,
) -> Result<Library> {
    let source_content = std::fs::read(config_path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .map_err(|e| Error::Config(format!("cannot read {}: {}", config_path.display(), e)))?;

    // The config source may carry its own CRISPY_PARAMS for extra flags.
    let raw_params = source::extract_params(&source_content);
    let expanded_params = source::shell_expand(raw_params.as_deref())
        .map_err(|e| Error::Config(e.to_string()))?;

    // Include flags so the config can #include <crispy.h>.
    let include = include_flags();
    let extra_flags = [include.as_str(), expanded_params.as_str()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    let extra_flags = (!extra_flags.is_empty()).then_some(extra_flags.as_str());

    let hash = cache.compute_hash(source_content.as_bytes(), extra_flags, compiler.version());
    let artifact = cache.path_for(&hash);

    if cache.has_valid(&hash, Some(config_path)) {
        tracing::debug!("config cache hit: {}", artifact.display());
    } else {
        tracing::debug!(
            "config compile: {} -> {}",
            config_path.display(),
            artifact.display()
        );
        compiler
            .compile_shared(config_path, &artifact, extra_flags)
            .map_err(|e| Error::Config(e.to_string()))?;
    }

    let library = dylib::open_lazy(&artifact).map_err(|e| {
        Error::Config(format!(
            "failed to load config module '{}': {}",
            artifact.display(),
            e
        ))
    })?;

    let init: ConfigInitFn = unsafe {
        match library.get::<ConfigInitFn>(b"crispy_config_init") {
            Ok(symbol) => *symbol,
            Err(e) => {
                return Err(Error::Config(format!(
                    "symbol 'crispy_config_init' not found in '{}': {}",
                    artifact.display(),
                    e
                )));
            }
        }
    };

    let applied = unsafe { init(ctx as *mut ConfigContext) };
    if applied == 0 {
        return Err(Error::Config(format!(
            "crispy_config_init() returned FALSE in '{}'",
            config_path.display()
        )));
    }

    Ok(library)
}

/// Flags that let a config source locate the umbrella header.
///
/// Development builds point at the in-tree `include/` directory; an
/// installed crispy answers through pkg-config. Configs that declare the
/// API themselves work either way, so this degrades to empty.
fn include_flags() -> String {
    let dev_include = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("include");
    if dev_include.join("crispy.h").is_file() {
        return format!("-I{}", dev_include.display());
    }

    let result = Command::new("pkg-config")
        .args(["--cflags", "crispy"])
        .output();
    if let Ok(output) = result {
        if output.status.success() {
            return String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
    }

    String::new()
}
