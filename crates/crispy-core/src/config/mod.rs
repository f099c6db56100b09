//! Configuration system.
//!
//! A configuration file is C source compiled into a shared object through
//! the same backend and cache as scripts. Its `crispy_config_init` entry
//! point receives an opaque [`ConfigContext`] pointer and shapes the run:
//! default and override compiler flags, plugins to auto-load, plugin
//! data, mode flags, the cache directory, and even the script argv.

mod context;
mod loader;

pub use context::ConfigContext;
pub use loader::{compile_and_load, config_disabled, find_config_file};

// The C-visible context API is exported so config artifacts can resolve
// it from the host process.
pub use context::{
    crispy_config_context_add_flags, crispy_config_context_add_plugin,
    crispy_config_context_append_extra_flags, crispy_config_context_append_override_flags,
    crispy_config_context_get_crispy_argc, crispy_config_context_get_crispy_argv,
    crispy_config_context_get_script_argc, crispy_config_context_get_script_argv,
    crispy_config_context_get_script_path, crispy_config_context_set_cache_dir,
    crispy_config_context_set_extra_flags, crispy_config_context_set_flags,
    crispy_config_context_set_override_flags, crispy_config_context_set_plugin_data,
    crispy_config_context_set_script_argv,
};
