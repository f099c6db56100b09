//! Plugin system: hook contract and engine.
//!
//! A plugin is a shared object exporting well-known C symbols. The engine
//! loads them, resolves their hook tables, and dispatches callbacks at
//! each pipeline phase in load order. See `include/crispy.h` for the
//! contract as plugin authors see it.

mod engine;
mod hooks;

pub use engine::{
    crispy_plugin_engine_get_data, crispy_plugin_engine_set_data, DataDestroyFn, PluginEngine,
    PluginMetadata,
};
pub use hooks::{
    HookContext, HookPoint, HookResult, PluginHookFn, PluginInfo, PluginInitFn, PluginShutdownFn,
    HOOK_POINT_COUNT,
};
