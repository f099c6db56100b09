//! Hook points, hook results, and the hook context.
//!
//! The context struct is `#[repr(C)]` and mirrors the declaration in
//! `include/crispy.h` field for field: plugins written in C read and
//! write it directly. Mutable string fields written by a plugin must be
//! `malloc`-allocated; the host copies them out and frees them with
//! `free(3)` after each dispatch.

use std::os::raw::{c_char, c_void};

/// A named moment in the execution pipeline at which plugin callbacks run.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    /// After the effective source has been computed.
    SourceLoaded = 0,
    /// After CRISPY_PARAMS shell expansion.
    ParamsExpanded,
    /// After the cache key has been computed.
    HashComputed,
    /// After the cache lookup (hit or miss).
    CacheChecked,
    /// Before compiler invocation (cache-miss path only).
    PreCompile,
    /// After successful compilation.
    PostCompile,
    /// After the compiled artifact has been opened.
    ModuleLoaded,
    /// Before calling the script's main().
    PreExecute,
    /// After main() returns.
    PostExecute,
}

/// Number of hook points.
pub const HOOK_POINT_COUNT: usize = 9;

impl HookPoint {
    /// All hook points in pipeline order.
    pub const ALL: [HookPoint; HOOK_POINT_COUNT] = [
        HookPoint::SourceLoaded,
        HookPoint::ParamsExpanded,
        HookPoint::HashComputed,
        HookPoint::CacheChecked,
        HookPoint::PreCompile,
        HookPoint::PostCompile,
        HookPoint::ModuleLoaded,
        HookPoint::PreExecute,
        HookPoint::PostExecute,
    ];

    /// The exported symbol a plugin provides to handle this hook.
    pub fn symbol_name(self) -> &'static str {
        match self {
            HookPoint::SourceLoaded => "crispy_plugin_on_source_loaded",
            HookPoint::ParamsExpanded => "crispy_plugin_on_params_expanded",
            HookPoint::HashComputed => "crispy_plugin_on_hash_computed",
            HookPoint::CacheChecked => "crispy_plugin_on_cache_checked",
            HookPoint::PreCompile => "crispy_plugin_on_pre_compile",
            HookPoint::PostCompile => "crispy_plugin_on_post_compile",
            HookPoint::ModuleLoaded => "crispy_plugin_on_module_loaded",
            HookPoint::PreExecute => "crispy_plugin_on_pre_execute",
            HookPoint::PostExecute => "crispy_plugin_on_post_execute",
        }
    }
}

/// Return value of a hook callback.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookResult {
    /// Proceed normally to the next phase.
    Continue = 0,
    /// Stop the pipeline. The plugin should have set `error` on the context.
    Abort = 1,
    /// Treat the cache check as a miss (meaningful from `CacheChecked`).
    ForceRecompile = 2,
}

impl From<i32> for HookResult {
    fn from(code: i32) -> Self {
        match code {
            1 => Self::Abort,
            2 => Self::ForceRecompile,
            // Unknown codes from foreign plugins proceed rather than abort.
            _ => Self::Continue,
        }
    }
}

/// Context passed to every hook callback.
///
/// Read-only fields expose current pipeline state; the mutable block lets
/// a plugin replace the effective source, inject compiler flags, rewrite
/// the script argv, or force recompilation. `plugin_data` carries the
/// opaque token returned by this plugin's initializer and is swapped in
/// before each callback. Timing fields are monotonic microseconds.
#[repr(C)]
pub struct HookContext {
    /// Which hook is firing.
    pub hook_point: HookPoint,

    // Read-only pipeline state.
    pub source_path: *const c_char,
    pub source_content: *const c_char,
    pub source_len: usize,
    pub crispy_params: *const c_char,
    pub expanded_params: *const c_char,
    pub hash: *const c_char,
    pub cached_so_path: *const c_char,
    pub compiler_version: *const c_char,
    pub temp_source_path: *const c_char,
    pub flags: u32,
    pub cache_hit: i32,

    // Mutable fields (plugins may modify these).
    pub modified_source: *mut c_char,
    pub modified_len: usize,
    pub extra_flags: *mut c_char,
    pub argc: i32,
    pub argv: *mut *mut c_char,
    pub force_recompile: i32,

    // Results.
    pub exit_code: i32,

    // Timing in microseconds.
    pub time_param_expand: i64,
    pub time_hash: i64,
    pub time_cache_check: i64,
    pub time_compile: i64,
    pub time_module_load: i64,
    pub time_execute: i64,
    pub time_total: i64,

    // Plugin access.
    pub plugin_data: *mut c_void,
    pub engine: *mut c_void,
    pub error: *mut c_char,
}

impl HookContext {
    /// An empty context with every pointer null and every counter zero.
    pub fn new() -> Self {
        Self {
            hook_point: HookPoint::SourceLoaded,
            source_path: std::ptr::null(),
            source_content: std::ptr::null(),
            source_len: 0,
            crispy_params: std::ptr::null(),
            expanded_params: std::ptr::null(),
            hash: std::ptr::null(),
            cached_so_path: std::ptr::null(),
            compiler_version: std::ptr::null(),
            temp_source_path: std::ptr::null(),
            flags: 0,
            cache_hit: 0,
            modified_source: std::ptr::null_mut(),
            modified_len: 0,
            extra_flags: std::ptr::null_mut(),
            argc: 0,
            argv: std::ptr::null_mut(),
            force_recompile: 0,
            exit_code: 0,
            time_param_expand: 0,
            time_hash: 0,
            time_cache_check: 0,
            time_compile: 0,
            time_module_load: 0,
            time_execute: 0,
            time_total: 0,
            plugin_data: std::ptr::null_mut(),
            engine: std::ptr::null_mut(),
            error: std::ptr::null_mut(),
        }
    }
}

impl Default for HookContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata descriptor every plugin exports as `crispy_plugin_info`.
#[repr(C)]
pub struct PluginInfo {
    pub name: *const c_char,
    pub description: *const c_char,
    pub version: *const c_char,
    pub author: *const c_char,
    pub license: *const c_char,
}

/// `crispy_plugin_init`: returns the opaque per-plugin state token.
pub type PluginInitFn = unsafe extern "C" fn() -> *mut c_void;

/// `crispy_plugin_shutdown`: receives the token back at engine teardown.
pub type PluginShutdownFn = unsafe extern "C" fn(*mut c_void);

/// A hook callback. The i32 result is converted through
/// [`HookResult::from`] so foreign plugins returning junk keep the
/// pipeline moving.
pub type PluginHookFn = unsafe extern "C" fn(*mut HookContext) -> i32;
