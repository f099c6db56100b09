//! Configuration context.
//!
//! A short-lived record handed (as an opaque pointer) to the compiled
//! configuration artifact's `crispy_config_init` entry point. Config
//! authors manipulate it exclusively through the exported
//! `crispy_config_context_*` functions below; after the initializer
//! returns, the front end harvests the accumulated settings.
//!
//! This is deliberately a separate type from the hook context: the config
//! context exists once, before the pipeline starts, while hook contexts
//! are repopulated throughout it.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uint};
use std::path::{Path, PathBuf};

/// Settings harvested from a configuration artifact.
pub struct ConfigContext {
    // Read-only: crispy's own command line.
    crispy_args: Vec<CString>,
    crispy_argv_ptrs: Vec<*const c_char>,

    // Mutable: the script's command line.
    script_args: Vec<CString>,
    script_argv_ptrs: Vec<*mut c_char>,
    script_argv_replaced: bool,

    script_path: Option<CString>,

    // Compiler flag layers.
    extra_flags: Option<String>,
    override_flags: Option<String>,

    // Plugin configuration.
    plugin_paths: Vec<String>,
    plugin_data: HashMap<String, String>,

    // Mode flag bits (see `script::Flags`).
    flags: u32,
    flags_set: bool,

    cache_dir: Option<PathBuf>,
}

impl ConfigContext {
    /// Build a context for one run. `script_path` is `None` for inline
    /// and stdin modes.
    pub fn new(
        crispy_args: &[String],
        script_args: &[String],
        script_path: Option<&Path>,
    ) -> Self {
        let crispy_args: Vec<CString> = crispy_args.iter().map(|a| to_cstring(a)).collect();
        let mut crispy_argv_ptrs: Vec<*const c_char> =
            crispy_args.iter().map(|c| c.as_ptr()).collect();
        crispy_argv_ptrs.push(std::ptr::null());

        let script_args: Vec<CString> = script_args.iter().map(|a| to_cstring(a)).collect();
        let mut script_argv_ptrs: Vec<*mut c_char> = script_args
            .iter()
            .map(|c| c.as_ptr() as *mut c_char)
            .collect();
        script_argv_ptrs.push(std::ptr::null_mut());

        Self {
            crispy_args,
            crispy_argv_ptrs,
            script_args,
            script_argv_ptrs,
            script_argv_replaced: false,
            script_path: script_path.map(|p| to_cstring(&p.display().to_string())),
            extra_flags: None,
            override_flags: None,
            plugin_paths: Vec::new(),
            plugin_data: HashMap::new(),
            flags: 0,
            flags_set: false,
            cache_dir: None,
        }
    }

    /// Default compiler flags, prepended before CRISPY_PARAMS.
    pub fn extra_flags(&self) -> Option<&str> {
        self.extra_flags.as_deref()
    }

    /// Override compiler flags, appended after everything else.
    pub fn override_flags(&self) -> Option<&str> {
        self.override_flags.as_deref()
    }

    /// Plugin paths queued for loading, in the order they were added.
    pub fn plugin_paths(&self) -> &[String] {
        &self.plugin_paths
    }

    /// Key-value data destined for the plugin engine's shared store.
    pub fn plugin_data(&self) -> &HashMap<String, String> {
        &self.plugin_data
    }

    /// The configured mode-flag bits, and whether any were set at all.
    pub fn flags(&self) -> (u32, bool) {
        (self.flags, self.flags_set)
    }

    /// Cache directory override, if any.
    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// The replacement script argv, if the config installed one.
    pub fn replacement_script_args(&self) -> Option<Vec<String>> {
        if !self.script_argv_replaced {
            return None;
        }
        Some(
            self.script_args
                .iter()
                .map(|c| c.to_string_lossy().into_owned())
                .collect(),
        )
    }

    fn append_flag_layer(layer: &mut Option<String>, flags: &str) {
        match layer {
            Some(existing) => {
                existing.push(' ');
                existing.push_str(flags);
            }
            None => *layer = Some(flags.to_string()),
        }
    }

    fn replace_script_args(&mut self, args: Vec<CString>) {
        self.script_args = args;
        self.script_argv_ptrs = self
            .script_args
            .iter()
            .map(|c| c.as_ptr() as *mut c_char)
            .collect();
        self.script_argv_ptrs.push(std::ptr::null_mut());
        self.script_argv_replaced = true;
    }
}

fn to_cstring(s: &str) -> CString {
    CString::new(s).unwrap_or_default()
}

unsafe fn cstr_arg<'a>(ptr: *const c_char) -> Option<std::borrow::Cow<'a, str>> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy())
    }
}

// --- C-visible API for config authors ---
//
// Declared in include/crispy.h. The host binaries link with -rdynamic so
// config artifacts resolve these at call time; keeping them in the same
// module as the context impl keeps them in the final link.

/// Crispy's own argument count (C config API).
///
/// # Safety
/// `ctx` must be the pointer passed to `crispy_config_init`.
#[no_mangle]
pub unsafe extern "C" fn crispy_config_context_get_crispy_argc(ctx: *const ConfigContext) -> c_int {
    if ctx.is_null() {
        return 0;
    }
    (*ctx).crispy_args.len() as c_int
}

/// Crispy's own argument vector, NULL-terminated and read-only.
///
/// # Safety
/// `ctx` must be the pointer passed to `crispy_config_init`.
#[no_mangle]
pub unsafe extern "C" fn crispy_config_context_get_crispy_argv(
    ctx: *const ConfigContext,
) -> *const *const c_char {
    if ctx.is_null() {
        return std::ptr::null();
    }
    (*ctx).crispy_argv_ptrs.as_ptr()
}

/// The script's argument count.
///
/// # Safety
/// `ctx` must be the pointer passed to `crispy_config_init`.
#[no_mangle]
pub unsafe extern "C" fn crispy_config_context_get_script_argc(ctx: *const ConfigContext) -> c_int {
    if ctx.is_null() {
        return 0;
    }
    (*ctx).script_args.len() as c_int
}

/// The script's argument vector, NULL-terminated.
///
/// # Safety
/// `ctx` must be the pointer passed to `crispy_config_init`.
#[no_mangle]
pub unsafe extern "C" fn crispy_config_context_get_script_argv(
    ctx: *const ConfigContext,
) -> *const *mut c_char {
    if ctx.is_null() {
        return std::ptr::null();
    }
    (*ctx).script_argv_ptrs.as_ptr()
}

/// Path of the script about to run, or NULL for inline/stdin modes.
///
/// # Safety
/// `ctx` must be the pointer passed to `crispy_config_init`.
#[no_mangle]
pub unsafe extern "C" fn crispy_config_context_get_script_path(
    ctx: *const ConfigContext,
) -> *const c_char {
    if ctx.is_null() {
        return std::ptr::null();
    }
    match &(*ctx).script_path {
        Some(path) => path.as_ptr(),
        None => std::ptr::null(),
    }
}

/// Set default compiler flags, prepended before CRISPY_PARAMS (lowest
/// priority). Replaces any previous value.
///
/// # Safety
/// `ctx` must be the pointer passed to `crispy_config_init`; `flags` must
/// be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn crispy_config_context_set_extra_flags(
    ctx: *mut ConfigContext,
    flags: *const c_char,
) {
    if ctx.is_null() {
        return;
    }
    (*ctx).extra_flags = cstr_arg(flags).map(|f| f.into_owned());
}

/// Append to the default compiler flags (space-separated).
///
/// # Safety
/// Same requirements as [`crispy_config_context_set_extra_flags`].
#[no_mangle]
pub unsafe extern "C" fn crispy_config_context_append_extra_flags(
    ctx: *mut ConfigContext,
    flags: *const c_char,
) {
    if ctx.is_null() {
        return;
    }
    if let Some(flags) = cstr_arg(flags) {
        ConfigContext::append_flag_layer(&mut (*ctx).extra_flags, &flags);
    }
}

/// Set override compiler flags, appended after everything else (highest
/// priority). Replaces any previous value.
///
/// # Safety
/// Same requirements as [`crispy_config_context_set_extra_flags`].
#[no_mangle]
pub unsafe extern "C" fn crispy_config_context_set_override_flags(
    ctx: *mut ConfigContext,
    flags: *const c_char,
) {
    if ctx.is_null() {
        return;
    }
    (*ctx).override_flags = cstr_arg(flags).map(|f| f.into_owned());
}

/// Append to the override compiler flags (space-separated).
///
/// # Safety
/// Same requirements as [`crispy_config_context_set_extra_flags`].
#[no_mangle]
pub unsafe extern "C" fn crispy_config_context_append_override_flags(
    ctx: *mut ConfigContext,
    flags: *const c_char,
) {
    if ctx.is_null() {
        return;
    }
    if let Some(flags) = cstr_arg(flags) {
        ConfigContext::append_flag_layer(&mut (*ctx).override_flags, &flags);
    }
}

/// Queue a plugin for loading. Config plugins load before CLI plugins;
/// multiple calls accumulate in order.
///
/// # Safety
/// Same requirements as [`crispy_config_context_set_extra_flags`].
#[no_mangle]
pub unsafe extern "C" fn crispy_config_context_add_plugin(
    ctx: *mut ConfigContext,
    plugin_path: *const c_char,
) {
    if ctx.is_null() {
        return;
    }
    if let Some(path) = cstr_arg(plugin_path) {
        (*ctx).plugin_paths.push(path.into_owned());
    }
}

/// Store a key-value pair destined for the plugin engine's shared data
/// store.
///
/// # Safety
/// Same requirements as [`crispy_config_context_set_extra_flags`].
#[no_mangle]
pub unsafe extern "C" fn crispy_config_context_set_plugin_data(
    ctx: *mut ConfigContext,
    key: *const c_char,
    value: *const c_char,
) {
    if ctx.is_null() {
        return;
    }
    if let (Some(key), Some(value)) = (cstr_arg(key), cstr_arg(value)) {
        (*ctx)
            .plugin_data
            .insert(key.into_owned(), value.into_owned());
    }
}

/// Set the base mode-flag bitmask. CLI flags are OR'd on top.
///
/// # Safety
/// `ctx` must be the pointer passed to `crispy_config_init`.
#[no_mangle]
pub unsafe extern "C" fn crispy_config_context_set_flags(ctx: *mut ConfigContext, flags: c_uint) {
    if ctx.is_null() {
        return;
    }
    (*ctx).flags = flags;
    (*ctx).flags_set = true;
}

/// OR additional bits into the mode-flag bitmask.
///
/// # Safety
/// `ctx` must be the pointer passed to `crispy_config_init`.
#[no_mangle]
pub unsafe extern "C" fn crispy_config_context_add_flags(ctx: *mut ConfigContext, flags: c_uint) {
    if ctx.is_null() {
        return;
    }
    (*ctx).flags |= flags;
    (*ctx).flags_set = true;
}

/// Override the cache directory.
///
/// # Safety
/// Same requirements as [`crispy_config_context_set_extra_flags`].
#[no_mangle]
pub unsafe extern "C" fn crispy_config_context_set_cache_dir(
    ctx: *mut ConfigContext,
    cache_dir: *const c_char,
) {
    if ctx.is_null() {
        return;
    }
    (*ctx).cache_dir = cstr_arg(cache_dir).map(|d| PathBuf::from(d.into_owned()));
}

/// Replace the script's argv entirely. The context copies the strings;
/// the caller keeps ownership of `argv`.
///
/// # Safety
/// `argv` must point to `argc` valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn crispy_config_context_set_script_argv(
    ctx: *mut ConfigContext,
    argc: c_int,
    argv: *const *const c_char,
) {
    if ctx.is_null() || argv.is_null() || argc < 0 {
        return;
    }
    let mut args = Vec::with_capacity(argc as usize);
    for i in 0..argc as usize {
        let ptr = *argv.add(i);
        if ptr.is_null() {
            break;
        }
        args.push(CStr::from_ptr(ptr).to_owned());
    }
    (*ctx).replace_script_args(args);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ConfigContext {
        ConfigContext::new(
            &["crispy".to_string(), "-n".to_string()],
            &["script.c".to_string(), "arg".to_string()],
            Some(Path::new("script.c")),
        )
    }

    fn cs(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    #[test]
    fn test_read_only_accessors() {
        let ctx = ctx();
        let ptr = &ctx as *const ConfigContext;
        unsafe {
            assert_eq!(crispy_config_context_get_crispy_argc(ptr), 2);
            assert_eq!(crispy_config_context_get_script_argc(ptr), 2);

            let argv = crispy_config_context_get_crispy_argv(ptr);
            assert_eq!(CStr::from_ptr(*argv).to_str().unwrap(), "crispy");
            assert!((*argv.add(2)).is_null());

            let path = crispy_config_context_get_script_path(ptr);
            assert_eq!(CStr::from_ptr(path).to_str().unwrap(), "script.c");
        }
    }

    #[test]
    fn test_script_path_null_for_inline() {
        let ctx = ConfigContext::new(&["crispy".to_string()], &[], None);
        let ptr = &ctx as *const ConfigContext;
        unsafe {
            assert!(crispy_config_context_get_script_path(ptr).is_null());
        }
    }

    #[test]
    fn test_flag_layers_set_and_append() {
        let mut ctx = ctx();
        let ptr = &mut ctx as *mut ConfigContext;
        unsafe {
            crispy_config_context_set_extra_flags(ptr, cs("-lm").as_ptr());
            crispy_config_context_append_extra_flags(ptr, cs("-O2").as_ptr());
            crispy_config_context_set_override_flags(ptr, cs("-Wall").as_ptr());
            crispy_config_context_set_override_flags(ptr, cs("-Werror").as_ptr());
        }
        assert_eq!(ctx.extra_flags(), Some("-lm -O2"));
        assert_eq!(ctx.override_flags(), Some("-Werror"));
    }

    #[test]
    fn test_plugins_and_data() {
        let mut ctx = ctx();
        let ptr = &mut ctx as *mut ConfigContext;
        unsafe {
            crispy_config_context_add_plugin(ptr, cs("/a.so").as_ptr());
            crispy_config_context_add_plugin(ptr, cs("/b.so").as_ptr());
            crispy_config_context_set_plugin_data(ptr, cs("k").as_ptr(), cs("v1").as_ptr());
            crispy_config_context_set_plugin_data(ptr, cs("k").as_ptr(), cs("v2").as_ptr());
        }
        assert_eq!(ctx.plugin_paths(), &["/a.so", "/b.so"]);
        assert_eq!(ctx.plugin_data().get("k").map(String::as_str), Some("v2"));
    }

    #[test]
    fn test_flags_tracking() {
        let mut ctx = ctx();
        assert_eq!(ctx.flags(), (0, false));
        let ptr = &mut ctx as *mut ConfigContext;
        unsafe {
            crispy_config_context_set_flags(ptr, 1);
            crispy_config_context_add_flags(ptr, 4);
        }
        assert_eq!(ctx.flags(), (5, true));
    }

    #[test]
    fn test_cache_dir_override() {
        let mut ctx = ctx();
        let ptr = &mut ctx as *mut ConfigContext;
        unsafe {
            crispy_config_context_set_cache_dir(ptr, cs("/tmp/altcache").as_ptr());
        }
        assert_eq!(ctx.cache_dir(), Some(Path::new("/tmp/altcache")));
    }

    #[test]
    fn test_script_argv_replacement() {
        let mut ctx = ctx();
        assert!(ctx.replacement_script_args().is_none());

        let a = cs("new.c");
        let b = cs("--fast");
        let argv = [a.as_ptr(), b.as_ptr()];
        let ptr = &mut ctx as *mut ConfigContext;
        unsafe {
            crispy_config_context_set_script_argv(ptr, 2, argv.as_ptr());
            assert_eq!(crispy_config_context_get_script_argc(ptr), 2);
        }
        assert_eq!(
            ctx.replacement_script_args(),
            Some(vec!["new.c".to_string(), "--fast".to_string()])
        );
    }

    #[test]
    fn test_null_context_is_ignored() {
        unsafe {
            assert_eq!(crispy_config_context_get_crispy_argc(std::ptr::null()), 0);
            crispy_config_context_set_extra_flags(std::ptr::null_mut(), cs("-lm").as_ptr());
        }
    }
}
