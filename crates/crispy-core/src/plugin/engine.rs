//! Plugin loading, hook dispatch, and the shared data store.
//!
//! Plugins are shared objects loaded with lazy binding that export
//! well-known C symbols: a mandatory `crispy_plugin_info` descriptor,
//! optional `crispy_plugin_init`/`crispy_plugin_shutdown` lifecycle
//! functions, and one optional callback per hook point. Load order is
//! dispatch order; there is no priority scheme.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::path::Path;

use libloading::Library;

use crate::dylib;
use crate::error::{Error, Result};
use crate::plugin::hooks::{
    HookContext, HookPoint, HookResult, PluginHookFn, PluginInfo, PluginInitFn, PluginShutdownFn,
    HOOK_POINT_COUNT,
};

/// Destructor for a shared data store value.
pub type DataDestroyFn = unsafe extern "C" fn(*mut c_void);

/// Owned copy of a plugin's exported metadata.
#[derive(Debug, Clone)]
pub struct PluginMetadata {
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub license: String,
}

/// One loaded plugin: library handle, metadata, opaque state token, and
/// the resolved hook table.
struct PluginEntry {
    metadata: PluginMetadata,
    plugin_data: Cell<*mut c_void>,
    shutdown: Option<PluginShutdownFn>,
    hooks: [Option<PluginHookFn>; HOOK_POINT_COUNT],
    // Kept open for the life of the entry; dropped (closed) after shutdown.
    _library: Library,
}

impl Drop for PluginEntry {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown {
            unsafe { shutdown(self.plugin_data.get()) };
        }
    }
}

/// A (value, destructor) pair in the shared data store. Replacing or
/// dropping an entry runs the destructor on the old value.
struct DataEntry {
    data: *mut c_void,
    destroy: Option<DataDestroyFn>,
}

impl Drop for DataEntry {
    fn drop(&mut self) {
        if let Some(destroy) = self.destroy {
            if !self.data.is_null() {
                unsafe { destroy(self.data) };
            }
        }
    }
}

unsafe extern "C" fn destroy_cstring(ptr: *mut c_void) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr as *mut c_char));
    }
}

/// Loads plugins and dispatches hook calls during script execution.
///
/// Also owns the string-keyed data store plugins use to communicate with
/// each other and with the configuration file.
#[derive(Default)]
pub struct PluginEngine {
    plugins: Vec<PluginEntry>,
    data_store: RefCell<HashMap<String, DataEntry>>,
}

impl PluginEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load one plugin and append it to the dispatch order.
    ///
    /// # Errors
    /// Returns [`Error::Plugin`] when the library cannot be opened or does
    /// not export `crispy_plugin_info`.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let library = dylib::open_lazy(path).map_err(|e| {
            Error::Plugin(format!("failed to load plugin '{}': {}", path.display(), e))
        })?;

        // Mandatory descriptor. dlsym hands back the address of the static,
        // so the symbol reads as a pointer to the descriptor struct.
        let info_ptr: *const PluginInfo = unsafe {
            match library.get::<*const PluginInfo>(b"crispy_plugin_info") {
                Ok(symbol) => *symbol,
                Err(e) => {
                    return Err(Error::Plugin(format!(
                        "plugin '{}' does not export 'crispy_plugin_info': {}",
                        path.display(),
                        e
                    )));
                }
            }
        };
        if info_ptr.is_null() {
            return Err(Error::Plugin(format!(
                "plugin '{}' exports a null 'crispy_plugin_info'",
                path.display()
            )));
        }
        let metadata = unsafe { read_metadata(info_ptr) };

        // Optional lifecycle functions. Function pointers are copied out of
        // the symbols so the library can move into the entry.
        let init: Option<PluginInitFn> =
            unsafe { library.get::<PluginInitFn>(b"crispy_plugin_init").ok().map(|s| *s) };
        let shutdown: Option<PluginShutdownFn> = unsafe {
            library
                .get::<PluginShutdownFn>(b"crispy_plugin_shutdown")
                .ok()
                .map(|s| *s)
        };

        // Optional hook callbacks, one per hook point.
        let mut hooks: [Option<PluginHookFn>; HOOK_POINT_COUNT] = [None; HOOK_POINT_COUNT];
        for point in HookPoint::ALL {
            hooks[point as usize] = unsafe {
                library
                    .get::<PluginHookFn>(point.symbol_name().as_bytes())
                    .ok()
                    .map(|s| *s)
            };
        }

        let plugin_data = match init {
            Some(init) => unsafe { init() },
            None => std::ptr::null_mut(),
        };

        tracing::debug!(
            "loaded plugin '{}' v{} from {}",
            metadata.name,
            metadata.version,
            path.display()
        );

        self.plugins.push(PluginEntry {
            metadata,
            plugin_data: Cell::new(plugin_data),
            shutdown,
            hooks,
            _library: library,
        });
        Ok(())
    }

    /// Load a delimiter-separated list of plugin paths (`:` and `,` both
    /// delimit), stopping at the first failure.
    pub fn load_paths(&mut self, paths: &str) -> Result<()> {
        for token in paths.split([':', ',']) {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            self.load(token)?;
        }
        Ok(())
    }

    /// Number of loaded plugins.
    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Metadata of every loaded plugin, in dispatch order.
    pub fn plugin_metadata(&self) -> impl Iterator<Item = &PluginMetadata> + '_ {
        self.plugins.iter().map(|entry| &entry.metadata)
    }

    /// Dispatch a hook to every plugin in load order.
    ///
    /// The context's `hook_point` and `engine` fields are set here; each
    /// entry's opaque token is swapped into `plugin_data` around its
    /// callback and any update is copied back. The first non-Continue
    /// result stops the walk and is returned.
    pub fn dispatch(&self, point: HookPoint, ctx: &mut HookContext) -> HookResult {
        ctx.hook_point = point;
        ctx.engine = self as *const PluginEngine as *mut c_void;

        for entry in &self.plugins {
            let Some(hook) = entry.hooks[point as usize] else {
                continue;
            };

            ctx.plugin_data = entry.plugin_data.get();
            let result = HookResult::from(unsafe { hook(ctx) });
            entry.plugin_data.set(ctx.plugin_data);

            if result != HookResult::Continue {
                tracing::debug!(
                    "plugin '{}' returned {:?} at {:?}",
                    entry.metadata.name,
                    result,
                    point
                );
                return result;
            }
        }

        HookResult::Continue
    }

    /// Store a value under `key`, replacing (and destroying) any previous
    /// value.
    pub fn set_data(&self, key: &str, data: *mut c_void, destroy: Option<DataDestroyFn>) {
        self.data_store
            .borrow_mut()
            .insert(key.to_string(), DataEntry { data, destroy });
    }

    /// Store an owned string under `key`. The value is handed to plugins
    /// as a NUL-terminated C string.
    pub fn set_data_string(&self, key: &str, value: &str) {
        let cstring = CString::new(value).unwrap_or_default();
        self.set_data(key, cstring.into_raw() as *mut c_void, Some(destroy_cstring));
    }

    /// Fetch the value stored under `key`, or null.
    pub fn get_data(&self, key: &str) -> *mut c_void {
        self.data_store
            .borrow()
            .get(key)
            .map_or(std::ptr::null_mut(), |entry| entry.data)
    }
}

unsafe fn read_metadata(info: *const PluginInfo) -> PluginMetadata {
    unsafe fn field(ptr: *const c_char, fallback: &str) -> String {
        if ptr.is_null() {
            fallback.to_string()
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }

    let info = &*info;
    PluginMetadata {
        name: field(info.name, "unknown"),
        description: field(info.description, ""),
        version: field(info.version, "0.0.0"),
        author: field(info.author, ""),
        license: field(info.license, ""),
    }
}

// --- C-visible data store accessors ---
//
// Plugins reach the store through the `engine` back-reference on the hook
// context. These live next to the engine impl so they survive into the
// final link; the host binaries export them via -rdynamic.

/// Store a value in the engine's shared data store (C plugin API).
///
/// # Safety
/// `engine` must be the `engine` pointer taken from a live hook context;
/// `key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn crispy_plugin_engine_set_data(
    engine: *mut c_void,
    key: *const c_char,
    data: *mut c_void,
    destroy: Option<DataDestroyFn>,
) {
    if engine.is_null() || key.is_null() {
        return;
    }
    let engine = &*(engine as *const PluginEngine);
    let key = CStr::from_ptr(key).to_string_lossy();
    engine.set_data(&key, data, destroy);
}

/// Fetch a value from the engine's shared data store (C plugin API).
///
/// # Safety
/// Same requirements as [`crispy_plugin_engine_set_data`].
#[no_mangle]
pub unsafe extern "C" fn crispy_plugin_engine_get_data(
    engine: *mut c_void,
    key: *const c_char,
) -> *mut c_void {
    if engine.is_null() || key.is_null() {
        return std::ptr::null_mut();
    }
    let engine = &*(engine as *const PluginEngine);
    let key = CStr::from_ptr(key).to_string_lossy();
    engine.get_data(&key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DESTROY_COUNT: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn counting_destroy(_data: *mut c_void) {
        DESTROY_COUNT.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_dispatch_with_no_plugins_continues() {
        let engine = PluginEngine::new();
        let mut ctx = HookContext::new();
        assert_eq!(
            engine.dispatch(HookPoint::PreExecute, &mut ctx),
            HookResult::Continue
        );
        assert_eq!(ctx.hook_point, HookPoint::PreExecute);
        assert!(!ctx.engine.is_null());
    }

    #[test]
    fn test_load_missing_library_is_plugin_error() {
        let mut engine = PluginEngine::new();
        let err = engine.load("/nonexistent/plugin.so").unwrap_err();
        assert!(matches!(err, Error::Plugin(_)));
        assert_eq!(engine.plugin_count(), 0);
    }

    #[test]
    fn test_load_paths_skips_empty_tokens() {
        let mut engine = PluginEngine::new();
        engine.load_paths(" : ,, ").unwrap();
        assert_eq!(engine.plugin_count(), 0);
    }

    #[test]
    fn test_data_store_set_get() {
        let engine = PluginEngine::new();
        assert!(engine.get_data("missing").is_null());

        engine.set_data_string("greeting", "hello");
        let ptr = engine.get_data("greeting");
        assert!(!ptr.is_null());
        let value = unsafe { CStr::from_ptr(ptr as *const c_char) };
        assert_eq!(value.to_str().unwrap(), "hello");
    }

    #[test]
    fn test_data_store_replace_runs_destructor() {
        DESTROY_COUNT.store(0, Ordering::SeqCst);
        {
            let engine = PluginEngine::new();
            engine.set_data("k", 0x1usize as *mut c_void, Some(counting_destroy));
            engine.set_data("k", 0x2usize as *mut c_void, Some(counting_destroy));
            assert_eq!(DESTROY_COUNT.load(Ordering::SeqCst), 1);
        }
        // Engine drop frees the remaining value.
        assert_eq!(DESTROY_COUNT.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_c_accessors_roundtrip() {
        let engine = PluginEngine::new();
        engine.set_data_string("key", "value");

        let engine_ptr = &engine as *const PluginEngine as *mut c_void;
        let key = CString::new("key").unwrap();
        let ptr = unsafe { crispy_plugin_engine_get_data(engine_ptr, key.as_ptr()) };
        let value = unsafe { CStr::from_ptr(ptr as *const c_char) };
        assert_eq!(value.to_str().unwrap(), "value");

        assert!(unsafe {
            crispy_plugin_engine_get_data(std::ptr::null_mut(), key.as_ptr()).is_null()
        });
    }
}
