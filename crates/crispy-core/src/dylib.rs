//! Dynamic library opening with lazy symbol binding.

use std::path::Path;

use libloading::Library;

/// Open a shared object with `RTLD_LAZY`, matching the binding mode used
/// for cached artifacts, plugins, configuration modules, and preloads.
/// Lazy binding lets artifacts reference symbols that only resolve once
/// the host process is in the picture (the exported config/engine API).
pub fn open_lazy(path: &Path) -> Result<Library, libloading::Error> {
    let library =
        unsafe { libloading::os::unix::Library::open(Some(path), libloading::os::unix::RTLD_LAZY)? };
    Ok(Library::from(library))
}
