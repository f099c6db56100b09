//! Script orchestrator: the pipeline from source text to exit code.
//!
//! A [`Script`] carries one source artifact and drives the compiler
//! backend, cache provider, dynamic loader, and plugin engine through a
//! fixed sequence of phases. Each phase is followed by a hook dispatch;
//! on a cache hit the whole compile path is skipped.

use std::ffi::{CStr, CString};
use std::fs;
use std::io::Write as _;
use std::os::raw::{c_char, c_int, c_void};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use libloading::Library;

use crate::cache::CacheProvider;
use crate::compiler::Compiler;
use crate::dylib;
use crate::error::{Error, Result};
use crate::plugin::{HookContext, HookPoint, HookResult, PluginEngine};
use crate::source;

/// The script's entry point, conventional C main.
type MainFn = unsafe extern "C" fn(c_int, *mut *mut c_char) -> c_int;

/// Mode flags controlling compilation and execution behavior.
///
/// The bit values are part of the C-visible contract (hook contexts and
/// config files see the raw bitmask).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(u32);

impl Flags {
    /// No special behavior.
    pub const NONE: Flags = Flags(0);
    /// Skip cache validity, always recompile.
    pub const FORCE_COMPILE: Flags = Flags(1 << 0);
    /// Keep the temp source file after the run.
    pub const PRESERVE_SOURCE: Flags = Flags(1 << 1);
    /// Print the intended compilation and exit successfully.
    pub const DRY_RUN: Flags = Flags(1 << 2);
    /// Compile a debuggable executable and transfer to gdb.
    pub const DEBUG_LAUNCH: Flags = Flags(1 << 3);

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Flags {
        Flags(bits)
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

/// The in-flight temp source path, consulted by the front end's signal
/// handler so an interrupted run still cleans up after itself.
static ACTIVE_TEMP_SOURCE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Path of the temp source currently on disk, if any.
pub fn active_temp_source() -> Option<PathBuf> {
    ACTIVE_TEMP_SOURCE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

fn set_active_temp_source(path: Option<PathBuf>) {
    *ACTIVE_TEMP_SOURCE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = path;
}

/// Orchestrates the full lifecycle of one script run.
pub struct Script {
    compiler: Arc<dyn Compiler>,
    cache: Arc<dyn CacheProvider>,
    engine: Option<Arc<PluginEngine>>,
    flags: Flags,

    /// Original script path; `None` for inline and stdin sources.
    source_path: Option<PathBuf>,
    /// Full original source text (what the hash is computed over).
    source_content: String,
    /// Extracted CRISPY_PARAMS value.
    crispy_params: Option<String>,
    /// Effective source: shebang and first directive line removed.
    modified_source: String,

    /// Flag layers provided by the configuration file.
    default_flags: Option<String>,
    override_flags: Option<String>,

    // Run state.
    expanded_params: Option<String>,
    hash: Option<String>,
    cached_so_path: Option<PathBuf>,
    temp_source_path: Option<PathBuf>,
    cache_hit: bool,
    module: Option<Library>,
    exit_code: i32,
}

impl Script {
    /// Create a script from a file on disk.
    pub fn from_file(
        path: impl Into<PathBuf>,
        compiler: Arc<dyn Compiler>,
        cache: Arc<dyn CacheProvider>,
        flags: Flags,
    ) -> Result<Self> {
        let path = path.into();
        let content = fs::read(&path).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())?;
        Ok(Self::from_source(content, Some(path), compiler, cache, flags))
    }

    /// Create a script from an inline code fragment.
    ///
    /// The fragment becomes the body of a conventional `main`, preceded
    /// by a fixed set of default includes plus any extra headers from the
    /// semicolon-separated `extra_includes` list. Inline source carries
    /// no shebang and no directive.
    pub fn from_inline(
        code: &str,
        extra_includes: Option<&str>,
        compiler: Arc<dyn Compiler>,
        cache: Arc<dyn CacheProvider>,
        flags: Flags,
    ) -> Self {
        let content = build_inline_source(code, extra_includes);
        let modified = content.clone();
        Self {
            compiler,
            cache,
            engine: None,
            flags,
            source_path: None,
            source_content: content,
            crispy_params: None,
            modified_source: modified,
            default_flags: None,
            override_flags: None,
            expanded_params: None,
            hash: None,
            cached_so_path: None,
            temp_source_path: None,
            cache_hit: false,
            module: None,
            exit_code: -1,
        }
    }

    /// Create a script by reading standard input to end-of-stream. The
    /// result behaves like a file with no path.
    pub fn from_stdin(
        compiler: Arc<dyn Compiler>,
        cache: Arc<dyn CacheProvider>,
        flags: Flags,
    ) -> Result<Self> {
        let content = std::io::read_to_string(std::io::stdin())?;
        Ok(Self::from_source(content, None, compiler, cache, flags))
    }

    fn from_source(
        content: String,
        path: Option<PathBuf>,
        compiler: Arc<dyn Compiler>,
        cache: Arc<dyn CacheProvider>,
        flags: Flags,
    ) -> Self {
        let crispy_params = source::extract_params(&content);
        let (modified_source, _) = source::strip_header(&content);
        Self {
            compiler,
            cache,
            engine: None,
            flags,
            source_path: path,
            source_content: content,
            crispy_params,
            modified_source,
            default_flags: None,
            override_flags: None,
            expanded_params: None,
            hash: None,
            cached_so_path: None,
            temp_source_path: None,
            cache_hit: false,
            module: None,
            exit_code: -1,
        }
    }

    /// Attach a plugin engine; hooks dispatch through it in load order.
    pub fn set_engine(&mut self, engine: Arc<PluginEngine>) {
        self.engine = Some(engine);
    }

    /// Config-provided default flags, prepended before CRISPY_PARAMS.
    pub fn set_default_flags(&mut self, flags: Option<String>) {
        self.default_flags = flags;
    }

    /// Config-provided override flags, appended after everything else.
    pub fn set_override_flags(&mut self, flags: Option<String>) {
        self.override_flags = flags;
    }

    /// The cache key computed during the last run, if any.
    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    /// Path of the temp source written during the last run, if any.
    pub fn temp_source_path(&self) -> Option<&Path> {
        self.temp_source_path.as_deref()
    }

    /// Exit code of the last run (-1 before any run completes).
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Run the pipeline and return the script's exit code.
    pub fn execute(&mut self, args: &[String]) -> Result<i32> {
        let started = Instant::now();
        let mut state = HookState::new(args);
        self.exit_code = -1;

        // Phase 1: effective source is ready (computed at construction).
        self.dispatch_hook(&mut state, HookPoint::SourceLoaded, started)?;

        // Phase 2: shell-expand CRISPY_PARAMS.
        let timer = Instant::now();
        self.expanded_params = Some(source::shell_expand(self.crispy_params.as_deref())?);
        state.ctx.time_param_expand = micros(timer);
        self.dispatch_hook(&mut state, HookPoint::ParamsExpanded, started)?;

        // Phase 3: compute the cache key. Hook-injected flags stay out of
        // it; only config layers and the directive participate.
        let timer = Instant::now();
        let hashed_flags = combine_flags([
            self.default_flags.as_deref(),
            self.expanded_params.as_deref(),
            self.override_flags.as_deref(),
        ]);
        let hash = self.cache.compute_hash(
            self.source_content.as_bytes(),
            nonempty(&hashed_flags),
            self.compiler.version(),
        );
        self.cached_so_path = Some(self.cache.path_for(&hash));
        self.hash = Some(hash);
        state.ctx.time_hash = micros(timer);
        self.dispatch_hook(&mut state, HookPoint::HashComputed, started)?;

        // Phase 4: cache check.
        let timer = Instant::now();
        self.cache_hit = if self.flags.contains(Flags::FORCE_COMPILE) {
            false
        } else {
            let hash = self.hash.as_deref().unwrap_or_default();
            self.cache.has_valid(hash, self.source_path.as_deref())
        };
        state.ctx.time_cache_check = micros(timer);
        let result = self.dispatch_hook(&mut state, HookPoint::CacheChecked, started)?;
        if result == HookResult::ForceRecompile || state.ctx.force_recompile != 0 {
            tracing::debug!("plugin forced recompilation");
            self.cache_hit = false;
        }

        let artifact = self
            .cached_so_path
            .clone()
            .unwrap_or_default();

        if !self.cache_hit {
            // Phase 5: write the effective source to a temp file.
            self.write_temp_source()?;
            let temp_source = self
                .temp_source_path
                .clone()
                .unwrap_or_default();

            // Phase 6: dry-run short circuit.
            if self.flags.contains(Flags::DRY_RUN) {
                let compile_flags = combine_flags([
                    self.default_flags.as_deref(),
                    self.expanded_params.as_deref(),
                    self.override_flags.as_deref(),
                ]);
                println!(
                    "Would compile: {} -> {}",
                    temp_source.display(),
                    artifact.display()
                );
                println!(
                    "Extra flags: {}",
                    if compile_flags.is_empty() {
                        "(none)"
                    } else {
                        compile_flags.as_str()
                    }
                );
                self.exit_code = 0;
                return Ok(0);
            }

            // Phase 7: debug-launch short circuit. Replaces the process.
            if self.flags.contains(Flags::DEBUG_LAUNCH) {
                return self.launch_debugger(&temp_source, args);
            }

            // Phase 8: compile to the cache path.
            self.dispatch_hook(&mut state, HookPoint::PreCompile, started)?;
            let timer = Instant::now();
            let compile_flags = combine_flags([
                self.default_flags.as_deref(),
                self.expanded_params.as_deref(),
                state.injected_flags.as_deref(),
                self.override_flags.as_deref(),
            ]);
            self.compiler
                .compile_shared(&temp_source, &artifact, nonempty(&compile_flags))?;
            state.ctx.time_compile = micros(timer);

            // Phase 9.
            self.dispatch_hook(&mut state, HookPoint::PostCompile, started)?;
        } else {
            tracing::debug!("cache hit: {}", artifact.display());
        }

        // Phase 10: load the compiled artifact.
        let timer = Instant::now();
        let module = dylib::open_lazy(&artifact)?;
        state.ctx.time_module_load = micros(timer);
        self.module = Some(module);

        // Phase 11.
        self.dispatch_hook(&mut state, HookPoint::ModuleLoaded, started)?;

        // Phase 12: resolve the entry symbol. The function pointer stays
        // valid for as long as the module is held open.
        let entry: MainFn = {
            let module = self.module.as_ref().ok_or(Error::NoEntry)?;
            unsafe {
                match module.get::<MainFn>(b"main") {
                    Ok(symbol) => *symbol,
                    Err(_) => return Err(Error::NoEntry),
                }
            }
        };

        // Phase 13: last chance for plugins to rewrite the argv.
        self.dispatch_hook(&mut state, HookPoint::PreExecute, started)?;

        // Phase 14: transfer control to the script.
        let timer = Instant::now();
        state.rebuild_argv_ptrs();
        let argc = state.argv.len() as c_int;
        let code = unsafe { entry(argc, state.argv_ptrs.as_mut_ptr()) };
        state.ctx.time_execute = micros(timer);
        self.exit_code = code;

        // Phase 15.
        self.dispatch_hook(&mut state, HookPoint::PostExecute, started)?;

        Ok(code)
    }

    /// Compile a debuggable executable and replace this process with gdb.
    /// Only returns on exec failure.
    fn launch_debugger(&mut self, temp_source: &Path, args: &[String]) -> Result<i32> {
        use std::os::unix::process::CommandExt;

        let exe_path = std::env::temp_dir().join(format!("crispy-dbg-{}", std::process::id()));
        let compile_flags = combine_flags([
            self.default_flags.as_deref(),
            self.expanded_params.as_deref(),
            self.override_flags.as_deref(),
        ]);
        self.compiler
            .compile_executable(temp_source, &exe_path, nonempty(&compile_flags))?;

        tracing::debug!("transferring to gdb: {}", exe_path.display());
        let err = std::process::Command::new("gdb")
            .arg("--args")
            .arg(&exe_path)
            .args(args)
            .exec();

        // exec only returns on failure.
        Err(Error::Io(err))
    }

    fn write_temp_source(&mut self) -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix("crispy-")
            .suffix(".c")
            .tempfile()?;
        file.write_all(self.modified_source.as_bytes())?;
        let (_, path) = file.keep().map_err(|e| Error::Io(e.error))?;

        set_active_temp_source(Some(path.clone()));
        self.temp_source_path = Some(path);
        Ok(())
    }

    /// Dispatch one hook point, if an engine is attached.
    fn dispatch_hook(
        &mut self,
        state: &mut HookState,
        point: HookPoint,
        started: Instant,
    ) -> Result<HookResult> {
        let Some(engine) = self.engine.clone() else {
            return Ok(HookResult::Continue);
        };

        self.refresh_hook_ctx(state);
        state.ctx.time_total = micros(started);

        let result = engine.dispatch(point, &mut state.ctx);
        self.absorb_hook_ctx(state);

        if result == HookResult::Abort {
            let message = state
                .error
                .take()
                .unwrap_or_else(|| "plugin aborted execution".to_string());
            return Err(Error::Plugin(message));
        }
        Ok(result)
    }

    /// Point the context's read-only fields at current pipeline state.
    fn refresh_hook_ctx(&self, state: &mut HookState) {
        state.source_path = self
            .source_path
            .as_ref()
            .map(|p| to_cstring(&p.display().to_string()));
        state.source_content = to_cstring(&self.source_content);
        state.crispy_params = self.crispy_params.as_deref().map(to_cstring);
        state.expanded_params = self.expanded_params.as_deref().map(to_cstring);
        state.hash = self.hash.as_deref().map(to_cstring);
        state.cached_so_path = self
            .cached_so_path
            .as_ref()
            .map(|p| to_cstring(&p.display().to_string()));
        state.compiler_version = to_cstring(self.compiler.version());
        state.temp_source_path = self
            .temp_source_path
            .as_ref()
            .map(|p| to_cstring(&p.display().to_string()));
        state.modified_source = to_cstring(&self.modified_source);

        state.rebuild_argv_ptrs();

        let ctx = &mut state.ctx;
        ctx.source_path = opt_ptr(&state.source_path);
        ctx.source_content = state.source_content.as_ptr();
        ctx.source_len = self.source_content.len();
        ctx.crispy_params = opt_ptr(&state.crispy_params);
        ctx.expanded_params = opt_ptr(&state.expanded_params);
        ctx.hash = opt_ptr(&state.hash);
        ctx.cached_so_path = opt_ptr(&state.cached_so_path);
        ctx.compiler_version = state.compiler_version.as_ptr();
        ctx.temp_source_path = opt_ptr(&state.temp_source_path);
        ctx.flags = self.flags.bits();
        ctx.cache_hit = self.cache_hit as i32;
        ctx.modified_source = state.modified_source.as_ptr() as *mut c_char;
        ctx.modified_len = self.modified_source.len();
        ctx.exit_code = self.exit_code;

        ctx.argc = state.argv.len() as i32;
        ctx.argv = state.argv_ptrs.as_mut_ptr();
    }

    /// Copy plugin-written fields back out of the context, freeing any
    /// plugin-malloc'd strings.
    fn absorb_hook_ctx(&mut self, state: &mut HookState) {
        let ctx = &mut state.ctx;

        // Error slot, consumed on abort by dispatch_hook.
        if !ctx.error.is_null() {
            let message = unsafe { CStr::from_ptr(ctx.error) }
                .to_string_lossy()
                .into_owned();
            unsafe { libc::free(ctx.error as *mut c_void) };
            ctx.error = std::ptr::null_mut();
            state.error = Some(message);
        }

        // Replaced effective source.
        let our_source = state.modified_source.as_ptr() as *mut c_char;
        if !ctx.modified_source.is_null() && ctx.modified_source != our_source {
            let replacement = unsafe { CStr::from_ptr(ctx.modified_source) }
                .to_string_lossy()
                .into_owned();
            unsafe { libc::free(ctx.modified_source as *mut c_void) };
            if replacement != self.modified_source {
                tracing::debug!("plugin replaced the effective source");
                self.modified_source = replacement;
            }
        }
        ctx.modified_source = std::ptr::null_mut();
        ctx.modified_len = 0;

        // Injected compiler flags accumulate across hooks.
        if !ctx.extra_flags.is_null() {
            let injected = unsafe { CStr::from_ptr(ctx.extra_flags) }
                .to_string_lossy()
                .into_owned();
            unsafe { libc::free(ctx.extra_flags as *mut c_void) };
            ctx.extra_flags = std::ptr::null_mut();
            match &mut state.injected_flags {
                Some(existing) => {
                    existing.push(' ');
                    existing.push_str(&injected);
                }
                None => state.injected_flags = Some(injected),
            }
        }

        // Replaced argv. Plugin memory is left to the plugin; we copy.
        let our_argv = state.argv_ptrs.as_mut_ptr();
        if !ctx.argv.is_null() && (ctx.argv != our_argv || ctx.argc as usize != state.argv.len()) {
            let mut replacement = Vec::with_capacity(ctx.argc.max(0) as usize);
            for i in 0..ctx.argc.max(0) as usize {
                let ptr = unsafe { *ctx.argv.add(i) };
                if ptr.is_null() {
                    break;
                }
                replacement.push(unsafe { CStr::from_ptr(ptr) }.to_owned());
            }
            state.argv = replacement;
            state.rebuild_argv_ptrs();
        }
    }
}

impl Drop for Script {
    fn drop(&mut self) {
        // Close the loaded module before touching the temp source so a
        // debugger observing a preserved path sees it to the end.
        self.module.take();

        if let Some(path) = self.temp_source_path.take() {
            if !self.flags.contains(Flags::PRESERVE_SOURCE) {
                let _ = fs::remove_file(&path);
            }
            set_active_temp_source(None);
        }
    }
}

/// Backing storage for the pointers handed to plugins, plus per-run hook
/// bookkeeping. Lives for the duration of one `execute` call.
struct HookState {
    ctx: HookContext,

    source_path: Option<CString>,
    source_content: CString,
    crispy_params: Option<CString>,
    expanded_params: Option<CString>,
    hash: Option<CString>,
    cached_so_path: Option<CString>,
    compiler_version: CString,
    temp_source_path: Option<CString>,
    modified_source: CString,

    argv: Vec<CString>,
    argv_ptrs: Vec<*mut c_char>,

    /// Compiler flags injected by hooks, consumed at compile time.
    injected_flags: Option<String>,
    /// Message from the context's error slot.
    error: Option<String>,
}

impl HookState {
    fn new(args: &[String]) -> Self {
        let argv: Vec<CString> = args.iter().map(|a| to_cstring(a)).collect();
        let mut state = Self {
            ctx: HookContext::new(),
            source_path: None,
            source_content: CString::default(),
            crispy_params: None,
            expanded_params: None,
            hash: None,
            cached_so_path: None,
            compiler_version: CString::default(),
            temp_source_path: None,
            modified_source: CString::default(),
            argv,
            argv_ptrs: Vec::new(),
            injected_flags: None,
            error: None,
        };
        state.rebuild_argv_ptrs();
        state
    }

    fn rebuild_argv_ptrs(&mut self) {
        self.argv_ptrs = self
            .argv
            .iter()
            .map(|c| c.as_ptr() as *mut c_char)
            .collect();
        self.argv_ptrs.push(std::ptr::null_mut());
    }
}

/// Join flag components with single spaces, eliding empty ones.
pub(crate) fn combine_flags<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> String {
    parts
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn nonempty(flags: &str) -> Option<&str> {
    (!flags.is_empty()).then_some(flags)
}

/// Synthesize a full source file from an inline fragment.
fn build_inline_source(code: &str, extra_includes: Option<&str>) -> String {
    let mut src = String::new();
    src.push_str("#include <stdio.h>\n");
    src.push_str("#include <stdlib.h>\n");
    src.push_str("#include <string.h>\n");

    if let Some(extra) = extra_includes {
        for header in extra.split(';') {
            let header = header.trim();
            if !header.is_empty() {
                src.push_str(&format!("#include <{}>\n", header));
            }
        }
    }

    src.push_str("\nint main(int argc, char **argv) {\n    ");
    src.push_str(code);
    src.push_str("\n}\n");
    src
}

fn to_cstring(s: &str) -> CString {
    // Interior NULs cannot cross the C boundary; truncating at the first
    // one is the least surprising degradation.
    CString::new(s).unwrap_or_else(|e| {
        let nul = e.nul_position();
        let mut bytes = e.into_vec();
        bytes.truncate(nul);
        CString::new(bytes).unwrap_or_default()
    })
}

fn opt_ptr(value: &Option<CString>) -> *const c_char {
    value.as_ref().map_or(std::ptr::null(), |c| c.as_ptr())
}

fn micros(since: Instant) -> i64 {
    since.elapsed().as_micros() as i64
}
