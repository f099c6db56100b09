//! Core engine for crispy, the C script runner.
//!
//! This crate provides:
//! - Source utilities (CRISPY_PARAMS extraction, header stripping, shell
//!   expansion)
//! - A compiler backend trait with the default gcc driver
//! - A content-addressed artifact cache keyed by SHA-256
//! - A plugin engine with nine pipeline hook points and a shared data store
//! - A configuration loader that compiles and runs a user config artifact
//! - The script orchestrator tying it all together
//!
//! # Architecture
//!
//! ```text
//! script.c
//!     │
//!     ├── source utils ──► effective source + CRISPY_PARAMS
//!     │
//!     ├── CacheProvider ──► SHA-256 key ──► hit? ──► load artifact
//!     │                                     miss ──► Compiler ──► artifact
//!     │
//!     └── dynamic loader ──► main(argc, argv) ──► exit code
//!
//! (plugin hooks fire between every step; the config artifact runs the
//! same compile-and-load path once, before the pipeline starts)
//! ```

pub mod cache;
pub mod compiler;
pub mod config;
pub mod dylib;
pub mod error;
pub mod plugin;
pub mod script;
pub mod source;

pub use cache::{CacheProvider, FileCache};
pub use compiler::{Compiler, GccCompiler};
pub use config::ConfigContext;
pub use error::{Error, Result};
pub use plugin::{HookContext, HookPoint, HookResult, PluginEngine};
pub use script::{active_temp_source, Flags, Script};
