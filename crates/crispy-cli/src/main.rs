//! crispy CLI entry point.
//!
//! Splits the command line into crispy's own options and the script's
//! argv before clap ever sees it: everything from the first positional
//! argument onward belongs to the script, so `crispy script.c -f blah`
//! hands `-f blah` to the script while `crispy -n script.c` gives crispy
//! the `-n`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use crispy_core::{
    config, CacheProvider, ConfigContext, FileCache, Flags, GccCompiler, PluginEngine, Script,
};

const LICENSE_TEXT: &str = "\
crispy - Crispy Really Is Super Powerful Yo

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU Affero General Public License as
published by the Free Software Foundation, either version 3 of the
License, or (at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU Affero General Public License for more details.
";

#[derive(Parser)]
#[command(name = "crispy")]
#[command(about = "Compile and run C scripts with a content-addressed cache")]
#[command(after_help = "\
Arguments after the script path are passed to the script, not crispy.

Examples:
  crispy script.c
  crispy script.c arg1 arg2
  crispy script.c -f blah        (script sees -f blah)
  crispy -n script.c             (crispy gets -n, script sees no args)
  crispy -i 'printf(\"hello\\n\"); return 0;'
  echo 'return 7;' | crispy -
  crispy --gdb script.c
  chmod +x script.c && ./script.c  (with #!/usr/bin/crispy shebang)")]
struct Cli {
    /// Execute inline C code
    #[arg(short = 'i', long, value_name = "CODE")]
    inline: Option<String>,

    /// Additional headers for inline mode (semicolon-separated)
    #[arg(short = 'I', long, value_name = "HEADERS")]
    include: Option<String>,

    /// Preload a shared library
    #[arg(short = 'p', long, value_name = "LIBNAME")]
    preload: Option<String>,

    /// Force recompilation (skip cache)
    #[arg(short = 'n', long)]
    no_cache: bool,

    /// Keep modified temp source files
    #[arg(short = 'S', long)]
    source_preserve: bool,

    /// Launch script under gdb with debug symbols
    #[arg(long)]
    gdb: bool,

    /// Show compilation command without executing
    #[arg(long)]
    dry_run: bool,

    /// Purge the cache directory and exit
    #[arg(long)]
    clean_cache: bool,

    /// Use an explicit configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Load plugins (':' or ',' separated paths)
    #[arg(short = 'P', long, value_name = "PATHS")]
    plugins: Option<String>,

    /// Skip configuration loading for this run
    #[arg(long)]
    no_config: bool,

    /// Show version information
    #[arg(short = 'v', long)]
    version: bool,

    /// Show license
    #[arg(long)]
    license: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

/// Options that consume the next argv entry as their value; the splitter
/// must hop over those values when hunting for the first positional.
const VALUE_OPTIONS: [&str; 10] = [
    "-i", "--inline", "-I", "--include", "-p", "--preload", "-c", "--config", "-P", "--plugins",
];

/// Split argv into crispy's own half and the script's half.
///
/// The first non-option argument (or the literal `-` for stdin mode, or
/// whatever follows `--`) starts the script argv.
fn split_argv(args: &[String]) -> (Vec<String>, Vec<String>) {
    let mut split = args.len();
    let mut i = 1;

    while i < args.len() {
        let arg = args[i].as_str();

        // Literal "-" is stdin mode; it belongs to the script half.
        if arg == "-" {
            split = i;
            break;
        }

        // "--" ends option parsing; the next entry is the script.
        if arg == "--" {
            split = i + 1;
            break;
        }

        if !arg.starts_with('-') {
            split = i;
            break;
        }

        if VALUE_OPTIONS.contains(&arg) {
            i += 1;
        }
        i += 1;
    }

    (args[..split].to_vec(), args[split..].to_vec())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            1
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<i32> {
    let args: Vec<String> = std::env::args().collect();
    let (crispy_args, mut script_args) = split_argv(&args);
    let cli = Cli::parse_from(&crispy_args);

    init_logging(cli.verbose);

    if cli.version {
        println!("crispy {}", env!("CARGO_PKG_VERSION"));
        return Ok(0);
    }
    if cli.license {
        print!("{}", LICENSE_TEXT);
        return Ok(0);
    }

    let compiler = Arc::new(GccCompiler::new()?);
    let mut cache: Arc<dyn CacheProvider> = Arc::new(FileCache::new()?);

    if cli.clean_cache {
        cache.purge()?;
        return Ok(0);
    }

    let mut flags = Flags::NONE;
    if cli.no_cache {
        flags |= Flags::FORCE_COMPILE;
    }
    if cli.source_preserve {
        flags |= Flags::PRESERVE_SOURCE;
    }
    if cli.dry_run {
        flags |= Flags::DRY_RUN;
    }
    if cli.gdb {
        flags |= Flags::DEBUG_LAUNCH;
    }

    let is_stdin = script_args.first().map(String::as_str) == Some("-");
    let script_path: Option<PathBuf> = if cli.inline.is_some() || is_stdin {
        None
    } else {
        script_args.first().map(PathBuf::from)
    };

    // Load and apply configuration before anything else runs. The loaded
    // module stays open for the life of the process.
    let mut default_flags = None;
    let mut override_flags = None;
    let mut plugin_paths: Vec<String> = Vec::new();
    let mut plugin_data: Vec<(String, String)> = Vec::new();
    let mut _config_module = None;

    if !cli.no_config && !config::config_disabled() {
        if let Some(config_path) = config::find_config_file(cli.config.as_deref()) {
            tracing::debug!("loading config from {}", config_path.display());

            let mut ctx = ConfigContext::new(&crispy_args, &script_args, script_path.as_deref());
            let module =
                config::compile_and_load(&config_path, compiler.as_ref(), cache.as_ref(), &mut ctx)
                    .with_context(|| {
                        format!("failed to apply config '{}'", config_path.display())
                    })?;
            _config_module = Some(module);

            // Harvest the populated context.
            default_flags = ctx.extra_flags().map(str::to_string);
            override_flags = ctx.override_flags().map(str::to_string);
            plugin_paths = ctx.plugin_paths().to_vec();
            plugin_data = ctx
                .plugin_data()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();

            let (config_bits, flags_set) = ctx.flags();
            if flags_set {
                // Config provides the base; CLI flags always win on top.
                flags = Flags::from_bits(config_bits) | flags;
            }

            if let Some(dir) = ctx.cache_dir() {
                cache = Arc::new(FileCache::with_dir(dir)?);
            }

            if let Some(replacement) = ctx.replacement_script_args() {
                tracing::debug!("config replaced the script argv");
                script_args = replacement;
            }
        }
    }

    // Plugin engine: config plugins load first, then CLI -P plugins.
    let mut engine = None;
    if !plugin_paths.is_empty() || cli.plugins.is_some() {
        let mut assembled = PluginEngine::new();
        for path in &plugin_paths {
            assembled.load(path)?;
        }
        if let Some(paths) = &cli.plugins {
            assembled.load_paths(paths)?;
        }
        for (key, value) in &plugin_data {
            assembled.set_data_string(key, value);
        }
        tracing::debug!("{} plugin(s) loaded", assembled.plugin_count());
        engine = Some(Arc::new(assembled));
    }

    let _preloaded = cli
        .preload
        .as_ref()
        .map(|name| crispy_core::dylib::open_lazy(Path::new(name)))
        .transpose()
        .with_context(|| format!("failed to preload '{}'", cli.preload.as_deref().unwrap_or("")))?;

    // Interrupt and termination unlink any in-flight temp source.
    ctrlc::set_handler(|| {
        if let Some(path) = crispy_core::active_temp_source() {
            let _ = std::fs::remove_file(path);
        }
        std::process::exit(130);
    })
    .context("failed to install signal handlers")?;

    // Select a construction mode and build the script.
    let mut script = if let Some(code) = &cli.inline {
        Script::from_inline(
            code,
            cli.include.as_deref(),
            compiler.clone(),
            cache.clone(),
            flags,
        )
    } else if is_stdin {
        // Drop the "-" marker; the rest is the script's argv.
        script_args.remove(0);
        Script::from_stdin(compiler.clone(), cache.clone(), flags)?
    } else {
        let Some(path) = script_args.first() else {
            anyhow::bail!("no script file specified (try 'crispy --help')");
        };
        Script::from_file(path, compiler.clone(), cache.clone(), flags)?
    };

    script.set_default_flags(default_flags);
    script.set_override_flags(override_flags);
    if let Some(engine) = engine {
        script.set_engine(engine);
    }

    let exit_code = script.execute(&script_args)?;

    if cli.source_preserve {
        if let Some(path) = script.temp_source_path() {
            eprintln!("Temp source preserved: {}", path.display());
        }
    }

    Ok(exit_code)
}
