//! Error types for crispy-core.

use thiserror::Error;

/// Result type for crispy-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in crispy-core.
#[derive(Debug, Error)]
pub enum Error {
    /// The external compiler exited non-zero.
    #[error("compilation failed:\n{message}\ncommand: {command}")]
    Compile {
        /// Compiler stderr, verbatim.
        message: String,
        /// The full command line that was run.
        command: String,
    },

    /// Failed to load a compiled artifact.
    #[error("failed to load module: {0}")]
    Load(#[from] libloading::Error),

    /// The loaded artifact has no `main` symbol.
    #[error("no main() function found in script")]
    NoEntry,

    /// File I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CRISPY_PARAMS shell expansion failed.
    #[error("failed to expand CRISPY_PARAMS: {0}")]
    Params(String),

    /// A cache provider operation failed.
    #[error("cache error: {0}")]
    Cache(String),

    /// The compiler binary could not be located.
    #[error("compiler not found: {0}")]
    ToolchainNotFound(String),

    /// Plugin load failure or hook-initiated abort. Carries the message
    /// verbatim: on abort the orchestrator surfaces the plugin's own
    /// error text without decorating it.
    #[error("{0}")]
    Plugin(String),

    /// Configuration file could not be compiled, loaded, or applied.
    #[error("config error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_includes_command() {
        let err = Error::Compile {
            message: "undefined reference to `frob'".to_string(),
            command: "gcc -shared -fPIC -o out.so in.c".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("undefined reference"));
        assert!(text.contains("gcc -shared"));
    }

    #[test]
    fn test_plugin_error_is_verbatim() {
        let err = Error::Plugin("Aborted by test".to_string());
        assert_eq!(err.to_string(), "Aborted by test");
    }
}
