//! Source text utilities: CRISPY_PARAMS extraction, header stripping,
//! and shell expansion.
//!
//! These are shared by the script orchestrator and the config loader so
//! both treat source files identically.

use std::process::Command;

use crate::error::{Error, Result};

/// Extract the value of the first `#define CRISPY_PARAMS "..."` line.
///
/// A line matches when its first non-blank text begins with `#define` and
/// the token `CRISPY_PARAMS` appears anywhere on the line. The value is
/// the substring between the first `"` and the last `"` of that line.
/// Only the first match is taken; later directive-shaped lines are left
/// for the compiler to see as ordinary defines.
pub fn extract_params(source: &str) -> Option<String> {
    for line in source.split('\n') {
        let trimmed = line.trim_start_matches([' ', '\t']);
        if !is_params_line(trimmed) {
            continue;
        }
        if let (Some(first), Some(last)) = (trimmed.find('"'), trimmed.rfind('"')) {
            if last > first {
                return Some(trimmed[first + 1..last].to_string());
            }
        }
        // Matched the pattern but carries no quoted value: keep scanning.
    }
    None
}

/// Produce the effective source: a line-wise copy with the shebang (line 1
/// only) and the first CRISPY_PARAMS line removed. Every preserved line is
/// emitted with a trailing newline. Returns the text and its byte length.
pub fn strip_header(source: &str) -> (String, usize) {
    let mut lines: Vec<&str> = source.split('\n').collect();
    // split() yields a final empty segment for newline-terminated input;
    // dropping it keeps the operation idempotent.
    if lines.last() == Some(&"") {
        lines.pop();
    }

    let mut out = String::with_capacity(source.len());
    let mut params_found = false;

    for (i, line) in lines.iter().enumerate() {
        if i == 0 && line.starts_with("#!") {
            continue;
        }

        if !params_found {
            let trimmed = line.trim_start_matches([' ', '\t']);
            if is_params_line(trimmed) {
                params_found = true;
                continue;
            }
        }

        out.push_str(line);
        out.push('\n');
    }

    let len = out.len();
    (out, len)
}

/// Shell-expand a raw CRISPY_PARAMS value.
///
/// Runs `printf '%s ' <value>` in the system shell so that command
/// substitutions, backticks, and environment references all work. The
/// trailing space after `%s` keeps word-split results from substitutions
/// like `$(pkg-config ...)` joined by spaces; the final trim removes it.
///
/// An absent or empty value expands to the empty string. The value is
/// spliced into the shell command verbatim; quoting inside it is the
/// script author's problem, not ours to escape.
pub fn shell_expand(params: Option<&str>) -> Result<String> {
    let Some(params) = params.filter(|p| !p.is_empty()) else {
        return Ok(String::new());
    };

    let cmd = format!("printf '%s ' {}", params);
    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(&cmd)
        .output()
        .map_err(|e| Error::Params(format!("failed to spawn /bin/sh: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Params(format!(
            "shell expansion of '{}' failed: {}",
            params,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn is_params_line(trimmed: &str) -> bool {
    trimmed.starts_with("#define") && trimmed.contains("CRISPY_PARAMS")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_basic() {
        let src = "#define CRISPY_PARAMS \"-lm -O2\"\nint main(void){return 0;}\n";
        assert_eq!(extract_params(src).as_deref(), Some("-lm -O2"));
    }

    #[test]
    fn test_extract_leading_whitespace() {
        let src = "  \t#define CRISPY_PARAMS \"-lm\"\n";
        assert_eq!(extract_params(src).as_deref(), Some("-lm"));
    }

    #[test]
    fn test_extract_absent() {
        assert_eq!(extract_params("int main(void){return 0;}\n"), None);
        assert_eq!(extract_params(""), None);
    }

    #[test]
    fn test_extract_first_match_only() {
        let src = "#define CRISPY_PARAMS \"-lm\"\n#define CRISPY_PARAMS \"-lpthread\"\n";
        assert_eq!(extract_params(src).as_deref(), Some("-lm"));
    }

    #[test]
    fn test_extract_is_permissive_about_comments() {
        // The matcher is deliberately not a tokenizer: a directive inside
        // a single-line block comment still matches.
        let src = "/* #define CRISPY_PARAMS \"-lm\" */\n";
        assert_eq!(extract_params(src), None); // leading text is not #define
        let src = "#define CRISPY_PARAMS \"-lm\" /* commented trailer */\n";
        assert_eq!(extract_params(src).as_deref(), Some("-lm"));
    }

    #[test]
    fn test_extract_value_with_substitution() {
        let src = "#define CRISPY_PARAMS \"$(pkg-config --libs glib-2.0) -lm\"\n";
        assert_eq!(
            extract_params(src).as_deref(),
            Some("$(pkg-config --libs glib-2.0) -lm")
        );
    }

    #[test]
    fn test_extract_empty_value() {
        let src = "#define CRISPY_PARAMS \"\"\nint main(void){return 0;}\n";
        assert_eq!(extract_params(src).as_deref(), Some(""));
    }

    #[test]
    fn test_strip_shebang() {
        let src = "#!/usr/bin/crispy\n#include <stdio.h>\nint main(void){return 0;}\n";
        let (out, len) = strip_header(src);
        assert!(out.starts_with("#include <stdio.h>\n"));
        assert_eq!(len, out.len());
    }

    #[test]
    fn test_strip_params_line() {
        let src = "#include <math.h>\n#define CRISPY_PARAMS \"-lm\"\nint main(void){return 0;}\n";
        let (out, _) = strip_header(src);
        assert_eq!(out, "#include <math.h>\nint main(void){return 0;}\n");
    }

    #[test]
    fn test_strip_preserves_later_params_lines() {
        let src = "#define CRISPY_PARAMS \"-lm\"\n#define CRISPY_PARAMS \"-lfoo\"\n";
        let (out, _) = strip_header(src);
        assert_eq!(out, "#define CRISPY_PARAMS \"-lfoo\"\n");
    }

    #[test]
    fn test_strip_shebang_only_on_first_line() {
        let src = "int x;\n#!/not/a/shebang\n";
        let (out, _) = strip_header(src);
        assert_eq!(out, "int x;\n#!/not/a/shebang\n");
    }

    #[test]
    fn test_strip_is_idempotent() {
        let src = "#!/usr/bin/crispy\n#define CRISPY_PARAMS \"-lm\"\nint main(void){return 0;}\n";
        let (once, _) = strip_header(src);
        let (twice, _) = strip_header(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_strip_adds_trailing_newline() {
        let (out, _) = strip_header("int x;");
        assert_eq!(out, "int x;\n");
    }

    #[test]
    fn test_expand_absent_and_empty() {
        assert_eq!(shell_expand(None).unwrap(), "");
        assert_eq!(shell_expand(Some("")).unwrap(), "");
    }

    #[test]
    fn test_expand_plain_flags() {
        assert_eq!(shell_expand(Some("-lm -O2")).unwrap(), "-lm -O2");
    }

    #[test]
    fn test_expand_command_substitution() {
        assert_eq!(
            shell_expand(Some("$(echo -lm) -Wall")).unwrap(),
            "-lm -Wall"
        );
    }

    #[test]
    fn test_expand_environment_reference() {
        std::env::set_var("CRISPY_TEST_EXPAND_FLAG", "-DFROM_ENV");
        assert_eq!(
            shell_expand(Some("$CRISPY_TEST_EXPAND_FLAG")).unwrap(),
            "-DFROM_ENV"
        );
    }

    #[test]
    fn test_expand_failure_is_params_error() {
        let err = shell_expand(Some("$(exit 3)")).unwrap_err();
        assert!(matches!(err, Error::Params(_)));
    }
}
