//! Lazy interpreter version detection.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use tracing::debug;

use tracelab_host::resolve_program;

/// Version string reported when the interpreter cannot be queried.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Runs `<interpreter> --version` once and caches the answer.
#[derive(Debug)]
pub struct VersionQuery {
    program: PathBuf,
    version: OnceLock<String>,
}

impl VersionQuery {
    /// Create a version query for an interpreter.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            version: OnceLock::new(),
        }
    }

    /// The interpreter being queried.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The detected version, or [`UNKNOWN_VERSION`].
    pub fn get(&self) -> &str {
        self.version.get_or_init(|| {
            let version = query(&self.program).unwrap_or_else(|| UNKNOWN_VERSION.to_string());
            debug!(program = %self.program.display(), version = %version, "Detected interpreter version");
            version
        })
    }
}

fn query(program: &Path) -> Option<String> {
    let output = Command::new(resolve_program(program))
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    // Older Pythons print the version on stderr.
    let text = if output.stdout.is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    parse_version(&String::from_utf8_lossy(&text))
}

/// Extract the version number from `--version` output.
///
/// Accepts `Python 3.11.7`, `v20.11.0` and bare `3.12.1`.
pub fn parse_version(text: &str) -> Option<String> {
    let first = text.lines().next()?.trim();
    let word = first.split_whitespace().last()?;
    let version = word.strip_prefix('v').unwrap_or(word);
    version
        .starts_with(|c: char| c.is_ascii_digit())
        .then(|| version.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_python_style() {
        assert_eq!(parse_version("Python 3.11.7\n"), Some("3.11.7".to_string()));
    }

    #[test]
    fn test_parse_node_style() {
        assert_eq!(parse_version("v20.11.0\n"), Some("20.11.0".to_string()));
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse_version(""), None);
        assert_eq!(parse_version("command not found"), None);
    }

    #[test]
    fn test_missing_interpreter_is_unknown() {
        let query = VersionQuery::new("/definitely/not/here/python3");
        assert_eq!(query.get(), UNKNOWN_VERSION);
        // Cached.
        assert_eq!(query.get(), UNKNOWN_VERSION);
    }
}
