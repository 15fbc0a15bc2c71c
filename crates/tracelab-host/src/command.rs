//! Interpreter command lines.
//!
//! A language handler describes how to launch its interpreter; the sandbox
//! appends the path of the generated program and owns everything else about
//! the child process.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// `PATH` given to every child.
pub const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// How to launch an interpreter for one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxCommand {
    /// Interpreter executable.
    pub program: PathBuf,
    /// Arguments placed before the program path.
    pub args: Vec<String>,
    /// Environment variables, on top of the minimal base.
    pub env: Vec<(String, String)>,
}

impl SandboxCommand {
    /// Create a command for an interpreter.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Display name of the interpreter.
    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Build the child environment.
    ///
    /// The interpreter's own directory is prepended to the minimal `PATH`.
    pub fn environment(&self, workdir: &Path) -> Vec<(String, String)> {
        let resolved = resolve_program(&self.program);
        let path = match resolved.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => format!("{}:{SANDBOX_PATH}", dir.display()),
            None => SANDBOX_PATH.to_string(),
        };

        let mut env = vec![
            ("PATH".to_string(), path),
            ("HOME".to_string(), workdir.display().to_string()),
            ("TMPDIR".to_string(), workdir.display().to_string()),
            ("LANG".to_string(), "C.UTF-8".to_string()),
            ("LC_ALL".to_string(), "C.UTF-8".to_string()),
        ];
        env.extend(self.env.iter().cloned());
        env
    }
}

/// Resolve a bare interpreter name against the caller's `PATH`.
///
/// Names containing a path separator, and names that cannot be found,
/// are returned unchanged.
pub fn resolve_program(program: &Path) -> PathBuf {
    if program.components().count() != 1 || program.is_absolute() {
        return program.to_path_buf();
    }

    let search: OsString = std::env::var_os("PATH").unwrap_or_else(|| OsString::from(SANDBOX_PATH));
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
        .unwrap_or_else(|| program.to_path_buf())
}
