//! Subcommands and the arguments they share.

pub mod compare;
pub mod languages;
pub mod profile;
pub mod run;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::Serialize;

use tracelab::prelude::*;

use crate::OutputFormat;
use crate::config::CliConfig;

/// Flags overriding the runtime configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct RuntimeArgs {
    /// Execution timeout in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Memory ceiling of the interpreter in bytes
    #[arg(long)]
    pub memory_limit: Option<u64>,

    /// Maximum number of trace events of each kind recorded per run
    #[arg(long)]
    pub max_events: Option<usize>,

    /// Python interpreter to use
    #[arg(long)]
    pub python: Option<PathBuf>,

    /// Node.js interpreter to use
    #[arg(long)]
    pub node: Option<PathBuf>,

    /// Let the snippet open network sockets
    #[arg(long)]
    pub allow_network: bool,

    /// Let the snippet spawn processes
    #[arg(long)]
    pub allow_subprocess: bool,

    /// Let the snippet write files
    #[arg(long)]
    pub allow_writes: bool,
}

impl RuntimeArgs {
    /// Apply the flags on top of the file configuration.
    pub fn apply(&self, mut config: RuntimeConfig) -> RuntimeConfig {
        if let Some(ms) = self.timeout {
            config.limits.timeout = Some(Duration::from_millis(ms));
        }
        if let Some(bytes) = self.memory_limit {
            config.limits.max_memory_bytes = Some(bytes);
        }
        if let Some(events) = self.max_events {
            config.limits.max_trace_events = events;
        }
        if let Some(python) = &self.python {
            config.interpreters.python = python.clone();
        }
        if let Some(node) = &self.node {
            config.interpreters.node = node.clone();
        }
        config.policy.allow_network |= self.allow_network;
        config.policy.allow_subprocess |= self.allow_subprocess;
        config.policy.allow_filesystem_writes |= self.allow_writes;
        config
    }

    /// Build a runtime from the file configuration and these flags.
    pub fn build_lab(&self, config: &CliConfig) -> Result<TraceLab> {
        TraceLab::builder()
            .with_config(self.apply(config.runtime.clone()))
            .with_logging()
            .build()
            .context("Failed to create runtime")
    }
}

/// Flags switching tracking concerns off.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct TrackingArgs {
    /// Do not record memory samples
    #[arg(long)]
    pub no_memory: bool,

    /// Do not record variable changes
    #[arg(long)]
    pub no_variables: bool,

    /// Do not record function calls
    #[arg(long)]
    pub no_functions: bool,

    /// Do not record line timings
    #[arg(long)]
    pub no_flow: bool,
}

impl TrackingArgs {
    /// Apply the flags on top of the configured options.
    pub fn apply(&self, options: TrackingOptions) -> TrackingOptions {
        options
            .with_memory(options.track_memory && !self.no_memory)
            .with_variables(options.track_variables && !self.no_variables)
            .with_functions(options.track_functions && !self.no_functions)
            .with_execution_flow(options.track_execution_flow && !self.no_flow)
    }
}

/// Guess the language from a file extension.
pub fn detect_language(path: &Path) -> Option<&'static str> {
    match path.extension()?.to_str()? {
        "py" | "pyw" => Some("python"),
        "js" | "mjs" | "cjs" => Some("javascript"),
        _ => None,
    }
}

/// Resolve the language of a snippet file.
pub fn language_for(path: &Path, explicit: Option<&str>) -> Result<String> {
    if let Some(language) = explicit {
        return Ok(language.to_string());
    }
    match detect_language(path) {
        Some(language) => Ok(language.to_string()),
        None => bail!(
            "Cannot tell the language of {}; pass --language",
            path.display()
        ),
    }
}

/// Read a snippet; `-` reads standard input.
pub fn read_source(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("Failed to read snippet from stdin")?;
        return Ok(source);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Print a value as JSON in the requested style.
pub fn print_json<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    let json = match format {
        OutputFormat::JsonCompact => serde_json::to_string(value)?,
        _ => serde_json::to_string_pretty(value)?,
    };
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language(Path::new("fib.py")), Some("python"));
        assert_eq!(detect_language(Path::new("dir/main.mjs")), Some("javascript"));
        assert_eq!(detect_language(Path::new("Makefile")), None);
        assert_eq!(detect_language(Path::new("prog.rb")), None);
    }

    #[test]
    fn test_language_for_prefers_flag() {
        assert_eq!(
            language_for(Path::new("a.py"), Some("javascript")).unwrap(),
            "javascript"
        );
        assert!(language_for(Path::new("a.txt"), None).is_err());
    }

    #[test]
    fn test_runtime_args_apply() {
        let args = RuntimeArgs {
            timeout: Some(250),
            memory_limit: Some(1 << 26),
            allow_network: true,
            ..Default::default()
        };
        let config = args.apply(RuntimeConfig::default());

        assert_eq!(config.limits.timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.limits.max_memory_bytes, Some(1 << 26));
        assert!(config.policy.allow_network);
        assert!(!config.policy.allow_subprocess);
    }

    #[test]
    fn test_tracking_args_only_disable() {
        let args = TrackingArgs {
            no_flow: true,
            ..Default::default()
        };
        let options = args.apply(TrackingOptions::none().with_memory(true));

        assert!(options.track_memory);
        assert!(!options.track_variables);
        assert!(!options.track_execution_flow);
    }
}
