//! TraceLab CLI - Command-line interface for the TraceLab execution tracer.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

/// TraceLab Execution Tracer
#[derive(Parser)]
#[command(name = "tracelab")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long, global = true, default_value = "human")]
    pub format: OutputFormat,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Output format options.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    #[default]
    Human,
    /// JSON output
    Json,
    /// Compact JSON (single line)
    JsonCompact,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run a snippet and report its trace
    Run(commands::run::RunArgs),
    /// Run two snippets and compare them
    Compare(commands::compare::CompareArgs),
    /// Run a snippet at several input sizes and estimate its complexity
    Profile(commands::profile::ProfileArgs),
    /// List the supported languages
    Languages,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tracelab={log_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let Cli {
        command,
        config: config_path,
        format,
        quiet,
        ..
    } = cli;

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(anyhow::Error::from)
        .and_then(|runtime| {
            runtime.block_on(async move {
                let config = config::load(config_path.as_deref())?;
                match command {
                    Commands::Run(args) => commands::run::execute(args, &config, format, quiet).await,
                    Commands::Compare(args) => {
                        commands::compare::execute(args, &config, format).await
                    }
                    Commands::Profile(args) => {
                        commands::profile::execute(args, &config, format).await
                    }
                    Commands::Languages => commands::languages::execute(&config, format),
                }
            })
        });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if !quiet {
                eprintln!("Error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}
