//! Run command - Execute one snippet.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;

use tracelab::prelude::*;
use tracelab_observe::FeedEvent;

use super::{RuntimeArgs, TrackingArgs, language_for, print_json, read_source};
use crate::OutputFormat;
use crate::config::CliConfig;

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Snippet file, or `-` for standard input
    #[arg(required = true)]
    pub file: PathBuf,

    /// Language identifier (default: from the file extension)
    #[arg(short, long)]
    pub language: Option<String>,

    /// Line fed to the snippet's standard input (repeatable)
    #[arg(short, long = "input")]
    pub inputs: Vec<String>,

    /// File fed to the snippet's standard input
    #[arg(long, conflicts_with = "inputs")]
    pub stdin_file: Option<PathBuf>,

    /// Print live events as JSON lines while the snippet runs
    #[arg(long)]
    pub live: bool,

    #[command(flatten)]
    pub tracking: TrackingArgs,

    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

/// Execute the run command.
pub async fn execute(
    args: RunArgs,
    config: &CliConfig,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let language = language_for(&args.file, args.language.as_deref())?;
    let source = read_source(&args.file)?;

    let mut request = ExecutionRequest::new(language, source)
        .with_options(args.tracking.apply(config.tracking))
        .with_stdin_lines(args.inputs.iter().cloned());
    if let Some(path) = &args.stdin_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        request = request.with_stdin_text(&text);
    }

    let lab = args.runtime.build_lab(config)?;
    tracing::info!(
        file = %args.file.display(),
        language = request.language.as_str(),
        "Running snippet"
    );

    let live = args.live;
    let report = lab
        .execute(request, |id, event| {
            if live {
                println!("{}", FeedEvent::new(id.clone(), event.clone()).to_json_line());
            }
        })
        .await
        .context("Execution could not be carried out")?;

    match format {
        OutputFormat::Human => {
            if report.is_success() && quiet {
                print!("{}", report.outcome.output());
            } else {
                print!("{}", report.to_text());
            }
        }
        OutputFormat::Json | OutputFormat::JsonCompact => print_json(&report, format)?,
    }

    if let Some(failure) = report.outcome.failure() {
        bail!("Execution failed: {}: {}", failure.kind, failure.message);
    }
    Ok(())
}
