//! Compare command - Run two snippets side by side.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use tracelab::prelude::*;

use super::{RuntimeArgs, TrackingArgs, language_for, print_json, read_source};
use crate::OutputFormat;
use crate::config::CliConfig;

/// Arguments for the compare command.
#[derive(Args)]
pub struct CompareArgs {
    /// First snippet file
    pub first: PathBuf,

    /// Second snippet file
    pub second: PathBuf,

    /// Language of both snippets (default: from each file extension)
    #[arg(short, long)]
    pub language: Option<String>,

    /// Line fed to both snippets' standard input (repeatable)
    #[arg(short, long = "input")]
    pub inputs: Vec<String>,

    #[command(flatten)]
    pub tracking: TrackingArgs,

    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

/// Execute the compare command.
pub async fn execute(args: CompareArgs, config: &CliConfig, format: OutputFormat) -> Result<()> {
    let options = args.tracking.apply(config.tracking);
    let request = |path: &PathBuf| -> Result<ExecutionRequest> {
        let language = language_for(path, args.language.as_deref())?;
        Ok(ExecutionRequest::new(language, read_source(path)?)
            .with_options(options)
            .with_stdin_lines(args.inputs.iter().cloned()))
    };
    let first = request(&args.first)?;
    let second = request(&args.second)?;

    let lab = args.runtime.build_lab(config)?;
    let report = lab
        .compare(first, second)
        .await
        .context("Comparison could not be carried out")?;

    match format {
        OutputFormat::Human => {
            println!("First:  {}", args.first.display());
            println!("Second: {}", args.second.display());
            print!("{}", report.to_text());
            for (label, run) in [("first", &report.first), ("second", &report.second)] {
                if let Some(failure) = run.outcome.failure() {
                    println!("  {label} run failed: {}: {}", failure.kind, failure.message);
                }
            }
        }
        OutputFormat::Json | OutputFormat::JsonCompact => print_json(&report, format)?,
    }
    Ok(())
}
