//! Profile command - Estimate how a snippet scales.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use tracelab::ProfileInput;
use tracelab::prelude::*;

use super::{RuntimeArgs, TrackingArgs, language_for, print_json, read_source};
use crate::OutputFormat;
use crate::config::CliConfig;

/// Arguments for the profile command.
///
/// Each run receives its input size as the only line of standard input.
#[derive(Args)]
pub struct ProfileArgs {
    /// Snippet file, or `-` for standard input
    pub file: PathBuf,

    /// Input sizes, comma separated
    #[arg(
        short,
        long,
        value_delimiter = ',',
        default_value = "100,200,400,800,1600"
    )]
    pub sizes: Vec<u64>,

    /// Language identifier (default: from the file extension)
    #[arg(short, long)]
    pub language: Option<String>,

    #[command(flatten)]
    pub tracking: TrackingArgs,

    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

/// Execute the profile command.
pub async fn execute(args: ProfileArgs, config: &CliConfig, format: OutputFormat) -> Result<()> {
    let language = language_for(&args.file, args.language.as_deref())?;
    let template = ExecutionRequest::new(language, read_source(&args.file)?)
        .with_options(args.tracking.apply(config.tracking));
    let inputs: Vec<ProfileInput> = args.sizes.iter().copied().map(ProfileInput::sized).collect();

    let lab = args.runtime.build_lab(config)?;
    let report = lab
        .profile(template, inputs)
        .await
        .context("Profile could not be carried out")?;

    match format {
        OutputFormat::Human => print!("{}", report.to_text()),
        OutputFormat::Json | OutputFormat::JsonCompact => print_json(&report, format)?,
    }
    Ok(())
}
