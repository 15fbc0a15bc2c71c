//! Languages command - List supported languages.

use anyhow::{Context, Result};

use tracelab::prelude::*;

use super::print_json;
use crate::OutputFormat;
use crate::config::CliConfig;

/// Execute the languages command.
pub fn execute(config: &CliConfig, format: OutputFormat) -> Result<()> {
    let lab = TraceLab::builder()
        .with_config(config.runtime.clone())
        .build()
        .context("Failed to create runtime")?;

    let mut languages = lab.languages();
    languages.sort_by(|a, b| a.id.cmp(&b.id));

    match format {
        OutputFormat::Human => {
            for language in &languages {
                println!(
                    "{:<12} {:<12} {}",
                    language.id, language.display_name, language.version
                );
            }
        }
        OutputFormat::Json | OutputFormat::JsonCompact => print_json(&languages, format)?,
    }
    Ok(())
}
