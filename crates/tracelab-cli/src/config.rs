//! The `--config` file.
//!
//! ```toml
//! event_channel_capacity = 2048
//!
//! [interpreters]
//! python = "/usr/bin/python3.12"
//!
//! [limits]
//! timeout_ms = 5000
//! max_trace_events = 20000
//!
//! [policy]
//! allow_network = false
//!
//! [tracking]
//! trackMemory = false
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use tracelab_core::{RuntimeConfig, TrackingOptions};

/// Settings read from the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Runtime configuration.
    #[serde(flatten)]
    pub runtime: RuntimeConfig,
    /// Tracking options used unless a flag disables one.
    pub tracking: TrackingOptions,
}

impl CliConfig {
    /// Parse TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid configuration")
    }
}

/// Load the configuration file, or the defaults when none is given.
pub fn load(path: Option<&Path>) -> Result<CliConfig> {
    let Some(path) = path else {
        return Ok(CliConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = CliConfig::from_toml(&text)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    tracing::debug!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(CliConfig::from_toml("").unwrap(), CliConfig::default());
        assert_eq!(load(None).unwrap(), CliConfig::default());
    }

    #[test]
    fn test_parse_config() {
        let config = CliConfig::from_toml(
            r#"
event_channel_capacity = 64

[interpreters]
node = "/opt/node/bin/node"

[limits]
timeout_ms = 1500
max_trace_events = 50

[policy]
allow_subprocess = true

[tracking]
trackVariables = false
"#,
        )
        .unwrap();

        assert_eq!(config.runtime.event_channel_capacity, 64);
        assert_eq!(config.runtime.interpreters.node.to_str(), Some("/opt/node/bin/node"));
        assert_eq!(config.runtime.interpreters.python.to_str(), Some("python3"));
        assert_eq!(config.runtime.limits.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.runtime.limits.max_trace_events, 50);
        assert!(config.runtime.policy.allow_subprocess);
        assert!(!config.runtime.policy.allow_network);
        assert!(!config.tracking.track_variables);
        assert!(config.tracking.track_memory);
    }

    #[test]
    fn test_missing_file() {
        let err = load(Some(Path::new("/nonexistent/tracelab.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read config file"));
    }
}
