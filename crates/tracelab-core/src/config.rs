//! Configuration types for the TraceLab runtime.
//!
//! This module provides configuration structures for tracking options,
//! sandbox policy, resource limits and interpreter discovery.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which trace concerns the instrumented program records.
///
/// Every hook is always present in the instrumented source; a disabled
/// concern turns its hook into a no-op at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackingOptions {
    /// Record memory samples.
    pub track_memory: bool,
    /// Record variable mutations.
    pub track_variables: bool,
    /// Record function calls and their timings.
    pub track_functions: bool,
    /// Record per-line execution timings.
    pub track_execution_flow: bool,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self::all()
    }
}

impl TrackingOptions {
    /// Enable every tracking concern.
    pub fn all() -> Self {
        Self {
            track_memory: true,
            track_variables: true,
            track_functions: true,
            track_execution_flow: true,
        }
    }

    /// Disable every tracking concern.
    pub fn none() -> Self {
        Self {
            track_memory: false,
            track_variables: false,
            track_functions: false,
            track_execution_flow: false,
        }
    }

    /// Enable or disable memory tracking.
    pub fn with_memory(mut self, enabled: bool) -> Self {
        self.track_memory = enabled;
        self
    }

    /// Enable or disable variable tracking.
    pub fn with_variables(mut self, enabled: bool) -> Self {
        self.track_variables = enabled;
        self
    }

    /// Enable or disable function tracking.
    pub fn with_functions(mut self, enabled: bool) -> Self {
        self.track_functions = enabled;
        self
    }

    /// Enable or disable line-flow tracking.
    pub fn with_execution_flow(mut self, enabled: bool) -> Self {
        self.track_execution_flow = enabled;
        self
    }

    /// Check whether any concern is enabled.
    pub fn any_enabled(&self) -> bool {
        self.track_memory || self.track_variables || self.track_functions || self.track_execution_flow
    }
}

/// Environment-sensing primitives the instrumented program may use.
///
/// Everything is denied by default. The language preludes stub or block
/// the corresponding interpreter facilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxPolicy {
    /// Allow opening network sockets.
    pub allow_network: bool,
    /// Allow spawning subprocesses.
    pub allow_subprocess: bool,
    /// Allow writing to the filesystem.
    pub allow_filesystem_writes: bool,
}

impl SandboxPolicy {
    /// Deny every environment-sensing primitive.
    pub fn strict() -> Self {
        Self::default()
    }

    /// Allow every environment-sensing primitive.
    pub fn permissive() -> Self {
        Self {
            allow_network: true,
            allow_subprocess: true,
            allow_filesystem_writes: true,
        }
    }
}

/// Resource limits applied to every execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Wall-clock timeout. `None` uses the language handler's default.
    #[serde(rename = "timeout_ms", with = "opt_millis")]
    pub timeout: Option<Duration>,

    /// How long a killed sandbox may take to be reaped.
    ///
    /// Defaults to 250ms.
    #[serde(rename = "grace_period_ms", with = "millis")]
    pub grace_period: Duration,

    /// Memory ceiling for the interpreter process, if any.
    pub max_memory_bytes: Option<u64>,

    /// Maximum amount of ordinary program output that is retained.
    ///
    /// Defaults to 1 MiB.
    pub max_output_bytes: usize,

    /// Maximum number of trace events of each kind recorded by one execution.
    ///
    /// Defaults to 10,000.
    pub max_trace_events: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: None,
            grace_period: Duration::from_millis(250),
            max_memory_bytes: None,
            max_output_bytes: 1024 * 1024,
            max_trace_events: 10_000,
        }
    }
}

impl ResourceLimits {
    /// Create resource limits with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the wall-clock timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the grace period after a forced termination.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Set the memory ceiling.
    pub fn with_max_memory(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = Some(bytes);
        self
    }

    /// Set the retained output cap.
    pub fn with_max_output(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Set the trace event cap.
    pub fn with_max_trace_events(mut self, events: usize) -> Self {
        self.max_trace_events = events;
        self
    }

    /// Tight limits for tests and demos.
    pub fn minimal() -> Self {
        Self {
            timeout: Some(Duration::from_secs(2)),
            grace_period: Duration::from_millis(100),
            max_memory_bytes: Some(256 * 1024 * 1024),
            max_output_bytes: 64 * 1024,
            max_trace_events: 1_000,
        }
    }

    /// Generous limits for heavier snippets.
    pub fn generous() -> Self {
        Self {
            timeout: Some(Duration::from_secs(60)),
            grace_period: Duration::from_millis(500),
            max_memory_bytes: None,
            max_output_bytes: 16 * 1024 * 1024,
            max_trace_events: 100_000,
        }
    }
}

/// Paths of the interpreters used by the language handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Python interpreter.
    pub python: PathBuf,
    /// Node.js interpreter.
    pub node: PathBuf,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            python: PathBuf::from("python3"),
            node: PathBuf::from("node"),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interpreter locations.
    pub interpreters: InterpreterConfig,
    /// Resource limits.
    pub limits: ResourceLimits,
    /// Environment policy.
    pub policy: SandboxPolicy,
    /// Capacity of the per-execution event channel.
    ///
    /// Defaults to 1024.
    pub event_channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interpreters: InterpreterConfig::default(),
            limits: ResourceLimits::default(),
            policy: SandboxPolicy::strict(),
            event_channel_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the interpreter locations.
    pub fn with_interpreters(mut self, interpreters: InterpreterConfig) -> Self {
        self.interpreters = interpreters;
        self
    }

    /// Set the resource limits.
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the environment policy.
    pub fn with_policy(mut self, policy: SandboxPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Conservative configuration: strict policy, minimal limits.
    pub fn strict() -> Self {
        Self {
            limits: ResourceLimits::minimal(),
            policy: SandboxPolicy::strict(),
            ..Self::default()
        }
    }

    /// Relaxed configuration: permissive policy, generous limits.
    pub fn permissive() -> Self {
        Self {
            limits: ResourceLimits::generous(),
            policy: SandboxPolicy::permissive(),
            ..Self::default()
        }
    }
}

/// Serde for `Duration` as whole milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Serde for `Option<Duration>` as whole milliseconds.
mod opt_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_options_defaults() {
        let options = TrackingOptions::default();
        assert!(options.track_memory);
        assert!(options.track_variables);
        assert!(options.track_functions);
        assert!(options.track_execution_flow);
        assert!(!TrackingOptions::none().any_enabled());
    }

    #[test]
    fn test_tracking_options_builder() {
        let options = TrackingOptions::none()
            .with_functions(true)
            .with_execution_flow(true);

        assert!(!options.track_memory);
        assert!(options.track_functions);
        assert!(options.any_enabled());
    }

    #[test]
    fn test_tracking_options_camel_case() {
        let options: TrackingOptions =
            serde_json::from_str(r#"{"trackMemory": false, "trackExecutionFlow": false}"#).unwrap();

        assert!(!options.track_memory);
        assert!(!options.track_execution_flow);
        assert!(options.track_variables);
    }

    #[test]
    fn test_resource_limits_presets() {
        let minimal = ResourceLimits::minimal();
        let standard = ResourceLimits::default();
        let generous = ResourceLimits::generous();

        assert!(minimal.max_output_bytes < standard.max_output_bytes);
        assert!(standard.max_output_bytes < generous.max_output_bytes);
        assert!(minimal.max_trace_events < generous.max_trace_events);
        assert_eq!(standard.timeout, None);
    }

    #[test]
    fn test_runtime_config_from_toml() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            event_channel_capacity = 64

            [interpreters]
            python = "/usr/bin/python3.12"

            [limits]
            timeout_ms = 1500
            max_trace_events = 50

            [policy]
            allow_network = true
            "#,
        )
        .unwrap();

        assert_eq!(config.event_channel_capacity, 64);
        assert_eq!(config.interpreters.python, PathBuf::from("/usr/bin/python3.12"));
        assert_eq!(config.interpreters.node, PathBuf::from("node"));
        assert_eq!(config.limits.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.limits.grace_period, Duration::from_millis(250));
        assert_eq!(config.limits.max_trace_events, 50);
        assert!(config.policy.allow_network);
        assert!(!config.policy.allow_subprocess);
    }
}
