//! Running an instrumented program in a fresh sandbox.

use std::time::Duration;

use tracing::debug;

use tracelab_core::{
    EventSender, ExecutionContext, ExecutionOutcome, ExecutionResult, InstrumentedProgram,
    ResourceLimits, RuntimeConfig, SandboxPolicy,
};
use tracelab_host::{Sandbox, SandboxCommand, SandboxConfig};
use tracelab_resource::SharedTimeoutMonitor;

/// Settings every handler shares: limits, policy and an optional timeout
/// monitor.
#[derive(Debug, Clone)]
pub struct Launcher {
    limits: ResourceLimits,
    policy: SandboxPolicy,
    monitor: Option<SharedTimeoutMonitor>,
}

impl Launcher {
    /// Take limits and policy from the runtime configuration.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            limits: config.limits.clone(),
            policy: config.policy,
            monitor: None,
        }
    }

    /// Report timeouts to a shared monitor.
    pub fn with_monitor(mut self, monitor: SharedTimeoutMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Resource limits.
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Environment policy.
    pub fn policy(&self) -> SandboxPolicy {
        self.policy
    }

    /// Configured timeout, or the language default.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.limits.timeout.unwrap_or(default)
    }

    /// Run `program` with `command` in a new sandbox.
    ///
    /// Each call gets its own sandbox, so concurrent executions of the same
    /// handler share nothing.
    pub async fn run(
        &self,
        program: &InstrumentedProgram,
        command: &SandboxCommand,
        ctx: &ExecutionContext,
        events: &EventSender,
    ) -> ExecutionResult<ExecutionOutcome> {
        let mut sandbox = Sandbox::new(ctx.id.clone(), SandboxConfig::from_limits(&self.limits));
        if let Some(monitor) = &self.monitor {
            sandbox = sandbox.with_monitor(monitor.clone());
        }

        debug!(
            execution_id = %ctx.id,
            language = program.language,
            hooks = program.stats.total(),
            "Launching sandbox"
        );
        let outcome = sandbox.execute(program, command, ctx, events).await?;
        debug!(
            execution_id = %ctx.id,
            language = program.language,
            success = outcome.is_success(),
            duration_ms = outcome.duration_ms(),
            "Execution finished"
        );
        Ok(outcome)
    }
}
