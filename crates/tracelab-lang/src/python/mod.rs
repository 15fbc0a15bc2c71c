//! The Python language handler.
//!
//! The generated program is the prelude followed by a single call into it
//! carrying a JSON configuration: tracking options, limits, policy, the line
//! map, and both the instrumented and the original snippet. The prelude
//! compiles the instrumented snippet (falling back to the original if that
//! fails), runs it under a trace function and emits the protocol frames.

pub mod lexer;
pub mod rewrite;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use tracelab_core::{
    EventSender, ExecutionContext, ExecutionOutcome, ExecutionResult, InstrumentedProgram,
    LanguageHandler, RuntimeConfig, SandboxPolicy, TrackingOptions,
};
use tracelab_host::SandboxCommand;
use tracelab_resource::SharedTimeoutMonitor;

use crate::error::{LangResult, check_source};
use crate::launch::Launcher;
use crate::version::VersionQuery;

pub use rewrite::{HOOK, PythonRewrite, rewrite};

/// The runtime half of the instrumentation.
pub const PRELUDE: &str = include_str!("prelude.py");

/// Default wall-clock timeout for Python snippets.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PreludeConfig<'a> {
    options: &'a TrackingOptions,
    max_events: usize,
    max_memory_bytes: Option<u64>,
    policy: SandboxPolicy,
    line_map: &'a [u32],
    source: &'a str,
    original_source: &'a str,
}

/// Handler for `python`.
#[derive(Debug)]
pub struct PythonHandler {
    interpreter: PathBuf,
    launcher: Launcher,
    version: VersionQuery,
}

impl PythonHandler {
    /// Language identifier.
    pub const ID: &'static str = "python";

    /// Create a handler from the runtime configuration.
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            interpreter: config.interpreters.python.clone(),
            launcher: Launcher::from_config(config),
            version: VersionQuery::new(config.interpreters.python.clone()),
        }
    }

    /// Report timeouts to a shared monitor.
    pub fn with_monitor(mut self, monitor: SharedTimeoutMonitor) -> Self {
        self.launcher = self.launcher.with_monitor(monitor);
        self
    }

    /// The interpreter command line.
    pub fn command(&self) -> SandboxCommand {
        SandboxCommand::new(self.interpreter.clone())
            .args(["-u", "-B"])
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONIOENCODING", "utf-8")
    }

    fn build(&self, source: &str, options: &TrackingOptions) -> LangResult<InstrumentedProgram> {
        check_source(source)?;
        let rewritten = rewrite(source)?;

        let config = PreludeConfig {
            options,
            max_events: self.launcher.limits().max_trace_events,
            max_memory_bytes: self.launcher.limits().max_memory_bytes,
            policy: self.launcher.policy(),
            line_map: &rewritten.line_map,
            source: &rewritten.source,
            original_source: source,
        };
        // A JSON string literal is also a valid Python string literal.
        let payload = serde_json::to_string(&serde_json::to_string(&config)?)?;

        let mut program = String::with_capacity(PRELUDE.len() + payload.len() + 64);
        program.push_str(PRELUDE);
        program.push_str("\n_tl_main(_tl_json.loads(");
        program.push_str(&payload);
        program.push_str("))\n");

        debug!(
            functions = rewritten.stats.functions,
            variables = rewritten.stats.variables,
            degraded = rewritten.degraded,
            "Python snippet instrumented"
        );

        Ok(InstrumentedProgram {
            language: Self::ID,
            source: program,
            file_name: "snippet.py".to_string(),
            original_lines: source.lines().count(),
            degraded: rewritten.degraded,
            stats: rewritten.stats,
        })
    }
}

#[async_trait]
impl LanguageHandler for PythonHandler {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn display_name(&self) -> &'static str {
        "Python"
    }

    fn version(&self) -> String {
        self.version.get().to_string()
    }

    fn default_timeout(&self) -> Duration {
        self.launcher.timeout_or(DEFAULT_TIMEOUT)
    }

    fn instrument(
        &self,
        source: &str,
        options: &TrackingOptions,
    ) -> ExecutionResult<InstrumentedProgram> {
        Ok(self.build(source, options)?)
    }

    async fn execute(
        &self,
        program: &InstrumentedProgram,
        ctx: ExecutionContext,
        events: EventSender,
    ) -> ExecutionResult<ExecutionOutcome> {
        self.launcher
            .run(program, &self.command(), &ctx, &events)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracelab_core::{
        ExecutionError, ExecutionRequest, FailureKind, ResourceLimits, TraceEvent,
    };
    use tokio::sync::mpsc;

    fn handler() -> PythonHandler {
        PythonHandler::new(&RuntimeConfig::default())
    }

    fn python_installed() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    async fn run(request: ExecutionRequest) -> (ExecutionOutcome, Vec<TraceEvent>) {
        let h = handler();
        let program = h.instrument(&request.source, &request.options).unwrap();
        let ctx = ExecutionContext::from_request(&request, h.default_timeout());
        let (tx, mut rx) = mpsc::channel(64);
        let collector = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        });
        let outcome = h.execute(&program, ctx, tx).await.unwrap();
        (outcome, collector.await.unwrap())
    }

    #[test]
    fn test_identity() {
        let h = handler();
        assert_eq!(h.id(), "python");
        assert_eq!(h.display_name(), "Python");
        assert_eq!(h.default_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_configured_timeout_wins() {
        let config = RuntimeConfig::default()
            .with_limits(ResourceLimits::default().with_timeout(Duration::from_secs(3)));
        assert_eq!(PythonHandler::new(&config).default_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_program_embeds_prelude_and_config() {
        let program = handler()
            .instrument("x = 1\nprint(x)\n", &TrackingOptions::all())
            .unwrap();

        assert_eq!(program.language, "python");
        assert_eq!(program.file_name, "snippet.py");
        assert_eq!(program.original_lines, 2);
        assert!(!program.degraded);
        assert_eq!(program.stats.variables, 1);
        assert!(program.source.starts_with(PRELUDE));
        assert!(program.source.trim_end().ends_with("))"));
        assert!(program.source.contains("__tl__.var('x', x, 1)"));
        assert!(program.source.contains("trackExecutionFlow"));
    }

    #[test]
    fn test_config_payload_round_trips() {
        let program = handler()
            .instrument("s = \"quote \\\" and 'single'\"\n", &TrackingOptions::none())
            .unwrap();
        let call = program.source.rsplit("_tl_main(_tl_json.loads(").next().unwrap();
        let literal = call.trim_end().trim_end_matches("))");

        let json: String = serde_json::from_str(literal).unwrap();
        let config: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(config["options"]["trackMemory"], false);
        assert_eq!(config["maxEvents"], 10_000);
        assert_eq!(config["policy"]["allow_network"], false);
        assert_eq!(config["originalSource"], "s = \"quote \\\" and 'single'\"\n");
    }

    #[test]
    fn test_degraded_snippet_still_builds() {
        let program = handler()
            .instrument("x = (1,\n", &TrackingOptions::all())
            .unwrap();
        assert!(program.degraded);
        assert_eq!(program.stats.total(), 0);
    }

    #[test]
    fn test_reserved_hook_fails() {
        let err = handler()
            .instrument("__tl__.var = print\n", &TrackingOptions::all())
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InstrumentationFailure { .. }));
    }

    #[test]
    fn test_nul_byte_fails() {
        let err = handler()
            .instrument("x = 1\0", &TrackingOptions::all())
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InstrumentationFailure { .. }));
    }

    #[tokio::test]
    async fn test_execute_relays_calls() {
        if !python_installed() {
            return;
        }
        let source = "def sq(n):\n    return n * n\n\nprint(sq(3))\n";
        let (outcome, live) = run(ExecutionRequest::new("python", source)).await;

        let ExecutionOutcome::Success(success) = outcome else {
            panic!("Expected success, got {outcome:?}");
        };
        assert_eq!(success.output, "9\n");
        assert!(success.trace.iter().any(
            |e| matches!(e, TraceEvent::FunctionCall(call) if call.name == "sq")
        ));
        assert_eq!(success.totals.unwrap().call_count(), 1);
        assert!(live.iter().any(|e| matches!(e, TraceEvent::FunctionCall(_))));
    }

    #[tokio::test]
    async fn test_execute_syntax_error() {
        if !python_installed() {
            return;
        }
        let (outcome, _) = run(ExecutionRequest::new("python", "print('ok')\nx = = 1\n")).await;

        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::RuntimeError);
        assert_eq!(failure.source_line, Some(2));
        assert_eq!(failure.output, "");
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        if !python_installed() {
            return;
        }
        let request = ExecutionRequest::new("python", "while True:\n    pass\n")
            .with_timeout(Duration::from_millis(200));
        let (outcome, _) = run(request).await;

        assert_eq!(outcome.failure().map(|f| f.kind), Some(FailureKind::Timeout));
    }

    #[test]
    fn test_command_is_unbuffered() {
        let cmd = handler().command();
        assert_eq!(cmd.program_name(), "python3");
        assert!(cmd.args.contains(&"-u".to_string()));
        assert!(cmd.env.iter().any(|(k, v)| k == "PYTHONUNBUFFERED" && v == "1"));
    }
}
