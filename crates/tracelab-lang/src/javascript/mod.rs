//! The JavaScript language handler.
//!
//! The snippet runs inside a `vm` context created by the prelude, with a
//! console bound to the line-buffered stdout proxy, a `require` that
//! enforces the sandbox policy and a reduced `process` object. The script's
//! completion value becomes the reported return value.

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

pub use rewrite::{FRAME, HOOK, JsRewrite, rewrite};

/// The runtime half of the instrumentation.
pub const PRELUDE: &str = include_str!("prelude.js");

/// Default wall-clock timeout for JavaScript snippets.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Smallest heap ceiling handed to V8, in MiB.
const MIN_HEAP_MIB: u64 = 16;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PreludeConfig<'a> {
    options: &'a TrackingOptions,
    max_events: usize,
    policy: SandboxPolicy,
    top_level_names: &'a [String],
    source: &'a str,
    original_source: &'a str,
}

/// Handler for `javascript`.
#[derive(Debug)]
pub struct JavaScriptHandler {
    interpreter: PathBuf,
    launcher: Launcher,
    version: VersionQuery,
}

impl JavaScriptHandler {
    /// Language identifier.
    pub const ID: &'static str = "javascript";

    /// Create a handler from the runtime configuration.
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            interpreter: config.interpreters.node.clone(),
            launcher: Launcher::from_config(config),
            version: VersionQuery::new(config.interpreters.node.clone()),
        }
    }

    /// Report timeouts to a shared monitor.
    pub fn with_monitor(mut self, monitor: SharedTimeoutMonitor) -> Self {
        self.launcher = self.launcher.with_monitor(monitor);
        self
    }

    /// The interpreter command line.
    pub fn command(&self) -> SandboxCommand {
        let mut command = SandboxCommand::new(self.interpreter.clone())
            .env("NODE_NO_WARNINGS", "1")
            .env("NODE_DISABLE_COLORS", "1");
        if let Some(bytes) = self.launcher.limits().max_memory_bytes {
            let mib = (bytes / (1024 * 1024)).max(MIN_HEAP_MIB);
            command = command.arg(format!("--max-old-space-size={mib}"));
        }
        command
    }

    fn build(&self, source: &str, options: &TrackingOptions) -> LangResult<InstrumentedProgram> {
        check_source(source)?;
        let rewritten = rewrite(source)?;

        let config = PreludeConfig {
            options,
            max_events: self.launcher.limits().max_trace_events,
            policy: self.launcher.policy(),
            top_level_names: &rewritten.top_level_names,
            source: &rewritten.source,
            original_source: source,
        };
        // A JSON string literal is also a valid JavaScript string literal.
        let payload = serde_json::to_string(&serde_json::to_string(&config)?)?;

        let mut program = String::with_capacity(PRELUDE.len() + payload.len() + 64);
        program.push_str(PRELUDE);
        program.push_str("\ntlMain(JSON.parse(");
        program.push_str(&payload);
        program.push_str("));\n");

        debug!(
            functions = rewritten.stats.functions,
            variables = rewritten.stats.variables,
            lines = rewritten.stats.lines,
            degraded = rewritten.degraded,
            "JavaScript snippet instrumented"
        );

        Ok(InstrumentedProgram {
            language: Self::ID,
            source: program,
            file_name: "snippet.js".to_string(),
            original_lines: source.lines().count(),
            degraded: rewritten.degraded,
            stats: rewritten.stats,
        })
    }
}

#[async_trait]
impl LanguageHandler for JavaScriptHandler {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn display_name(&self) -> &'static str {
        "JavaScript"
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
