//! The language handler contract.
//!
//! A handler knows how to rewrite source of one language into an
//! instrumented program, and how to run that program in a sandbox while
//! relaying each decoded event.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::TrackingOptions;
use crate::error::ExecutionResult;
use crate::event::TraceEvent;
use crate::request::{ExecutionId, ExecutionOutcome, ExecutionRequest};

/// Sending half of the per-execution event channel.
pub type EventSender = mpsc::Sender<TraceEvent>;

/// Counters describing what a rewrite inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentationStats {
    /// Function bodies wrapped with call hooks.
    pub functions: usize,
    /// Variable hooks inserted.
    pub variables: usize,
    /// Line hooks inserted.
    pub lines: usize,
}

impl InstrumentationStats {
    /// Total hooks inserted.
    pub fn total(&self) -> usize {
        self.functions + self.variables + self.lines
    }
}

/// The output of [`LanguageHandler::instrument`].
#[derive(Debug, Clone)]
pub struct InstrumentedProgram {
    /// Language identifier.
    pub language: &'static str,
    /// Complete program text, prelude included.
    pub source: String,
    /// File name the program is written to inside the sandbox.
    pub file_name: String,
    /// Number of lines in the original snippet.
    pub original_lines: usize,
    /// The rewrite fell back to the unmodified snippet.
    pub degraded: bool,
    /// What the rewrite inserted.
    pub stats: InstrumentationStats,
}

impl InstrumentedProgram {
    /// Size of the program text in bytes.
    pub fn len(&self) -> usize {
        self.source.len()
    }

    /// Check if the program text is empty.
    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }
}

/// Per-execution inputs handed to [`LanguageHandler::execute`].
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Correlation token.
    pub id: ExecutionId,
    /// Lines fed to standard input, in order.
    pub stdin: Vec<String>,
    /// Tracking options.
    pub options: TrackingOptions,
    /// Resolved wall-clock timeout.
    pub timeout: Duration,
}

impl ExecutionContext {
    /// Build a context from a request, resolving the timeout against the
    /// handler default.
    pub fn from_request(request: &ExecutionRequest, default_timeout: Duration) -> Self {
        Self {
            id: request.id.clone(),
            stdin: request.stdin.clone(),
            options: request.options,
            timeout: request.timeout.unwrap_or(default_timeout),
        }
    }

    /// Standard input as a single newline-terminated buffer.
    pub fn stdin_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for line in &self.stdin {
            buf.extend_from_slice(line.as_bytes());
            buf.push(b'\n');
        }
        buf
    }
}

/// Descriptive entry of the supported-languages listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageInfo {
    /// Language identifier.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Interpreter version, or `"unknown"`.
    pub version: String,
}

/// A handler for one execution language.
///
/// Implementations are registered once per language and shared across
/// concurrent executions; all per-execution state lives in the
/// [`ExecutionContext`] and the sandbox the handler creates.
#[async_trait]
pub trait LanguageHandler: Send + Sync {
    /// Language identifier used for resolution.
    fn id(&self) -> &'static str;

    /// Human-readable name.
    fn display_name(&self) -> &'static str;

    /// Interpreter version string, or `"unknown"`.
    fn version(&self) -> String;

    /// Timeout used when a request does not carry one.
    fn default_timeout(&self) -> Duration;

    /// Rewrite source into an instrumented program.
    ///
    /// Hooks are always inserted; the tracking options decide at run time
    /// whether each hook records anything.
    fn instrument(
        &self,
        source: &str,
        options: &TrackingOptions,
    ) -> ExecutionResult<InstrumentedProgram>;

    /// Run an instrumented program, sending each decoded event in emission
    /// order.
    ///
    /// Runtime errors and timeouts resolve to a failure outcome; `Err` is
    /// reserved for environment failures such as a missing interpreter.
    async fn execute(
        &self,
        program: &InstrumentedProgram,
        ctx: ExecutionContext,
        events: EventSender,
    ) -> ExecutionResult<ExecutionOutcome>;

    /// Descriptive listing entry.
    fn info(&self) -> LanguageInfo {
        LanguageInfo {
            id: self.id().to_string(),
            display_name: self.display_name().to_string(),
            version: self.version(),
        }
    }
}
