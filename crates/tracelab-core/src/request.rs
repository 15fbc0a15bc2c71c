//! Execution requests and outcomes.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TrackingOptions;
use crate::error::{ExecutionError, ExecutionResult};
use crate::event::TraceEvent;
use crate::protocol::TraceTotals;

/// Opaque correlation token for one execution.
///
/// Callers may supply their own token; otherwise a random one is generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Create a new random execution ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ExecutionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One request to execute a snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Correlation token.
    #[serde(default)]
    pub id: ExecutionId,
    /// Source text.
    pub source: String,
    /// Language identifier (exact match against the registry).
    pub language: String,
    /// Lines fed to the program's standard input, in order.
    #[serde(default)]
    pub stdin: Vec<String>,
    /// Tracking options.
    #[serde(default)]
    pub options: TrackingOptions,
    /// Wall-clock timeout; `None` uses the language default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    /// Create a request with a fresh ID, no stdin and all tracking enabled.
    pub fn new(language: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: ExecutionId::new(),
            source: source.into(),
            language: language.into(),
            stdin: Vec::new(),
            options: TrackingOptions::default(),
            timeout: None,
        }
    }

    /// Use a caller-supplied execution ID.
    pub fn with_id(mut self, id: impl Into<ExecutionId>) -> Self {
        self.id = id.into();
        self
    }

    /// Set stdin as ordered lines.
    pub fn with_stdin_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stdin = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Set stdin from raw text, split into lines.
    pub fn with_stdin_text(mut self, text: &str) -> Self {
        self.stdin = text.lines().map(str::to_string).collect();
        self
    }

    /// Set the tracking options.
    pub fn with_options(mut self, options: TrackingOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the wall-clock timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Check the request-level input constraints.
    ///
    /// Language resolution is checked separately by the registry.
    pub fn validate(&self) -> ExecutionResult<()> {
        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(ExecutionError::InvalidRequest(
                    "timeout must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Why an execution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// The rewrite could not produce a valid program.
    InstrumentationFailure,
    /// The program raised during execution.
    RuntimeError,
    /// The program exceeded its wall-clock bound.
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InstrumentationFailure => write!(f, "instrumentation failure"),
            FailureKind::RuntimeError => write!(f, "runtime error"),
            FailureKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// A successful execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSuccess {
    /// Ordinary program output.
    pub output: String,
    /// Completion value reported by the program, if the language has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<serde_json::Value>,
    /// Final aggregated trace reported by the program.
    pub trace: Vec<TraceEvent>,
    /// Wall-clock duration of the snippet in milliseconds.
    pub total_duration_ms: f64,
    /// Final state snapshot: top-level names and value summaries.
    #[serde(default)]
    pub final_state: BTreeMap<String, String>,
    /// The program stopped recording some event kind after hitting its cap.
    #[serde(default)]
    pub trace_truncated: bool,
    /// Ordinary output beyond the output cap was dropped.
    #[serde(default)]
    pub output_truncated: bool,
    /// Running totals covering events dropped from `trace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totals: Option<TraceTotals>,
}

/// A failed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFailure {
    /// Failure kind.
    pub kind: FailureKind,
    /// Human-readable message.
    pub message: String,
    /// Offending source line, where determinable.
    #[serde(default)]
    pub source_line: Option<u32>,
    /// Output produced before the failure.
    #[serde(default)]
    pub output: String,
    /// Time elapsed before the failure in milliseconds.
    #[serde(default)]
    pub elapsed_ms: f64,
}

impl ExecutionFailure {
    /// Create a failure without output.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source_line: None,
            output: String::new(),
            elapsed_ms: 0.0,
        }
    }

    /// Attach the offending source line.
    pub fn with_line(mut self, line: Option<u32>) -> Self {
        self.source_line = line;
        self
    }

    /// The offending source line, or `"unknown"`.
    pub fn line_label(&self) -> String {
        self.source_line
            .map(|l| l.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Convert into the matching error kind.
    pub fn into_error(self, timeout: Duration) -> ExecutionError {
        match self.kind {
            FailureKind::InstrumentationFailure => ExecutionError::InstrumentationFailure {
                reason: self.message,
            },
            FailureKind::RuntimeError => ExecutionError::Runtime {
                message: self.message,
                line: self.source_line,
            },
            FailureKind::Timeout => ExecutionError::Timeout(timeout),
        }
    }
}

/// Result of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ExecutionOutcome {
    /// Execution completed successfully.
    Success(ExecutionSuccess),
    /// Execution failed.
    Failure(ExecutionFailure),
}

impl ExecutionOutcome {
    /// Check if the outcome is successful.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }

    /// Check if the outcome is a failure.
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// The trace, empty for failures.
    pub fn trace(&self) -> &[TraceEvent] {
        match self {
            ExecutionOutcome::Success(success) => &success.trace,
            ExecutionOutcome::Failure(_) => &[],
        }
    }

    /// The program output.
    pub fn output(&self) -> &str {
        match self {
            ExecutionOutcome::Success(success) => &success.output,
            ExecutionOutcome::Failure(failure) => &failure.output,
        }
    }

    /// Wall-clock duration in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        match self {
            ExecutionOutcome::Success(success) => success.total_duration_ms,
            ExecutionOutcome::Failure(failure) => failure.elapsed_ms,
        }
    }

    /// The failure, if any.
    pub fn failure(&self) -> Option<&ExecutionFailure> {
        match self {
            ExecutionOutcome::Success(_) => None,
            ExecutionOutcome::Failure(failure) => Some(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_id_unique() {
        let id1 = ExecutionId::new();
        let id2 = ExecutionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_execution_id_caller_supplied() {
        let id = ExecutionId::from("job-42");
        assert_eq!(id.as_str(), "job-42");
        assert_eq!(id.to_string(), "job-42");
    }

    #[test]
    fn test_request_builder() {
        let request = ExecutionRequest::new("python", "print(1)")
            .with_id("abc")
            .with_stdin_text("1\n2\n")
            .with_timeout(Duration::from_millis(200));

        assert_eq!(request.id.as_str(), "abc");
        assert_eq!(request.stdin, vec!["1".to_string(), "2".to_string()]);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_rejects_zero_timeout() {
        let request = ExecutionRequest::new("python", "x = 1").with_timeout(Duration::ZERO);
        assert!(matches!(
            request.validate(),
            Err(ExecutionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_failure_line_label() {
        let failure = ExecutionFailure::new(FailureKind::RuntimeError, "boom");
        assert_eq!(failure.line_label(), "unknown");

        let failure = failure.with_line(Some(7));
        assert_eq!(failure.line_label(), "7");
    }

    #[test]
    fn test_failure_into_error() {
        let failure = ExecutionFailure::new(FailureKind::Timeout, "too slow");
        let error = failure.into_error(Duration::from_millis(200));
        assert!(matches!(error, ExecutionError::Timeout(d) if d == Duration::from_millis(200)));
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = ExecutionOutcome::Success(ExecutionSuccess {
            output: "hi\n".to_string(),
            total_duration_ms: 4.0,
            ..Default::default()
        });

        assert!(outcome.is_success());
        assert_eq!(outcome.output(), "hi\n");
        assert_eq!(outcome.duration_ms(), 4.0);
        assert!(outcome.failure().is_none());
    }
}
