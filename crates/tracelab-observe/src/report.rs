//! Execution, comparison and profiling reports.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use tracelab_core::{ExecutionId, ExecutionOutcome};

use crate::comparison::{ComparisonResult, MetricDelta};
use crate::complexity::ComplexityEstimate;
use crate::metrics::{TraceMetrics, aggregate, aggregate_success};

/// Number of heatmap lines shown in text reports.
const TEXT_HEATMAP_LINES: usize = 5;

/// A diagnostic message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Severity level.
    pub level: DiagnosticLevel,
    /// Message.
    pub message: String,
    /// Additional context.
    pub context: Option<String>,
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticLevel {
    /// Informational.
    Info,
    /// Warning.
    Warning,
    /// Error.
    Error,
}

impl DiagnosticLevel {
    fn label(self) -> &'static str {
        match self {
            DiagnosticLevel::Info => "INFO",
            DiagnosticLevel::Warning => "WARN",
            DiagnosticLevel::Error => "ERROR",
        }
    }
}

/// Complete execution report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    /// Execution ID.
    pub execution_id: ExecutionId,
    /// Language the snippet ran as.
    pub language: String,
    /// Execution outcome.
    pub outcome: ExecutionOutcome,
    /// Metrics of the final trace.
    pub metrics: TraceMetrics,
    /// Diagnostic messages.
    pub diagnostics: Vec<Diagnostic>,
}

impl ExecutionReport {
    /// Create a report from already aggregated metrics.
    ///
    /// Truncation and failure are noted as diagnostics.
    pub fn new(
        execution_id: ExecutionId,
        language: impl Into<String>,
        outcome: ExecutionOutcome,
        metrics: TraceMetrics,
    ) -> Self {
        let mut report = Self {
            execution_id,
            language: language.into(),
            outcome,
            metrics,
            diagnostics: Vec::new(),
        };

        let (trace_truncated, output_truncated) = match &report.outcome {
            ExecutionOutcome::Success(success) => {
                (success.trace_truncated, success.output_truncated)
            }
            ExecutionOutcome::Failure(_) => (false, false),
        };
        if trace_truncated {
            report.add_warning("Trace event cap reached; later events were not recorded, call totals are complete");
        }
        if output_truncated {
            report.add_warning("Output limit reached; later output was dropped");
        }
        if let Some(failure) = report.outcome.failure() {
            let diagnostic = Diagnostic {
                level: DiagnosticLevel::Error,
                message: format!("{}: {}", failure.kind, failure.message),
                context: Some(format!("line {}", failure.line_label())),
            };
            report.add_diagnostic(diagnostic);
        }
        report
    }

    /// Aggregate the outcome's own trace into a report.
    pub fn from_outcome(
        execution_id: ExecutionId,
        language: impl Into<String>,
        outcome: ExecutionOutcome,
    ) -> Self {
        let metrics = match &outcome {
            ExecutionOutcome::Success(success) => aggregate_success(success),
            ExecutionOutcome::Failure(failure) => aggregate(&[], failure.elapsed_ms),
        };
        Self::new(execution_id, language, outcome, metrics)
    }

    /// Add a diagnostic message.
    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Add an info diagnostic.
    pub fn add_info(&mut self, message: impl Into<String>) {
        self.push(DiagnosticLevel::Info, message);
    }

    /// Add a warning diagnostic.
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.push(DiagnosticLevel::Warning, message);
    }

    /// Add an error diagnostic.
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.push(DiagnosticLevel::Error, message);
    }

    fn push(&mut self, level: DiagnosticLevel, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            level,
            message: message.into(),
            context: None,
        });
    }

    /// Check if execution was successful.
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Format as human-readable text.
    pub fn to_text(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "Execution Report: {}", self.execution_id);
        let _ = writeln!(out, "Language: {}", self.language);
        out.push('\n');

        out.push_str("Outcome: ");
        match &self.outcome {
            ExecutionOutcome::Success(success) => {
                out.push_str("Success\n");
                if let Some(value) = &success.return_value {
                    let _ = writeln!(out, "  Return: {value}");
                }
            }
            ExecutionOutcome::Failure(failure) => {
                let _ = writeln!(
                    out,
                    "{} at line {}: {}",
                    failure.kind,
                    failure.line_label(),
                    failure.message
                );
            }
        }

        let output = self.outcome.output();
        if !output.is_empty() {
            out.push_str("\nOutput:\n");
            for line in output.lines() {
                let _ = writeln!(out, "  {line}");
            }
        }

        let summary = &self.metrics.summary;
        out.push_str("\nMetrics:\n");
        let _ = writeln!(out, "  Execution Time: {:.3} ms", summary.execution_time_ms);
        let _ = writeln!(out, "  Peak Memory: {} bytes", summary.peak_memory_bytes);
        let _ = writeln!(
            out,
            "  Function Calls: {} ({} unique)",
            summary.total_function_calls, summary.unique_function_count
        );
        if let Some(expensive) = &summary.most_expensive_function {
            let _ = writeln!(
                out,
                "  Most Expensive: {} ({:.3} ms)",
                expensive.name, expensive.total_duration_ms
            );
        }
        let _ = writeln!(out, "  Variable Changes: {}", self.metrics.variable_changes);
        let _ = writeln!(
            out,
            "  Complexity: {} (confidence {:.2})",
            self.metrics.complexity.notation, self.metrics.complexity.confidence
        );

        if !self.metrics.call_graph.edges.is_empty() {
            out.push_str("\nCall Graph:\n");
            for edge in &self.metrics.call_graph.edges {
                let _ = writeln!(
                    out,
                    "  {} -> {} x{} ({:.3} ms)",
                    edge.source, edge.target, edge.call_count, edge.total_duration_ms
                );
            }
        }

        if !self.metrics.heatmap.is_empty() {
            out.push_str("\nHot Lines:\n");
            for entry in self.metrics.heatmap.iter().take(TEXT_HEATMAP_LINES) {
                let _ = writeln!(
                    out,
                    "  {:>4} x{:<6} {:>9.3} ms  {}",
                    entry.line,
                    entry.execution_count,
                    entry.total_duration_ms,
                    entry.source.trim()
                );
            }
        }

        if !self.diagnostics.is_empty() {
            out.push_str("\nDiagnostics:\n");
            for diag in &self.diagnostics {
                let _ = write!(out, "  [{}] {}", diag.level.label(), diag.message);
                if let Some(context) = &diag.context {
                    let _ = write!(out, " ({context})");
                }
                out.push('\n');
            }
        }

        out
    }

    /// Format as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Format as pretty JSON string.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Two execution reports and how they compare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    /// Report of the first run.
    pub first: ExecutionReport,
    /// Report of the second run.
    pub second: ExecutionReport,
    /// Metric deltas and verdict.
    pub comparison: ComparisonResult,
}

impl ComparisonReport {
    /// Compare two reports.
    pub fn new(first: ExecutionReport, second: ExecutionReport) -> Self {
        let comparison =
            ComparisonResult::between(&first.metrics.summary, &second.metrics.summary);
        Self {
            first,
            second,
            comparison,
        }
    }

    /// Format as human-readable text.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Comparison: {} ({}) vs {} ({})",
            self.first.execution_id,
            self.first.language,
            self.second.execution_id,
            self.second.language
        );
        for (label, run) in [("First", &self.first), ("Second", &self.second)] {
            let status = if run.is_success() { "success" } else { "failure" };
            let _ = writeln!(out, "  {label}: {status}");
        }
        out.push('\n');

        let c = &self.comparison;
        write_delta(&mut out, "Execution Time (ms)", &c.execution_time);
        write_delta(&mut out, "Peak Memory (bytes)", &c.peak_memory);
        write_delta(&mut out, "Function Calls", &c.function_calls);
        let _ = writeln!(out, "\nScore: {:.2}", c.score);
        let _ = writeln!(out, "Verdict: {}", c.verdict);
        out
    }

    /// Format as pretty JSON string.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

fn write_delta(out: &mut String, label: &str, delta: &MetricDelta) {
    let _ = writeln!(
        out,
        "  {label:<20} {:>14.3} -> {:>14.3}  ({:+.3}, {:+.1}%)",
        delta.first, delta.second, delta.delta, delta.percent_change
    );
}

/// One run of a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSample {
    /// Input size of the run.
    pub input_size: u64,
    /// Execution ID of the run.
    pub execution_id: ExecutionId,
    /// Measured duration.
    pub duration_ms: f64,
    /// Whether the run succeeded; failed runs are not fitted.
    pub success: bool,
}

/// Runs of one snippet at several input sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileReport {
    /// Language the snippet ran as.
    pub language: String,
    /// One entry per run, in submission order.
    pub samples: Vec<ProfileSample>,
    /// Growth-rate estimate over the successful runs.
    pub complexity: ComplexityEstimate,
}

impl ProfileReport {
    /// Format as human-readable text.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Profile: {} ({} runs)", self.language, self.samples.len());
        for sample in &self.samples {
            let status = if sample.success { "" } else { "  failed" };
            let _ = writeln!(
                out,
                "  n = {:<10} {:>10.3} ms{status}",
                sample.input_size, sample.duration_ms
            );
        }
        let _ = writeln!(
            out,
            "\nComplexity: {} (confidence {:.2})",
            self.complexity.notation, self.complexity.confidence
        );
        out
    }

    /// Format as pretty JSON string.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complexity::{DataPoint, estimate_complexity};
    use tracelab_core::{
        ExecutionFailure, ExecutionSuccess, FailureKind, FunctionCall, LineExecution, TraceEvent,
    };

    fn call(name: &str, caller: Option<&str>, ms: f64) -> TraceEvent {
        TraceEvent::FunctionCall(FunctionCall {
            timestamp_ms: 0.0,
            name: name.to_string(),
            caller: caller.map(str::to_string),
            args: Vec::new(),
            duration_ms: ms,
        })
    }

    fn line(n: u32) -> TraceEvent {
        TraceEvent::LineExecution(LineExecution {
            timestamp_ms: 0.0,
            line: n,
            source: "total += i".to_string(),
            duration_ms: 0.5,
        })
    }

    fn success() -> ExecutionOutcome {
        ExecutionOutcome::Success(ExecutionSuccess {
            output: "55\n".to_string(),
            return_value: Some(serde_json::json!(55)),
            trace: vec![call("fib", None, 2.0), call("fib", Some("fib"), 1.0), line(3), line(3)],
            total_duration_ms: 4.0,
            ..Default::default()
        })
    }

    #[test]
    fn test_from_outcome_aggregates() {
        let report = ExecutionReport::from_outcome(ExecutionId::from("r1"), "python", success());

        assert!(report.is_success());
        assert_eq!(report.metrics.summary.total_function_calls, 2);
        assert_eq!(report.metrics.summary.execution_time_ms, 4.0);
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn test_truncation_diagnostics() {
        let outcome = ExecutionOutcome::Success(ExecutionSuccess {
            trace_truncated: true,
            output_truncated: true,
            ..Default::default()
        });
        let report = ExecutionReport::from_outcome(ExecutionId::from("r2"), "javascript", outcome);

        assert_eq!(report.diagnostics.len(), 2);
        assert!(report.diagnostics.iter().all(|d| d.level == DiagnosticLevel::Warning));
    }

    #[test]
    fn test_failure_text() {
        let failure = ExecutionFailure::new(FailureKind::RuntimeError, "division by zero")
            .with_line(Some(7));
        let report = ExecutionReport::from_outcome(
            ExecutionId::from("r3"),
            "python",
            ExecutionOutcome::Failure(failure),
        );

        let text = report.to_text();
        assert!(!report.is_success());
        assert!(text.contains("line 7"));
        assert!(text.contains("division by zero"));
        assert!(text.contains("[ERROR]"));
    }

    #[test]
    fn test_execution_report_to_text() {
        let mut report = ExecutionReport::from_outcome(ExecutionId::from("r4"), "python", success());
        report.add_info("instrumented 1 function");

        let text = report.to_text();
        assert!(text.contains("Execution Report: r4"));
        assert!(text.contains("Return: 55"));
        assert!(text.contains("global -> fib x1"));
        assert!(text.contains("fib -> fib x1"));
        assert!(text.contains("Hot Lines:"));
        assert!(text.contains("[INFO] instrumented 1 function"));
    }

    #[test]
    fn test_execution_report_json() {
        let report = ExecutionReport::from_outcome(ExecutionId::from("r5"), "python", success());
        let json = report.to_json();

        assert_eq!(json["executionId"], "r5");
        assert_eq!(json["outcome"]["status"], "success");
        assert_eq!(json["metrics"]["summary"]["totalFunctionCalls"], 2);
    }

    #[test]
    fn test_comparison_report() {
        let first = ExecutionReport::from_outcome(ExecutionId::from("a"), "python", success());
        let second = ExecutionReport::from_outcome(
            ExecutionId::from("b"),
            "python",
            ExecutionOutcome::Success(ExecutionSuccess {
                total_duration_ms: 2.0,
                ..Default::default()
            }),
        );
        let report = ComparisonReport::new(first, second);

        assert_eq!(report.comparison.execution_time.delta, -2.0);
        let text = report.to_text();
        assert!(text.contains("Verdict: second"));
    }

    #[test]
    fn test_profile_report_text() {
        let samples: Vec<ProfileSample> = [10u64, 20, 40]
            .iter()
            .map(|&n| ProfileSample {
                input_size: n,
                execution_id: ExecutionId::new(),
                duration_ms: n as f64,
                success: true,
            })
            .collect();
        let points: Vec<DataPoint> = samples
            .iter()
            .map(|s| DataPoint::new(s.input_size, s.duration_ms))
            .collect();
        let report = ProfileReport {
            language: "python".to_string(),
            samples,
            complexity: estimate_complexity(&points),
        };

        let text = report.to_text();
        assert!(text.contains("Profile: python (3 runs)"));
        assert!(text.contains("Complexity: O(n)"));
    }
}
