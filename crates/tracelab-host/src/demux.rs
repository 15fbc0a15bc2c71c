//! Output stream demultiplexing.
//!
//! Splits the program's single output stream into ordinary output, live
//! events and the terminal payload, and turns what it collected into an
//! [`ExecutionOutcome`] once the program is gone.

use tracing::{debug, warn};

use tracelab_core::{
    ErrorPayload, ExecutionFailure, ExecutionId, ExecutionOutcome, ExecutionSuccess, FailureKind,
    FinalPayload, Frame, TraceEvent, decode_line,
};
use tracelab_resource::{OutputLimiter, truncate_to_boundary};

use crate::state::SandboxState;

/// The terminal payload reported by the program.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    /// Final aggregate payload.
    Result(Box<FinalPayload>),
    /// Terminal error payload.
    Error(ErrorPayload),
}

/// How the child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exited with status zero.
    pub success: bool,
    /// Human-readable status.
    pub description: String,
}

impl ExitInfo {
    /// Build from a process exit status.
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        Self {
            success: status.success(),
            description: status.to_string(),
        }
    }
}

/// Counters kept while demultiplexing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    /// Lines read.
    pub lines: u64,
    /// Ordinary output lines.
    pub output_lines: u64,
    /// Live events forwarded.
    pub events: u64,
    /// Events whose timestamp was raised to keep order.
    pub clamped: u64,
    /// Frames dropped because they did not decode.
    pub decode_errors: u64,
    /// Terminal frames ignored after the first.
    pub ignored_terminals: u64,
    /// Events dropped because they followed the terminal frame.
    pub late_events: u64,
}

/// Demultiplexer for one execution's output stream.
pub struct FrameDemux {
    id: ExecutionId,
    limiter: OutputLimiter,
    output: String,
    last_timestamp_ms: f64,
    events: Vec<TraceEvent>,
    terminal: Option<Terminal>,
    stats: DemuxStats,
}

impl FrameDemux {
    /// Create a demultiplexer.
    pub fn new(id: ExecutionId, limiter: OutputLimiter) -> Self {
        Self {
            id,
            limiter,
            output: String::new(),
            last_timestamp_ms: 0.0,
            events: Vec::new(),
            terminal: None,
            stats: DemuxStats::default(),
        }
    }

    /// Feed one output line.
    ///
    /// Returns the event to forward to the live sink, if the line carried
    /// one.
    pub fn push_line(&mut self, raw: &str) -> Option<TraceEvent> {
        self.stats.lines += 1;

        let frame = match decode_line(raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.decode_errors += 1;
                warn!(execution_id = %self.id, error = %e, "Dropping malformed frame");
                return None;
            }
        };

        match frame {
            Frame::Output(text) => {
                self.push_output(&text);
                None
            }
            Frame::Event(event) => self.push_event(event),
            Frame::Result(payload) => {
                self.set_terminal(Terminal::Result(payload));
                None
            }
            Frame::Error(payload) => {
                self.set_terminal(Terminal::Error(payload));
                None
            }
        }
    }

    fn push_output(&mut self, text: &str) {
        self.stats.output_lines += 1;
        let line = format!("{text}\n");
        let admitted = self.limiter.admit_output(line.len());
        if admitted > 0 {
            self.output.push_str(truncate_to_boundary(&line, admitted));
        }
    }

    fn push_event(&mut self, mut event: TraceEvent) -> Option<TraceEvent> {
        if self.terminal.is_some() {
            self.stats.late_events += 1;
            warn!(execution_id = %self.id, kind = %event.kind(), "Dropping event after terminal frame");
            return None;
        }
        if !self.limiter.admit_event(event.kind()) {
            return None;
        }

        let ts = event.timestamp_ms();
        if ts < self.last_timestamp_ms {
            self.stats.clamped += 1;
            debug!(
                execution_id = %self.id,
                timestamp_ms = ts,
                clamped_to = self.last_timestamp_ms,
                "Clamping out-of-order event timestamp"
            );
            event.set_timestamp_ms(self.last_timestamp_ms);
        } else {
            self.last_timestamp_ms = ts;
        }

        self.stats.events += 1;
        self.events.push(event.clone());
        Some(event)
    }

    fn set_terminal(&mut self, terminal: Terminal) {
        if self.terminal.is_some() {
            self.stats.ignored_terminals += 1;
            warn!(execution_id = %self.id, "Ignoring second terminal frame");
            return;
        }
        self.terminal = Some(terminal);
    }

    /// Whether a terminal frame has been seen.
    pub fn has_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    /// Ordinary output retained so far.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Events forwarded so far.
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Counters.
    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    /// Build the outcome of a program that ended on its own.
    ///
    /// A terminal frame decides the outcome. Without one, a clean exit is a
    /// success built from the forwarded events, and any other exit is a
    /// runtime error carrying the tail of standard error.
    pub fn finish(
        self,
        exit: &ExitInfo,
        elapsed_ms: f64,
        stderr_tail: &[String],
    ) -> (ExecutionOutcome, SandboxState) {
        let output_truncated = self.limiter.output_truncated();
        let events_truncated = self.limiter.events_truncated();

        match self.terminal {
            Some(Terminal::Result(payload)) => {
                let mut payload = *payload;
                let totals = payload.totals.take();
                let total_duration_ms = if payload.execution_time > 0.0 {
                    payload.execution_time
                } else {
                    elapsed_ms
                };
                let trace_truncated = payload.truncated || events_truncated;
                let return_value = payload.return_value.clone();
                let final_state = payload.final_state.clone();

                let success = ExecutionSuccess {
                    output: self.output,
                    return_value,
                    trace: payload.into_trace(),
                    total_duration_ms,
                    final_state,
                    trace_truncated,
                    output_truncated,
                    totals,
                };
                (ExecutionOutcome::Success(success), SandboxState::Completed)
            }
            Some(Terminal::Error(payload)) => {
                let message = if payload.message.trim().is_empty() {
                    "Unknown error".to_string()
                } else {
                    payload.message
                };
                let mut failure = ExecutionFailure::new(FailureKind::RuntimeError, message)
                    .with_line(payload.line);
                failure.output = self.output;
                failure.elapsed_ms = elapsed_ms;
                (ExecutionOutcome::Failure(failure), SandboxState::Failed)
            }
            None if exit.success => {
                let success = ExecutionSuccess {
                    output: self.output,
                    trace: self.events,
                    total_duration_ms: elapsed_ms,
                    trace_truncated: events_truncated,
                    output_truncated,
                    ..Default::default()
                };
                (ExecutionOutcome::Success(success), SandboxState::Completed)
            }
            None => {
                let tail: Vec<&str> = stderr_tail
                    .iter()
                    .map(|l| l.trim_end())
                    .filter(|l| !l.is_empty())
                    .collect();
                let message = if tail.is_empty() {
                    format!("Process ended with {}", exit.description)
                } else {
                    tail.join("\n")
                };
                let mut failure = ExecutionFailure::new(FailureKind::RuntimeError, message);
                failure.output = self.output;
                failure.elapsed_ms = elapsed_ms;
                (ExecutionOutcome::Failure(failure), SandboxState::Failed)
            }
        }
    }

    /// Build the outcome of a program killed by its deadline.
    pub fn timed_out(self, limit_ms: u128, elapsed_ms: f64) -> ExecutionOutcome {
        let mut failure = ExecutionFailure::new(
            FailureKind::Timeout,
            format!("Execution timed out after {limit_ms} ms"),
        );
        failure.output = self.output;
        failure.elapsed_ms = elapsed_ms;
        ExecutionOutcome::Failure(failure)
    }
}

impl std::fmt::Debug for FrameDemux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDemux")
            .field("id", &self.id)
            .field("has_terminal", &self.has_terminal())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracelab_resource::LimiterConfig;

    fn demux() -> FrameDemux {
        FrameDemux::new(ExecutionId::from("test"), OutputLimiter::with_defaults())
    }

    fn line_event(ts: f64, line: u32) -> String {
        format!(
            r#"__TRACELAB_EVENT__{{"event":"executionFlow","data":{{"timestampMs":{ts},"line":{line},"durationMs":0.1}}}}"#
        )
    }

    fn clean_exit() -> ExitInfo {
        ExitInfo {
            success: true,
            description: "exit status: 0".to_string(),
        }
    }

    #[test]
    fn test_output_and_events_are_split() {
        let mut demux = demux();
        assert!(demux.push_line("hello\n").is_none());
        assert!(demux.push_line(&line_event(1.0, 1)).is_some());
        assert!(demux.push_line("world\n").is_none());

        assert_eq!(demux.output(), "hello\nworld\n");
        assert_eq!(demux.events().len(), 1);
    }

    #[test]
    fn test_timestamps_clamped_non_decreasing() {
        let mut demux = demux();
        let first = demux.push_line(&line_event(5.0, 1)).unwrap();
        let second = demux.push_line(&line_event(3.0, 2)).unwrap();
        let third = demux.push_line(&line_event(6.0, 3)).unwrap();

        assert_eq!(first.timestamp_ms(), 5.0);
        assert_eq!(second.timestamp_ms(), 5.0);
        assert_eq!(third.timestamp_ms(), 6.0);
        assert_eq!(demux.stats().clamped, 1);
    }

    #[test]
    fn test_malformed_frame_dropped() {
        let mut demux = demux();
        assert!(demux.push_line("__TRACELAB_EVENT__{broken").is_none());
        assert!(demux.push_line(&line_event(1.0, 1)).is_some());

        assert_eq!(demux.stats().decode_errors, 1);
        assert_eq!(demux.output(), "");
    }

    #[test]
    fn test_second_terminal_ignored() {
        let mut demux = demux();
        demux.push_line(r#"__TRACELAB_ERROR__{"message":"first","line":2}"#);
        demux.push_line(r#"__TRACELAB_ERROR__{"message":"second","line":9}"#);
        assert_eq!(demux.stats().ignored_terminals, 1);

        let (outcome, state) = demux.finish(&clean_exit(), 1.0, &[]);
        assert_eq!(state, SandboxState::Failed);
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.message, "first");
        assert_eq!(failure.source_line, Some(2));
    }

    #[test]
    fn test_no_events_after_terminal() {
        let mut demux = demux();
        demux.push_line(r#"__TRACELAB_RESULT__{"executionTime":1}"#);
        assert!(demux.push_line(&line_event(9.0, 1)).is_none());
        assert_eq!(demux.stats().late_events, 1);
    }

    #[test]
    fn test_result_frame_is_success() {
        let mut demux = demux();
        demux.push_line("42\n");
        demux.push_line(&line_event(1.0, 1));
        demux.push_line(concat!(
            r#"__TRACELAB_RESULT__{"executionTime":2.5,"#,
            r#""executionFlow":[{"timestampMs":1,"line":1,"durationMs":0.1}],"returnValue":7}"#
        ));

        let (outcome, state) = demux.finish(&clean_exit(), 10.0, &[]);
        assert_eq!(state, SandboxState::Completed);
        let ExecutionOutcome::Success(success) = outcome else {
            panic!("Expected success");
        };
        assert_eq!(success.output, "42\n");
        assert_eq!(success.total_duration_ms, 2.5);
        assert_eq!(success.trace.len(), 1);
        assert_eq!(success.return_value, Some(serde_json::json!(7)));
    }

    #[test]
    fn test_clean_exit_without_terminal_uses_live_events() {
        let mut demux = demux();
        demux.push_line(&line_event(1.0, 1));
        demux.push_line(&line_event(2.0, 2));

        let (outcome, state) = demux.finish(&clean_exit(), 3.0, &[]);
        assert_eq!(state, SandboxState::Completed);
        assert_eq!(outcome.trace().len(), 2);
        assert_eq!(outcome.duration_ms(), 3.0);
    }

    #[test]
    fn test_crash_without_terminal_uses_stderr_tail() {
        let demux = demux();
        let exit = ExitInfo {
            success: false,
            description: "exit status: 1".to_string(),
        };
        let tail = vec!["Traceback:".to_string(), "  boom".to_string(), String::new()];

        let (outcome, state) = demux.finish(&exit, 3.0, &tail);
        assert_eq!(state, SandboxState::Failed);
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::RuntimeError);
        assert_eq!(failure.message, "Traceback:\n  boom");
        assert_eq!(failure.line_label(), "unknown");
    }

    #[test]
    fn test_crash_without_stderr() {
        let exit = ExitInfo {
            success: false,
            description: "signal: 9 (SIGKILL)".to_string(),
        };
        let (outcome, _) = demux().finish(&exit, 3.0, &[]);
        assert_eq!(
            outcome.failure().unwrap().message,
            "Process ended with signal: 9 (SIGKILL)"
        );
    }

    #[test]
    fn test_output_limit() {
        let limiter = OutputLimiter::new(LimiterConfig::new().with_max_output(8));
        let mut demux = FrameDemux::new(ExecutionId::from("t"), limiter);
        demux.push_line("12345\n");
        demux.push_line("67890\n");

        let (outcome, _) = demux.finish(&clean_exit(), 1.0, &[]);
        let ExecutionOutcome::Success(success) = outcome else {
            panic!("Expected success");
        };
        assert_eq!(success.output, "12345\n67");
        assert!(success.output_truncated);
    }

    #[test]
    fn test_line_flood_does_not_starve_calls() {
        let limiter = OutputLimiter::new(LimiterConfig::new().with_max_events(2));
        let mut demux = FrameDemux::new(ExecutionId::from("t"), limiter);
        for i in 0..5 {
            demux.push_line(&line_event(i as f64, i + 1));
        }
        let call = demux.push_line(
            r#"__TRACELAB_EVENT__{"event":"functionCall","data":{"timestampMs":9,"name":"work","durationMs":1}}"#,
        );

        assert!(call.is_some());
        assert_eq!(demux.events().len(), 3);
    }

    #[test]
    fn test_result_totals_carried() {
        let mut demux = demux();
        demux.push_line(concat!(
            r#"__TRACELAB_RESULT__{"executionTime":4,"truncated":true,"#,
            r#""functionCalls":[{"timestampMs":1,"name":"work","durationMs":0.5}],"#,
            r#""totals":{"calls":[{"name":"work","callCount":40,"totalDurationMs":20}],"peakMemoryBytes":4096}}"#
        ));

        let (outcome, _) = demux.finish(&clean_exit(), 5.0, &[]);
        let ExecutionOutcome::Success(success) = outcome else {
            panic!("Expected success");
        };
        assert!(success.trace_truncated);
        assert_eq!(success.trace.len(), 1);
        let totals = success.totals.unwrap();
        assert_eq!(totals.call_count(), 40);
        assert_eq!(totals.peak_memory_bytes, 4096);
    }

    #[test]
    fn test_timed_out_keeps_output() {
        let mut demux = demux();
        demux.push_line("partial\n");
        let outcome = demux.timed_out(200, 201.0);

        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert_eq!(failure.output, "partial\n");
        assert!(failure.message.contains("200 ms"));
    }
}
