//! Out-of-band execution protocol.
//!
//! The instrumented program shares one text stream between its ordinary
//! output and control frames. A control frame is a single line made of a
//! fixed sentinel prefix followed by a single-line JSON payload:
//!
//! ```text
//! __TRACELAB_EVENT__{"event":"functionCall","data":{...}}
//! __TRACELAB_RESULT__{"executionTime":12.5,"memoryUsage":[...],...}
//! __TRACELAB_ERROR__{"message":"...","stack":"...","line":4}
//! ```
//!
//! Every other line is ordinary output.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::event::{FunctionCall, LineExecution, MemorySample, TraceEvent, VariableState};

/// Prefix of a per-event notification frame.
pub const EVENT_SENTINEL: &str = "__TRACELAB_EVENT__";

/// Prefix of the final aggregate payload frame.
pub const RESULT_SENTINEL: &str = "__TRACELAB_RESULT__";

/// Prefix of the terminal error frame.
pub const ERROR_SENTINEL: &str = "__TRACELAB_ERROR__";

/// One decoded output line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Ordinary program output, without the line terminator.
    Output(String),
    /// A live trace event.
    Event(TraceEvent),
    /// The final aggregate payload.
    Result(Box<FinalPayload>),
    /// The terminal error payload.
    Error(ErrorPayload),
}

impl Frame {
    /// Whether this frame ends the execution.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Result(_) | Frame::Error(_))
    }
}

/// Decode one output line.
///
/// The line terminator (`\n` or `\r\n`) is stripped. Lines without a
/// sentinel prefix are ordinary output. A sentinel followed by an
/// unparsable payload is a [`ProtocolError`]; the caller drops that frame
/// and carries on.
pub fn decode_line(line: &str) -> ProtocolResult<Frame> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);

    if let Some(payload) = line.strip_prefix(EVENT_SENTINEL) {
        let event: TraceEvent = parse("event", payload)?;
        return Ok(Frame::Event(event.normalize()));
    }
    if let Some(payload) = line.strip_prefix(RESULT_SENTINEL) {
        let result: FinalPayload = parse("result", payload)?;
        return Ok(Frame::Result(Box::new(result)));
    }
    if let Some(payload) = line.strip_prefix(ERROR_SENTINEL) {
        let error: ErrorPayload = parse("error", payload)?;
        return Ok(Frame::Error(error));
    }
    Ok(Frame::Output(line.to_string()))
}

fn parse<T: for<'de> Deserialize<'de>>(frame: &'static str, payload: &str) -> ProtocolResult<T> {
    serde_json::from_str(payload.trim()).map_err(|e| ProtocolError::Malformed {
        frame,
        reason: e.to_string(),
    })
}

/// The final aggregate payload reported by the instrumented program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FinalPayload {
    /// Wall-clock duration of the snippet in milliseconds.
    pub execution_time: f64,
    /// Memory samples.
    pub memory_usage: Vec<MemorySample>,
    /// Completed function calls.
    pub function_calls: Vec<FunctionCall>,
    /// Variable mutations.
    pub variable_states: Vec<VariableState>,
    /// Line executions.
    pub execution_flow: Vec<LineExecution>,
    /// Completion value, where the language has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<serde_json::Value>,
    /// Top-level names and value summaries at exit.
    pub final_state: BTreeMap<String, String>,
    /// The program stopped recording some event kind after hitting its cap.
    pub truncated: bool,
    /// Running totals kept for the whole run, including past the cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<TraceTotals>,
}

/// Aggregate counters the program keeps regardless of the event cap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraceTotals {
    /// One entry per caller/callee pair, in first-call order.
    pub calls: Vec<CallTotal>,
    /// Highest resident set size sampled, in bytes.
    pub peak_memory_bytes: u64,
}

impl TraceTotals {
    /// Total completed calls across every pair.
    pub fn call_count(&self) -> usize {
        self.calls.iter().map(|c| c.call_count).sum()
    }
}

/// Call counters for one caller/callee pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallTotal {
    /// Enclosing traced function, or `None` at top level.
    pub caller: Option<String>,
    /// Callee name.
    pub name: String,
    /// Completed calls.
    pub call_count: usize,
    /// Summed call durations in milliseconds.
    pub total_duration_ms: f64,
}

impl FinalPayload {
    /// Number of trace events carried.
    pub fn event_count(&self) -> usize {
        self.memory_usage.len()
            + self.function_calls.len()
            + self.variable_states.len()
            + self.execution_flow.len()
    }

    /// Flatten into a single trace ordered by timestamp.
    ///
    /// The sort is stable, so events sharing a timestamp keep their
    /// per-kind order.
    pub fn into_trace(self) -> Vec<TraceEvent> {
        let mut trace = Vec::with_capacity(self.event_count());
        trace.extend(self.memory_usage.into_iter().map(TraceEvent::Memory));
        trace.extend(self.function_calls.into_iter().map(TraceEvent::FunctionCall));
        trace.extend(self.variable_states.into_iter().map(TraceEvent::VariableState));
        trace.extend(self.execution_flow.into_iter().map(TraceEvent::LineExecution));

        let mut trace: Vec<TraceEvent> = trace.into_iter().map(TraceEvent::normalize).collect();
        trace.sort_by(|a, b| a.timestamp_ms().total_cmp(&b.timestamp_ms()));
        trace
    }
}

/// The terminal error payload reported by the instrumented program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPayload {
    /// Error message.
    pub message: String,
    /// Stack or traceback text, if any.
    pub stack: String,
    /// Offending source line; anything not a positive integer is unknown.
    #[serde(deserialize_with = "lenient_line")]
    pub line: Option<u32>,
}

/// Accept a number, a numeric string, or anything else as `None`.
fn lenient_line<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let line = match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    Ok(line
        .filter(|&l| l > 0)
        .and_then(|l| u32::try_from(l).ok()))
}
