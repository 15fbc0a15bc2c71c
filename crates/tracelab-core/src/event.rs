//! Trace event model.
//!
//! The shared vocabulary exchanged between instrumentation, the sandbox
//! runtime and aggregation. The serialized form is the `{event, data}`
//! payload carried by the out-of-band protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum length, in characters, of an argument or value summary.
pub const SUMMARY_MAX_CHARS: usize = 100;

/// Synthetic caller name for calls made from the top level of a snippet.
pub const GLOBAL_CALLER: &str = "global";

/// Truncate a value summary to [`SUMMARY_MAX_CHARS`] characters.
///
/// Longer summaries keep their first 97 characters followed by `...`.
pub fn summarize(value: &str) -> String {
    if value.chars().count() <= SUMMARY_MAX_CHARS {
        return value.to_string();
    }
    let mut out: String = value.chars().take(SUMMARY_MAX_CHARS - 3).collect();
    out.push_str("...");
    out
}

/// A memory sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    /// Milliseconds since execution start.
    pub timestamp_ms: f64,
    /// Resident set size in bytes.
    pub rss: u64,
    /// Virtual memory size in bytes.
    #[serde(default)]
    pub vms: u64,
    /// Bytes allocated since the previous sample.
    #[serde(default)]
    pub allocated_delta: u64,
    /// Bytes released since the previous sample.
    #[serde(default)]
    pub deallocated_delta: u64,
}

/// A completed function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    /// Milliseconds since execution start, taken when the call returned.
    pub timestamp_ms: f64,
    /// Callee name.
    pub name: String,
    /// Caller name; `None` means the top level.
    #[serde(default)]
    pub caller: Option<String>,
    /// Argument summaries.
    #[serde(default)]
    pub args: Vec<String>,
    /// Wall-clock duration of the call.
    pub duration_ms: f64,
}

impl FunctionCall {
    /// The caller, defaulting to [`GLOBAL_CALLER`].
    pub fn caller_or_global(&self) -> &str {
        self.caller.as_deref().unwrap_or(GLOBAL_CALLER)
    }
}

/// A variable mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableState {
    /// Milliseconds since execution start.
    pub timestamp_ms: f64,
    /// Variable name.
    pub name: String,
    /// Runtime type name of the value.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Value summary.
    pub value: String,
    /// Source line of the mutation.
    pub line: u32,
}

/// One execution of a source line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineExecution {
    /// Milliseconds since execution start, taken when the line finished.
    pub timestamp_ms: f64,
    /// Source line number (1-based, original source).
    pub line: u32,
    /// Source text of the line.
    #[serde(default)]
    pub source: String,
    /// Time spent on the line.
    pub duration_ms: f64,
}

/// A single timestamped observation produced during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum TraceEvent {
    /// Memory sample.
    #[serde(rename = "memory")]
    Memory(MemorySample),
    /// Function call.
    #[serde(rename = "functionCall")]
    FunctionCall(FunctionCall),
    /// Variable mutation.
    #[serde(rename = "variableState")]
    VariableState(VariableState),
    /// Line execution.
    #[serde(rename = "executionFlow")]
    LineExecution(LineExecution),
}

impl TraceEvent {
    /// Get the event kind.
    pub fn kind(&self) -> EventKind {
        match self {
            TraceEvent::Memory(_) => EventKind::Memory,
            TraceEvent::FunctionCall(_) => EventKind::FunctionCall,
            TraceEvent::VariableState(_) => EventKind::VariableState,
            TraceEvent::LineExecution(_) => EventKind::ExecutionFlow,
        }
    }

    /// Milliseconds since execution start.
    pub fn timestamp_ms(&self) -> f64 {
        match self {
            TraceEvent::Memory(e) => e.timestamp_ms,
            TraceEvent::FunctionCall(e) => e.timestamp_ms,
            TraceEvent::VariableState(e) => e.timestamp_ms,
            TraceEvent::LineExecution(e) => e.timestamp_ms,
        }
    }

    /// Overwrite the timestamp.
    pub fn set_timestamp_ms(&mut self, timestamp_ms: f64) {
        match self {
            TraceEvent::Memory(e) => e.timestamp_ms = timestamp_ms,
            TraceEvent::FunctionCall(e) => e.timestamp_ms = timestamp_ms,
            TraceEvent::VariableState(e) => e.timestamp_ms = timestamp_ms,
            TraceEvent::LineExecution(e) => e.timestamp_ms = timestamp_ms,
        }
    }

    /// Enforce the summary length bound and finite, non-negative timings.
    pub fn normalize(mut self) -> Self {
        fn clean(v: f64) -> f64 {
            if v.is_finite() && v > 0.0 { v } else { 0.0 }
        }

        match &mut self {
            TraceEvent::Memory(e) => {
                e.timestamp_ms = clean(e.timestamp_ms);
            }
            TraceEvent::FunctionCall(e) => {
                e.timestamp_ms = clean(e.timestamp_ms);
                e.duration_ms = clean(e.duration_ms);
                for arg in &mut e.args {
                    if arg.chars().count() > SUMMARY_MAX_CHARS {
                        *arg = summarize(arg);
                    }
                }
            }
            TraceEvent::VariableState(e) => {
                e.timestamp_ms = clean(e.timestamp_ms);
                if e.value.chars().count() > SUMMARY_MAX_CHARS {
                    e.value = summarize(&e.value);
                }
            }
            TraceEvent::LineExecution(e) => {
                e.timestamp_ms = clean(e.timestamp_ms);
                e.duration_ms = clean(e.duration_ms);
            }
        }
        self
    }
}

/// The kind of a trace event, named as on the live feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// Memory sample.
    Memory,
    /// Function call.
    FunctionCall,
    /// Variable mutation.
    VariableState,
    /// Line execution.
    ExecutionFlow,
}

impl EventKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Memory => "memory",
            EventKind::FunctionCall => "functionCall",
            EventKind::VariableState => "variableState",
            EventKind::ExecutionFlow => "executionFlow",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_bounds() {
        assert_eq!(summarize("short"), "short");

        let long = "x".repeat(250);
        let summary = summarize(&long);
        assert_eq!(summary.chars().count(), SUMMARY_MAX_CHARS);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_summarize_multibyte() {
        let long = "é".repeat(150);
        let summary = summarize(&long);
        assert_eq!(summary.chars().count(), SUMMARY_MAX_CHARS);
    }

    #[test]
    fn test_event_wire_format() {
        let json = r#"{"event":"functionCall","data":{"timestampMs":12.5,"name":"fib","caller":"main","args":["10"],"durationMs":3.25}}"#;
        let event: TraceEvent = serde_json::from_str(json).unwrap();

        match &event {
            TraceEvent::FunctionCall(call) => {
                assert_eq!(call.name, "fib");
                assert_eq!(call.caller_or_global(), "main");
                assert_eq!(call.args, vec!["10".to_string()]);
            }
            other => panic!("Wrong event type: {:?}", other),
        }
        assert_eq!(event.kind(), EventKind::FunctionCall);
        assert_eq!(event.timestamp_ms(), 12.5);
    }

    #[test]
    fn test_variable_state_type_field() {
        let json = r#"{"event":"variableState","data":{"timestampMs":1,"name":"x","type":"int","value":"5","line":3}}"#;
        let event: TraceEvent = serde_json::from_str(json).unwrap();

        let TraceEvent::VariableState(state) = event else {
            panic!("Wrong event type");
        };
        assert_eq!(state.type_name, "int");
        assert_eq!(state.line, 3);
    }

    #[test]
    fn test_missing_caller_defaults_to_global() {
        let json = r#"{"event":"functionCall","data":{"timestampMs":1,"name":"f","durationMs":1}}"#;
        let TraceEvent::FunctionCall(call) = serde_json::from_str::<TraceEvent>(json).unwrap() else {
            panic!("Wrong event type");
        };
        assert_eq!(call.caller_or_global(), GLOBAL_CALLER);
        assert!(call.args.is_empty());
    }

    #[test]
    fn test_normalize_truncates_and_cleans() {
        let event = TraceEvent::FunctionCall(FunctionCall {
            timestamp_ms: f64::NAN,
            name: "f".to_string(),
            caller: None,
            args: vec!["a".repeat(300)],
            duration_ms: -1.0,
        })
        .normalize();

        let TraceEvent::FunctionCall(call) = event else {
            panic!("Wrong event type");
        };
        assert_eq!(call.timestamp_ms, 0.0);
        assert_eq!(call.duration_ms, 0.0);
        assert_eq!(call.args[0].chars().count(), SUMMARY_MAX_CHARS);
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::Memory.as_str(), "memory");
        assert_eq!(EventKind::ExecutionFlow.to_string(), "executionFlow");
    }
}
