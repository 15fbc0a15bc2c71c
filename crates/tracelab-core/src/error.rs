//! Core error types for TraceLab.
//!
//! Errors are categorized by where they arise: request admission, the
//! source rewrite, the running program, and the out-of-band protocol.

use std::time::Duration;
use thiserror::Error;

use crate::request::ExecutionId;

/// Errors across the execution pipeline.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// No handler is registered for the language identifier.
    #[error("Unsupported language: '{0}'")]
    UnsupportedLanguage(String),

    /// A handler for the language identifier is already registered.
    #[error("Language handler already registered: '{0}'")]
    DuplicateHandler(String),

    /// The execution ID is already in flight.
    #[error("Execution already in flight: {0}")]
    DuplicateExecution(ExecutionId),

    /// The request violates an input constraint.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The rewrite could not produce a valid program.
    #[error("Instrumentation failed: {reason}")]
    InstrumentationFailure {
        /// Why no program could be produced.
        reason: String,
    },

    /// The program raised during execution.
    #[error("Runtime error at line {}: {message}", line.map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    Runtime {
        /// Error message.
        message: String,
        /// Offending source line, where determinable.
        line: Option<u32>,
    },

    /// Execution exceeded the timeout limit.
    #[error("Execution timeout after {0:?}")]
    Timeout(Duration),

    /// A framed control line could not be decoded.
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(#[from] ProtocolError),

    /// The interpreter could not be started.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        /// Interpreter that failed to start.
        program: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// IO error while preparing or supervising the sandbox.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected runtime invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExecutionError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::UnsupportedLanguage(_) => "unsupportedLanguage",
            ExecutionError::DuplicateHandler(_) => "duplicateHandler",
            ExecutionError::DuplicateExecution(_) => "duplicateExecution",
            ExecutionError::InvalidRequest(_) => "invalidRequest",
            ExecutionError::InstrumentationFailure { .. } => "instrumentationFailure",
            ExecutionError::Runtime { .. } => "runtimeError",
            ExecutionError::Timeout(_) => "timeout",
            ExecutionError::ProtocolDecode(_) => "protocolDecodeError",
            ExecutionError::Spawn { .. } => "spawn",
            ExecutionError::Io(_) => "io",
            ExecutionError::Internal(_) => "internal",
        }
    }

    /// Whether the error was raised before any sandbox was allocated.
    pub fn is_admission_error(&self) -> bool {
        matches!(
            self,
            ExecutionError::UnsupportedLanguage(_)
                | ExecutionError::DuplicateExecution(_)
                | ExecutionError::InvalidRequest(_)
        )
    }
}

/// Errors decoding a framed control line.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The JSON payload after the sentinel did not parse.
    #[error("malformed {frame} frame: {reason}")]
    Malformed {
        /// Frame kind.
        frame: &'static str,
        /// Parser message.
        reason: String,
    },
}

/// Result type alias for execution operations.
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
